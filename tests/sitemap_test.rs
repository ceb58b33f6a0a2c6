//! Sitemap discovery integration tests against a local mock server.

use std::io::Write;

use flate2::Compression;
use flate2::write::GzEncoder;
use trawler::{CrawlError, CrawlOptions, Crawler, RobotsCache, SitemapClient};
use url::Url;

fn urlset(urls: &[&str]) -> String {
    let entries: String = urls
        .iter()
        .map(|u| format!("<url><loc>{u}</loc></url>"))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{entries}</urlset>"#
    )
}

fn sitemap_index(sitemaps: &[&str]) -> String {
    let entries: String = sitemaps
        .iter()
        .map(|u| format!("<sitemap><loc>{u}</loc></sitemap>"))
        .collect();
    format!(r#"<?xml version="1.0"?><sitemapindex>{entries}</sitemapindex>"#)
}

#[tokio::test]
async fn robots_directive_wins_over_probes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body(format!(
            "User-agent: *\nDisallow:\n\nSitemap: {}/deep/custom.xml\n",
            server.url()
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/deep/custom.xml")
        .with_status(200)
        .with_body(urlset(&["http://a.test/one", "http://a.test/two"]))
        .create_async()
        .await;
    let probe = server
        .mock("GET", "/sitemap.xml")
        .expect(0)
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let urls = SitemapClient::new("TestBot")
        .discover(&base, &RobotsCache::new())
        .await;

    assert_eq!(urls, ["http://a.test/one", "http://a.test/two"]);
    probe.assert_async().await;
}

#[tokio::test]
async fn conventional_probe_is_the_fallback() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(urlset(&["http://a.test/only"]))
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap_index.xml")
        .with_status(404)
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let urls = SitemapClient::new("TestBot")
        .discover(&base, &RobotsCache::new())
        .await;

    assert_eq!(urls, ["http://a.test/only"]);
}

#[tokio::test]
async fn index_nesting_is_walked() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(sitemap_index(&[
            &format!("{}/posts.xml", server.url()),
            &format!("{}/pages.xml", server.url()),
        ]))
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap_index.xml")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/posts.xml")
        .with_status(200)
        .with_body(urlset(&["http://a.test/p1", "http://a.test/p2"]))
        .create_async()
        .await;
    server
        .mock("GET", "/pages.xml")
        .with_status(200)
        .with_body(urlset(&["http://a.test/about"]))
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let mut urls = SitemapClient::new("TestBot")
        .discover(&base, &RobotsCache::new())
        .await;
    urls.sort_unstable();

    assert_eq!(
        urls,
        ["http://a.test/about", "http://a.test/p1", "http://a.test/p2"]
    );
}

#[tokio::test]
async fn gzipped_sitemaps_are_decoded() {
    let mut server = mockito::Server::new_async().await;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(urlset(&["http://a.test/zipped"]).as_bytes())
        .unwrap();
    let gz = encoder.finish().unwrap();

    server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body(format!(
            "User-agent: *\nDisallow:\n\nSitemap: {}/sitemap.xml.gz\n",
            server.url()
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap.xml.gz")
        .with_status(200)
        .with_header("content-type", "application/gzip")
        .with_body(gz)
        .create_async()
        .await;

    let base = Url::parse(&server.url()).unwrap();
    let urls = SitemapClient::new("TestBot")
        .discover(&base, &RobotsCache::new())
        .await;

    assert_eq!(urls, ["http://a.test/zipped"]);
}

#[tokio::test]
async fn sitemap_mode_crawls_exactly_the_listed_urls() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(200)
        .with_body(format!(
            "User-agent: *\nDisallow:\n\nSitemap: {}/sitemap.xml\n",
            server.url()
        ))
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(200)
        .with_body(urlset(&[
            &format!("{}/alpha", server.url()),
            &format!("{}/beta", server.url()),
        ]))
        .create_async()
        .await;
    server
        .mock("GET", "/alpha")
        .with_status(200)
        .with_body(r#"<html><a href="/not-followed">x</a></html>"#)
        .create_async()
        .await;
    server
        .mock("GET", "/beta")
        .with_status(200)
        .with_body("<html></html>")
        .create_async()
        .await;
    let unfollowed = server
        .mock("GET", "/not-followed")
        .expect(0)
        .create_async()
        .await;

    let report = Crawler::new()
        .crawl_from_sitemap(&server.url(), CrawlOptions::builder().build().unwrap())
        .await
        .unwrap();

    assert_eq!(report.stats.crawled, 2);
    // Sitemap mode never follows links.
    unfollowed.assert_async().await;
}

#[tokio::test]
async fn empty_discovery_is_a_hard_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/robots.txt")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap.xml")
        .with_status(404)
        .create_async()
        .await;
    server
        .mock("GET", "/sitemap_index.xml")
        .with_status(404)
        .create_async()
        .await;

    let err = Crawler::new()
        .crawl_from_sitemap(&server.url(), CrawlOptions::builder().build().unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, CrawlError::EmptySitemap(_)));
}
