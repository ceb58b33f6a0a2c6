//! Sitemap discovery and parsing.
//!
//! Seeds for sitemap-mode crawls come from here: the origin's robots.txt
//! `Sitemap:` directives when present, the conventional `/sitemap.xml`
//! and `/sitemap_index.xml` locations otherwise. Content may be plain
//! XML or gzipped (detected by magic bytes), and sitemap indexes nest
//! up to a fixed depth so a cyclic index cannot recurse forever.

use std::collections::{HashSet, VecDeque};
use std::io::Read;
use std::time::Duration;

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

use crate::robots::RobotsCache;
use crate::utils::constants::{
    DEFAULT_USER_AGENT, MAX_SITEMAP_DEPTH, MAX_SITEMAP_URLS, ROBOTS_FETCH_TIMEOUT_SECS,
};

/// `<loc>` elements, the only payload a crawler needs from a sitemap.
static LOC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<loc[^>]*>\s*(.*?)\s*</loc>").expect("static loc pattern compiles")
});

/// Gzip stream magic bytes.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// What one sitemap document contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapContents {
    /// Page URLs from a `<urlset>` document.
    UrlSet(Vec<String>),
    /// Child sitemap URLs from a `<sitemapindex>` document.
    Index(Vec<String>),
}

/// Parse sitemap bytes: transparently gunzips, then splits on whether
/// the document is an index or a URL set.
#[must_use]
pub fn parse(bytes: &[u8]) -> SitemapContents {
    let text = if bytes.starts_with(&GZIP_MAGIC) {
        let mut decoded = String::new();
        match MultiGzDecoder::new(bytes).read_to_string(&mut decoded) {
            Ok(_) => decoded,
            Err(e) => {
                warn!("sitemap gunzip failed: {e}");
                return SitemapContents::UrlSet(Vec::new());
            }
        }
    } else {
        String::from_utf8_lossy(bytes).into_owned()
    };

    let locs: Vec<String> = LOC_RE
        .captures_iter(&text)
        .filter_map(|cap| cap.get(1))
        .map(|m| unescape_xml(m.as_str()))
        .filter(|loc| !loc.is_empty())
        .collect();

    if text.to_lowercase().contains("<sitemapindex") {
        SitemapContents::Index(locs)
    } else {
        SitemapContents::UrlSet(locs)
    }
}

/// Minimal XML entity unescape for `<loc>` values.
fn unescape_xml(value: &str) -> String {
    value
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .trim()
        .to_string()
}

/// Fetches and walks sitemaps for a site.
pub struct SitemapClient {
    client: reqwest::Client,
    user_agent: String,
}

impl Default for SitemapClient {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl SitemapClient {
    /// New client identifying as `user_agent`.
    #[must_use]
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::default(),
            user_agent: user_agent.into(),
        }
    }

    /// Discover page URLs for a site.
    ///
    /// Starts from robots.txt `Sitemap:` directives, falling back to
    /// the conventional `/sitemap.xml` and `/sitemap_index.xml` probes,
    /// then walks sitemap indexes breadth-first up to the nesting limit.
    pub async fn discover(&self, base: &Url, robots: &RobotsCache) -> Vec<String> {
        let mut roots = robots.sitemaps(&self.user_agent, base).await;
        if roots.is_empty() {
            for probe in ["/sitemap.xml", "/sitemap_index.xml"] {
                let mut candidate = base.clone();
                candidate.set_path(probe);
                candidate.set_query(None);
                candidate.set_fragment(None);
                roots.push(candidate.into());
            }
        }

        let mut urls = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut worklist: VecDeque<(String, usize)> =
            roots.into_iter().map(|u| (u, 0)).collect();

        while let Some((sitemap_url, depth)) = worklist.pop_front() {
            if !seen.insert(sitemap_url.clone()) {
                continue;
            }
            let bytes = match self.fetch(&sitemap_url).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!("sitemap fetch skipped for {sitemap_url}: {e:#}");
                    continue;
                }
            };
            match parse(&bytes) {
                SitemapContents::UrlSet(locs) => {
                    debug!("sitemap {sitemap_url} listed {} urls", locs.len());
                    for loc in locs {
                        if urls.len() >= MAX_SITEMAP_URLS {
                            warn!("sitemap harvest capped at {MAX_SITEMAP_URLS} urls");
                            return urls;
                        }
                        urls.push(loc);
                    }
                }
                SitemapContents::Index(children) => {
                    if depth + 1 >= MAX_SITEMAP_DEPTH {
                        warn!(
                            "sitemap index nesting limit reached at {sitemap_url}; \
                             skipping {} children",
                            children.len()
                        );
                        continue;
                    }
                    for child in children {
                        worklist.push_back((child, depth + 1));
                    }
                }
            }
        }

        info!("sitemap discovery for {base} produced {} urls", urls.len());
        urls
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::USER_AGENT, &self.user_agent)
            .timeout(Duration::from_secs(ROBOTS_FETCH_TIMEOUT_SECS))
            .send()
            .await
            .with_context(|| format!("request to {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("{url} returned HTTP {status}");
        }
        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("body read from {url} failed"))?;
        Ok(bytes.to_vec())
    }
}
