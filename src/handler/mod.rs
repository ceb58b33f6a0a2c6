//! The pluggable crawler implementation seam.
//!
//! Users supply a [`CrawlHandler`] that decides what to crawl and what
//! to pull out of each page. Handler failures are ordinary per-URL
//! outcomes, never worker crashes, and the optional hooks can observe
//! the crawl without being able to take it down.

use log::debug;
use serde_json::{Value, json};
use thiserror::Error;
use url::Url;

use crate::document::Document;
use crate::engine::{CrawlReport, UrlResult};
use crate::error::ErrorKind;
use crate::url_tools;

/// Admission context handed to [`CrawlHandler::should_crawl`].
#[derive(Debug, Clone)]
pub struct CrawlContext {
    /// Link hops from the seed; 0 for seeds themselves.
    pub depth: u32,
    /// The page this URL was discovered on, when any.
    pub source_url: Option<Url>,
    /// Root domain of the crawl in website mode.
    pub root_domain: Option<String>,
}

/// Per-URL extraction failure.
///
/// Reported as a `parse` outcome for the URL; the crawl continues.
#[derive(Debug, Clone, Error)]
#[error("extraction failed: {0}")]
pub struct ExtractError(pub String);

impl From<String> for ExtractError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl From<&str> for ExtractError {
    fn from(msg: &str) -> Self {
        Self(msg.to_string())
    }
}

impl From<anyhow::Error> for ExtractError {
    fn from(err: anyhow::Error) -> Self {
        Self(format!("{err:#}"))
    }
}

/// User-pluggable crawling behavior.
///
/// `extract_data` and `extract_urls` are required; everything else has
/// a sensible default. Implementations are shared behind an `Arc`
/// across workers, so interior state must be `Send + Sync`.
pub trait CrawlHandler: Send + Sync {
    /// Veto a URL before it enters the frontier.
    fn should_crawl(&self, _url: &Url, _ctx: &CrawlContext) -> bool {
        true
    }

    /// Pull structured data out of a fetched document.
    fn extract_data(&self, doc: &Document, url: &Url) -> Result<Value, ExtractError>;

    /// Pull candidate links out of a fetched document.
    ///
    /// Returned strings may be relative; the engine resolves them
    /// against `base` and runs them through the frontier filters.
    fn extract_urls(&self, doc: &Document, base: &Url) -> Result<Vec<String>, ExtractError>;

    /// Called after each successful URL.
    fn on_url_success(&self, _url: &Url, _result: &UrlResult) {}

    /// Called after each failed URL, once retries are exhausted.
    fn on_url_failure(&self, _url: &Url, _kind: ErrorKind, _attempts: u32) {}

    /// Called once with the full report when the crawl finishes.
    fn on_complete(&self, _report: &CrawlReport) {}
}

/// Default crawler implementation: follow links, pull page metadata.
///
/// Returns every link it finds; same-domain and pattern filtering is
/// the orchestrator's job, so this extractor stays mode-agnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinkExtractor;

impl CrawlHandler for LinkExtractor {
    fn extract_data(&self, doc: &Document, _url: &Url) -> Result<Value, ExtractError> {
        Ok(json!({
            "title": doc.title,
            "description": doc.metadata.get("description"),
            "word_count": doc.text.split_whitespace().count(),
        }))
    }

    fn extract_urls(&self, doc: &Document, base: &Url) -> Result<Vec<String>, ExtractError> {
        let mut urls = Vec::with_capacity(doc.links.len());
        for link in &doc.links {
            match url_tools::resolve(&link.href, base) {
                Ok(resolved) => urls.push(resolved.into()),
                Err(e) => debug!("unresolvable link on {base}: {e}"),
            }
        }
        Ok(urls)
    }
}
