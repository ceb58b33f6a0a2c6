//! Crawl configuration types.
//!
//! `CrawlOptions` carries every per-crawl knob. Function-valued fields
//! (handler, retriever) ride along behind `Arc`s and are skipped during
//! serialization; everything else round-trips through serde.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::handler::CrawlHandler;
use crate::retriever::Retriever;
use crate::utils::constants::{
    DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_GRACE_PERIOD_SECS, DEFAULT_MAX_DEPTH, DEFAULT_MAX_RETRIES,
    DEFAULT_MAX_WORKERS, DEFAULT_RATE_LIMIT_RPS, DEFAULT_USER_AGENT,
};

/// How a crawl treats discovered links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlMode {
    /// Crawl exactly the given seeds; never follow links.
    UrlList,
    /// Breadth-first from the seed, following same-domain links up to
    /// `max_depth`.
    Website,
    /// Seeds come from sitemap discovery; links are not followed.
    Sitemap,
}

impl CrawlMode {
    /// Whether discovered links are fed back into the frontier.
    #[must_use]
    pub const fn follows_links(&self) -> bool {
        matches!(self, Self::Website)
    }
}

/// Per-crawl configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct CrawlOptions {
    /// Upper bound on concurrently in-flight URLs.
    pub(crate) max_workers: usize,
    /// Per-domain token refill rate, requests per second.
    pub(crate) rate_limit: f64,
    /// Maximum link depth in website mode.
    pub(crate) max_depth: u32,
    /// Consult robots.txt before fetching.
    pub(crate) respect_robots_txt: bool,
    /// Regex allow-list; empty allows everything.
    pub(crate) include_patterns: Vec<String>,
    /// Regex deny-list.
    pub(crate) exclude_patterns: Vec<String>,
    /// Per-URL retry budget across transient failures and crashes.
    pub(crate) max_retries: u32,
    /// Crawl-wide deadline.
    pub(crate) crawl_timeout: Option<Duration>,
    /// Per-fetch deadline.
    pub(crate) fetch_timeout: Duration,
    /// User agent for fetches and robots evaluation.
    pub(crate) user_agent: String,
    /// How long in-flight workers may run after cancellation.
    pub(crate) grace_period: Duration,

    /// Crawler implementation; `LinkExtractor` when unset.
    #[serde(skip)]
    pub(crate) handler: Option<Arc<dyn CrawlHandler>>,
    /// Retriever override; the engine's default HTTP retriever when
    /// unset.
    #[serde(skip)]
    pub(crate) retriever: Option<Arc<dyn Retriever>>,
}

impl Default for CrawlOptions {
    fn default() -> Self {
        Self {
            max_workers: DEFAULT_MAX_WORKERS,
            rate_limit: DEFAULT_RATE_LIMIT_RPS,
            max_depth: DEFAULT_MAX_DEPTH,
            respect_robots_txt: true,
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
            max_retries: DEFAULT_MAX_RETRIES,
            crawl_timeout: None,
            fetch_timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            handler: None,
            retriever: None,
        }
    }
}

impl fmt::Debug for CrawlOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrawlOptions")
            .field("max_workers", &self.max_workers)
            .field("rate_limit", &self.rate_limit)
            .field("max_depth", &self.max_depth)
            .field("respect_robots_txt", &self.respect_robots_txt)
            .field("include_patterns", &self.include_patterns)
            .field("exclude_patterns", &self.exclude_patterns)
            .field("max_retries", &self.max_retries)
            .field("crawl_timeout", &self.crawl_timeout)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("user_agent", &self.user_agent)
            .field("grace_period", &self.grace_period)
            .field("handler", &self.handler.as_ref().map(|_| "<custom>"))
            .field("retriever", &self.retriever.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl CrawlOptions {
    /// Upper bound on concurrently in-flight URLs.
    #[must_use]
    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Per-domain refill rate in requests per second.
    #[must_use]
    pub fn rate_limit(&self) -> f64 {
        self.rate_limit
    }

    /// Maximum link depth in website mode.
    #[must_use]
    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// User agent for fetches and robots evaluation.
    #[must_use]
    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    /// Per-URL retry budget.
    #[must_use]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}
