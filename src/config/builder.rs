//! Fluent builder for `CrawlOptions`.
//!
//! Every knob has a working default, so `CrawlOptions::builder().build()`
//! is a valid polite configuration. `build()` validates the filter
//! patterns eagerly so a bad regex fails at configuration time, not in
//! the middle of a crawl.

use std::sync::Arc;
use std::time::Duration;

use super::types::CrawlOptions;
use crate::error::CrawlError;
use crate::handler::CrawlHandler;
use crate::retriever::Retriever;
use crate::url_tools::UrlFilter;

/// Builder for [`CrawlOptions`].
#[derive(Default)]
pub struct CrawlOptionsBuilder {
    options: CrawlOptions,
}

impl CrawlOptions {
    /// Start building a configuration from the defaults.
    #[must_use]
    pub fn builder() -> CrawlOptionsBuilder {
        CrawlOptionsBuilder::default()
    }
}

impl CrawlOptionsBuilder {
    /// Upper bound on concurrently in-flight URLs. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn max_workers(mut self, workers: usize) -> Self {
        self.options.max_workers = workers.max(1);
        self
    }

    /// Per-domain token refill rate in requests per second.
    #[must_use]
    pub fn rate_limit(mut self, requests_per_sec: f64) -> Self {
        self.options.rate_limit = requests_per_sec;
        self
    }

    /// Maximum link depth for website mode.
    #[must_use]
    pub fn max_depth(mut self, depth: u32) -> Self {
        self.options.max_depth = depth;
        self
    }

    /// Skip robots.txt checks entirely when `false`.
    #[must_use]
    pub fn respect_robots_txt(mut self, respect: bool) -> Self {
        self.options.respect_robots_txt = respect;
        self
    }

    /// Regex allow-list; an empty list allows everything.
    #[must_use]
    pub fn include_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.include_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Regex deny-list.
    #[must_use]
    pub fn exclude_patterns<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.exclude_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    /// Per-URL retry budget across transient failures and crashes.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.options.max_retries = retries;
        self
    }

    /// Crawl-wide deadline; the crawl fails with a timeout outcome when
    /// it fires.
    #[must_use]
    pub fn crawl_timeout(mut self, timeout: Duration) -> Self {
        self.options.crawl_timeout = Some(timeout);
        self
    }

    /// Per-fetch deadline.
    #[must_use]
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.options.fetch_timeout = timeout;
        self
    }

    /// User agent for fetches and robots evaluation.
    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.options.user_agent = user_agent.into();
        self
    }

    /// How long in-flight workers may run after cancellation or a
    /// deadline.
    #[must_use]
    pub fn grace_period(mut self, grace: Duration) -> Self {
        self.options.grace_period = grace;
        self
    }

    /// Crawler implementation to drive extraction.
    #[must_use]
    pub fn handler(mut self, handler: Arc<dyn CrawlHandler>) -> Self {
        self.options.handler = Some(handler);
        self
    }

    /// Retriever (or fallback chain) to fetch with.
    #[must_use]
    pub fn retriever(mut self, retriever: Arc<dyn Retriever>) -> Self {
        self.options.retriever = Some(retriever);
        self
    }

    /// Validate and produce the options.
    ///
    /// Fails on the first include/exclude pattern that does not
    /// compile. The orchestrator compiles the same patterns again at
    /// init; this early pass exists so misconfiguration surfaces before
    /// any network traffic.
    pub fn build(self) -> Result<CrawlOptions, CrawlError> {
        UrlFilter::compile(
            &self.options.include_patterns,
            &self.options.exclude_patterns,
        )?;
        Ok(self.options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_build() {
        let options = CrawlOptions::builder().build().unwrap();
        assert_eq!(options.max_workers(), 5);
        assert_eq!(options.max_depth(), 3);
        assert_eq!(options.max_retries(), 3);
        assert!(options.respect_robots_txt);
    }

    #[test]
    fn bad_pattern_fails_at_build_time() {
        let err = CrawlOptions::builder()
            .include_patterns(["[unclosed"])
            .build()
            .unwrap_err();
        assert!(matches!(err, CrawlError::InvalidPattern(_)));
    }

    #[test]
    fn zero_workers_clamps_to_one() {
        let options = CrawlOptions::builder().max_workers(0).build().unwrap();
        assert_eq!(options.max_workers(), 1);
    }
}
