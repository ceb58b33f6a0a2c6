//! Crawl statistics accumulation.
//!
//! A pure reducer: the orchestrator folds each per-URL outcome and each
//! filter decision into this value on its own task, so no counter needs
//! atomics. Derived figures (averages) are computed on read.

use std::collections::HashMap;

use serde::Serialize;

use super::frontier::FilterReason;
use super::handle::{UrlResult, UrlStatus};
use crate::error::ErrorKind;

/// Per-domain accumulator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DomainStats {
    pub crawled: u64,
    pub failed: u64,
    pub total_response_ms: u64,
}

impl DomainStats {
    /// Mean response time across this domain's finished fetches.
    #[must_use]
    pub fn avg_response_ms(&self) -> Option<f64> {
        let finished = self.crawled + self.failed;
        (finished > 0).then(|| self.total_response_ms as f64 / finished as f64)
    }
}

/// Counters and histograms for one crawl.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStats {
    /// URLs fetched and extracted successfully.
    pub crawled: u64,
    /// URLs that exhausted their retries without success. Robots
    /// rejections are not failures; they land in
    /// `urls_robots_blocked` instead.
    pub failed: u64,
    /// Raw links handed back by extractors, before any filtering.
    pub urls_discovered: u64,
    /// Candidates rejected before entering the frontier.
    pub urls_filtered: u64,
    /// URLs denied by robots.txt.
    pub urls_robots_blocked: u64,
    /// HTTP status histogram for responses that carried one.
    pub status_codes: HashMap<u16, u64>,
    /// Failure-kind histogram for everything that went wrong.
    pub error_kinds: HashMap<ErrorKind, u64>,
    /// Why candidates were filtered.
    pub filter_reasons: HashMap<FilterReason, u64>,
    /// Per-domain breakdown.
    pub per_domain: HashMap<String, DomainStats>,
    /// Wall-clock duration of the crawl, set at completion.
    pub duration_ms: u64,
}

impl CrawlStats {
    /// Fold one finished URL into the counters.
    pub(crate) fn record_outcome(&mut self, result: &UrlResult) {
        let domain = result.domain().unwrap_or_default();
        let per_domain = self.per_domain.entry(domain).or_default();
        per_domain.total_response_ms += result.response_time_ms;

        if let Some(status) = result.http_status {
            *self.status_codes.entry(status).or_default() += 1;
        }

        match result.status {
            UrlStatus::Ok => {
                self.crawled += 1;
                per_domain.crawled += 1;
            }
            UrlStatus::Failed => {
                if let Some(kind) = result.error_kind {
                    *self.error_kinds.entry(kind).or_default() += 1;
                    if kind == ErrorKind::RobotsBlocked {
                        self.urls_robots_blocked += 1;
                        return;
                    }
                }
                self.failed += 1;
                per_domain.failed += 1;
            }
        }
    }

    /// Count raw links an extractor returned.
    pub(crate) fn record_discovered(&mut self, count: usize) {
        self.urls_discovered += count as u64;
    }

    /// Count one candidate rejected before the frontier.
    pub(crate) fn record_filtered(&mut self, reason: FilterReason) {
        self.urls_filtered += 1;
        *self.filter_reasons.entry(reason).or_default() += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result(url: &str, status: u16, ms: u64) -> UrlResult {
        UrlResult {
            url: url.to_string(),
            status: UrlStatus::Ok,
            http_status: Some(status),
            extracted_data: None,
            discovered_urls: Vec::new(),
            error_kind: None,
            response_time_ms: ms,
            attempts: 1,
        }
    }

    fn failed_result(url: &str, kind: ErrorKind) -> UrlResult {
        UrlResult {
            url: url.to_string(),
            status: UrlStatus::Failed,
            http_status: None,
            extracted_data: None,
            discovered_urls: Vec::new(),
            error_kind: Some(kind),
            response_time_ms: 10,
            attempts: 1,
        }
    }

    #[test]
    fn success_and_failure_counters() {
        let mut stats = CrawlStats::default();
        stats.record_outcome(&ok_result("http://a.test/1", 200, 30));
        stats.record_outcome(&ok_result("http://a.test/2", 200, 50));
        stats.record_outcome(&failed_result("http://a.test/3", ErrorKind::Timeout));

        assert_eq!(stats.crawled, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.status_codes.get(&200), Some(&2));
        assert_eq!(stats.error_kinds.get(&ErrorKind::Timeout), Some(&1));

        let domain = stats.per_domain.get("a.test").unwrap();
        assert_eq!(domain.crawled, 2);
        assert_eq!(domain.failed, 1);
        assert_eq!(domain.total_response_ms, 90);
        assert_eq!(domain.avg_response_ms(), Some(30.0));
    }

    #[test]
    fn robots_blocked_is_not_a_failure() {
        let mut stats = CrawlStats::default();
        stats.record_outcome(&failed_result("http://a.test/p", ErrorKind::RobotsBlocked));
        assert_eq!(stats.failed, 0);
        assert_eq!(stats.urls_robots_blocked, 1);
        assert_eq!(stats.error_kinds.get(&ErrorKind::RobotsBlocked), Some(&1));
    }

    #[test]
    fn filter_accounting() {
        let mut stats = CrawlStats::default();
        stats.record_discovered(4);
        stats.record_filtered(FilterReason::CrossDomain);
        stats.record_filtered(FilterReason::CrossDomain);
        stats.record_filtered(FilterReason::InvalidUrl);

        assert_eq!(stats.urls_discovered, 4);
        assert_eq!(stats.urls_filtered, 3);
        assert_eq!(
            stats.filter_reasons.get(&FilterReason::CrossDomain),
            Some(&2)
        );
    }
}
