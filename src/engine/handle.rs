//! Crawl results, reports, and the detached-execution handle.

use serde::Serialize;
use tokio::sync::watch;
use url::Url;

use super::stats::CrawlStats;
use crate::error::{CrawlError, ErrorKind};

/// Lifecycle of a crawl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    /// Seeds are being normalized and admitted.
    Initializing,
    /// Workers are dispatching and reporting.
    Running,
    /// No new dispatches; waiting on in-flight workers.
    Draining,
    /// Frontier, workers, and retries all drained.
    Completed,
    /// The crawl-wide deadline fired.
    Failed,
    /// `cancel()` was observed.
    Cancelled,
}

/// How a finished crawl ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlOutcome {
    Completed,
    Cancelled,
    TimedOut,
}

/// Per-URL verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlStatus {
    Ok,
    Failed,
}

/// The result record for one URL.
#[derive(Debug, Clone, Serialize)]
pub struct UrlResult {
    /// Normalized URL this record is about.
    pub url: String,
    /// Overall verdict.
    pub status: UrlStatus,
    /// HTTP status, when a response arrived.
    pub http_status: Option<u16>,
    /// Whatever the handler's `extract_data` returned.
    pub extracted_data: Option<serde_json::Value>,
    /// Raw links the handler's `extract_urls` returned, pre-filtering.
    pub discovered_urls: Vec<String>,
    /// Failure classification for failed URLs.
    pub error_kind: Option<ErrorKind>,
    /// Fetch-to-extraction wall time.
    pub response_time_ms: u64,
    /// How many dispatch attempts this URL consumed.
    pub attempts: u32,
}

impl UrlResult {
    /// Lowercased host of the record's URL.
    #[must_use]
    pub fn domain(&self) -> Option<String> {
        Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
    }

    /// True for `Ok` records.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.status == UrlStatus::Ok
    }
}

/// Everything a finished crawl hands back.
///
/// Partial results are the norm: a crawl that fetched anything at all
/// reports `Ok` with whatever succeeded, even when other URLs failed or
/// the crawl was cancelled midway.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub outcome: CrawlOutcome,
    pub results: Vec<UrlResult>,
    pub stats: CrawlStats,
}

/// Handle to a crawl started detached via [`crate::Crawler::start`].
pub struct CrawlHandle {
    pub(crate) cancel_tx: watch::Sender<bool>,
    pub(crate) state_rx: watch::Receiver<CrawlState>,
    pub(crate) join: tokio::task::JoinHandle<Result<CrawlReport, CrawlError>>,
}

impl CrawlHandle {
    /// Request cancellation.
    ///
    /// Cooperative: no new workers are dispatched, in-flight workers get
    /// the configured grace period, and the report keeps everything
    /// finished before the cancel.
    pub fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> CrawlState {
        *self.state_rx.borrow()
    }

    /// Wait for the crawl to finish and take its report.
    pub async fn join(self) -> Result<CrawlReport, CrawlError> {
        self.join
            .await
            .map_err(|e| CrawlError::Internal(e.to_string()))?
    }
}

impl std::fmt::Debug for CrawlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrawlHandle")
            .field("state", &self.state())
            .finish()
    }
}
