//! Error types for crawl operations.
//!
//! `FetchError` is the per-URL failure taxonomy reported by retrievers
//! and workers. `CrawlError` covers the hard conditions that abort a
//! whole crawl before it can produce partial results.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a single fetch or extraction attempt.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,
    /// Hostname resolution failed.
    #[error("dns resolution failed: {0}")]
    Dns(String),
    /// TCP/TLS connection could not be established or was reset.
    #[error("connection failed: {0}")]
    Connection(String),
    /// Server answered with a 4xx status other than 429.
    #[error("client error: HTTP {0}")]
    Http4xx(u16),
    /// Server answered with a 5xx status.
    #[error("server error: HTTP {0}")]
    Http5xx(u16),
    /// Server declared HTTP 429 or an equivalent throttle response.
    #[error("upstream rate limited")]
    RateLimitedUpstream,
    /// Document or extractor could not make sense of the response.
    #[error("parse failed: {0}")]
    Parse(String),
}

impl FetchError {
    /// Classify a reqwest transport error into the taxonomy.
    ///
    /// Status-bearing responses are classified separately via
    /// [`FetchError::from_status`]; this only sees errors raised before
    /// a status line arrived.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::Timeout;
        }
        // reqwest does not expose DNS failures as a variant, so sniff the
        // source chain the same way failures are classified elsewhere.
        let msg = format!("{err:#?}").to_lowercase();
        if msg.contains("dns") || msg.contains("resolve") || msg.contains("name or service") {
            return Self::Dns(err.to_string());
        }
        if err.is_connect() {
            return Self::Connection(err.to_string());
        }
        if err.is_decode() || err.is_body() {
            return Self::Parse(err.to_string());
        }
        Self::Connection(err.to_string())
    }

    /// Classify a non-success HTTP status. Returns `None` for 2xx/3xx.
    #[must_use]
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            429 => Some(Self::RateLimitedUpstream),
            400..=499 => Some(Self::Http4xx(status)),
            500..=599 => Some(Self::Http5xx(status)),
            _ => None,
        }
    }

    /// Histogram key for this failure.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::Timeout,
            Self::Dns(_) => ErrorKind::Dns,
            Self::Connection(_) => ErrorKind::Connection,
            Self::Http4xx(_) => ErrorKind::Http4xx,
            Self::Http5xx(_) => ErrorKind::Http5xx,
            Self::RateLimitedUpstream => ErrorKind::RateLimitedUpstream,
            Self::Parse(_) => ErrorKind::Parse,
        }
    }

    /// HTTP status carried by this failure, when one arrived.
    #[must_use]
    pub const fn http_status(&self) -> Option<u16> {
        match self {
            Self::Http4xx(s) | Self::Http5xx(s) => Some(*s),
            Self::RateLimitedUpstream => Some(429),
            _ => None,
        }
    }
}

/// Sub-categorization of per-URL outcomes, used as a histogram key.
///
/// Extends the fetch taxonomy with the two failure sources that do not
/// come from a retriever: robots denial and worker crashes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Dns,
    Connection,
    Http4xx,
    Http5xx,
    RateLimitedUpstream,
    Parse,
    RobotsBlocked,
    WorkerCrash,
}

impl ErrorKind {
    /// Stable string form used in logs and serialized stats.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connection => "connection",
            Self::Http4xx => "http_4xx",
            Self::Http5xx => "http_5xx",
            Self::RateLimitedUpstream => "rate_limited_upstream",
            Self::Parse => "parse",
            Self::RobotsBlocked => "robots_blocked",
            Self::WorkerCrash => "worker_crash",
        }
    }

    /// Whether a failure of this kind should be retried.
    ///
    /// Network-layer failures and 5xx/429 responses are usually
    /// transient. Client errors and parse failures are permanent, and a
    /// worker crash is retried so a flaky extractor cannot lose a URL.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout
            | Self::Dns
            | Self::Connection
            | Self::Http5xx
            | Self::RateLimitedUpstream
            | Self::WorkerCrash => true,
            Self::Http4xx | Self::Parse | Self::RobotsBlocked => false,
        }
    }

    /// Backoff multiplier for retries of this kind.
    ///
    /// Upstream throttling gets a much longer backoff than ordinary
    /// transient failures.
    #[must_use]
    pub const fn delay_multiplier(&self) -> f64 {
        match self {
            Self::RateLimitedUpstream => 3.0,
            Self::WorkerCrash => 1.5,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A regex filter pattern that failed to compile.
///
/// Reported for the first failing pattern so callers can surface the
/// exact offending string.
#[derive(Debug, Clone, Error)]
#[error("invalid pattern `{pattern}`: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

/// A URL that could not be brought into canonical form.
#[derive(Debug, Clone, Error)]
#[error("invalid url `{input}`: {reason}")]
pub struct InvalidUrl {
    pub input: String,
    pub reason: String,
}

/// Hard conditions that abort a crawl outright.
///
/// Everything else is partial-result territory: a crawl with any
/// successful fetch returns a report even when some URLs failed.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// None of the provided seeds survived normalization.
    #[error("no valid seed urls ({0})")]
    NoValidSeeds(String),
    /// An include/exclude pattern failed to compile.
    #[error(transparent)]
    InvalidPattern(#[from] PatternError),
    /// A fallback chain was configured with zero retrievers.
    #[error("retriever chain is empty")]
    EmptyRetrieverChain,
    /// Sitemap discovery produced no seed URLs.
    #[error("no sitemap urls discovered for {0}")]
    EmptySitemap(String),
    /// The crawl was cancelled before any fetch succeeded.
    #[error("crawl cancelled before any successful fetch")]
    CancelledBeforeResults,
    /// The crawl task itself died; carries the join failure.
    #[error("crawl task failed: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(matches!(
            FetchError::from_status(429),
            Some(FetchError::RateLimitedUpstream)
        ));
        assert!(matches!(
            FetchError::from_status(404),
            Some(FetchError::Http4xx(404))
        ));
        assert!(matches!(
            FetchError::from_status(503),
            Some(FetchError::Http5xx(503))
        ));
        assert!(FetchError::from_status(200).is_none());
        assert!(FetchError::from_status(301).is_none());
    }

    #[test]
    fn retryability() {
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Http5xx.is_retryable());
        assert!(ErrorKind::RateLimitedUpstream.is_retryable());
        assert!(ErrorKind::WorkerCrash.is_retryable());
        assert!(!ErrorKind::Http4xx.is_retryable());
        assert!(!ErrorKind::Parse.is_retryable());
        assert!(!ErrorKind::RobotsBlocked.is_retryable());
    }

    #[test]
    fn rate_limit_backoff_is_longest() {
        assert!(
            ErrorKind::RateLimitedUpstream.delay_multiplier()
                > ErrorKind::Timeout.delay_multiplier()
        );
    }
}
