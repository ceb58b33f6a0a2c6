//! Shared configuration constants for trawler
//!
//! This module contains default values and configuration constants used
//! throughout the codebase to ensure consistency and avoid magic numbers.

/// Default user agent sent with every fetch unless overridden.
pub const DEFAULT_USER_AGENT: &str = "TrawlerBot/0.1";

/// Default number of concurrently in-flight URLs per crawl.
///
/// Small enough to stay polite against a single origin, large enough to
/// keep several domains busy. Users can raise it via `max_workers` when
/// crawling many distinct hosts.
pub const DEFAULT_MAX_WORKERS: usize = 5;

/// Default per-domain refill rate: 1 request per second.
///
/// Conservative rate that respects server resources. Increase for fast
/// servers or local testing, decrease for slow or rate-limited origins.
pub const DEFAULT_RATE_LIMIT_RPS: f64 = 1.0;

/// Default token bucket capacity per domain.
///
/// Allows a short burst of up to this many requests against a domain
/// before the refill rate becomes the limiting factor.
pub const DEFAULT_BUCKET_CAPACITY: f64 = 10.0;

/// Default maximum crawl depth for website mode: 3 link hops from the seed.
pub const DEFAULT_MAX_DEPTH: u32 = 3;

/// Default per-URL retry budget across transient failures and worker crashes.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-fetch timeout in seconds.
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// How long a cached robots.txt ruleset stays fresh.
///
/// An entry older than this is treated as absent and refetched on the
/// next lookup. Failed fetches are cached permissively for the same
/// duration to avoid fetch storms against broken origins.
pub const ROBOTS_TTL_SECS: u64 = 3600;

/// Timeout for robots.txt and sitemap fetches, which should be quick.
pub const ROBOTS_FETCH_TIMEOUT_SECS: u64 = 10;

/// Rate-limiter buckets idle longer than this are dropped by housekeeping.
pub const BUCKET_IDLE_SECS: u64 = 3600;

/// How often rate-limiter housekeeping runs.
pub const HOUSEKEEPING_INTERVAL_SECS: u64 = 600;

/// Maximum sitemap-index nesting depth.
///
/// Bounds recursion when a sitemap index points at further indexes.
pub const MAX_SITEMAP_DEPTH: usize = 3;

/// Cap on URLs harvested from sitemaps for a single crawl.
pub const MAX_SITEMAP_URLS: usize = 100_000;

/// Base delay for exponential retry backoff.
pub const RETRY_BASE_DELAY_MS: u64 = 1000;

/// Cap on a single retry backoff delay.
pub const RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Jitter applied to retry backoff: plus or minus 20 percent.
pub const RETRY_JITTER_PERCENT: f64 = 0.2;

/// How long in-flight workers get to finish after cancellation or a
/// crawl-wide deadline before the orchestrator stops waiting on them.
pub const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;
