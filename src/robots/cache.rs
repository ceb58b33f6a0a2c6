//! Cached robots.txt lookups, shared process-wide.
//!
//! One entry per origin, TTL-expired. Reads are cheap and concurrent;
//! a cold origin is fetched exactly once no matter how many workers ask
//! at the same moment, and a fetch in progress for one origin never
//! blocks lookups for any other.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::{debug, warn};
use url::Url;

use super::parser::RobotsRules;
use crate::utils::constants::{ROBOTS_FETCH_TIMEOUT_SECS, ROBOTS_TTL_SECS};

#[derive(Clone)]
struct CachedRules {
    rules: Arc<RobotsRules>,
    fetched_at: Instant,
}

/// Per-origin cache slot.
///
/// The `RwLock` makes the hot read path a cheap shared lock; the tokio
/// `Mutex` is a single-flight guard so concurrent cold lookups for the
/// same origin coalesce into one fetch while other origins proceed
/// untouched.
struct OriginEntry {
    cached: parking_lot::RwLock<Option<CachedRules>>,
    fetch_guard: tokio::sync::Mutex<()>,
}

impl OriginEntry {
    fn new() -> Self {
        Self {
            cached: parking_lot::RwLock::new(None),
            fetch_guard: tokio::sync::Mutex::new(()),
        }
    }

    fn fresh(&self, ttl: Duration) -> Option<Arc<RobotsRules>> {
        self.cached
            .read()
            .as_ref()
            .filter(|c| c.fetched_at.elapsed() <= ttl)
            .map(|c| Arc::clone(&c.rules))
    }

    fn store(&self, rules: Arc<RobotsRules>) {
        *self.cached.write() = Some(CachedRules {
            rules,
            fetched_at: Instant::now(),
        });
    }
}

/// Process-wide robots.txt cache.
///
/// Lives for the application; all crawls and workers share it. A
/// failed fetch installs a permissive ruleset for the normal TTL so a
/// broken origin does not trigger a fetch storm.
pub struct RobotsCache {
    entries: DashMap<String, Arc<OriginEntry>>,
    client: reqwest::Client,
    ttl: Duration,
}

impl Default for RobotsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl RobotsCache {
    /// New cache with the standard TTL.
    #[must_use]
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(ROBOTS_TTL_SECS))
    }

    /// New cache with a custom TTL (test isolation helper).
    #[must_use]
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            client: reqwest::Client::default(),
            ttl,
        }
    }

    /// Whether `user_agent` may fetch `url` per the origin's robots.txt.
    ///
    /// Fetches and caches the origin's rules on first sight or after TTL
    /// expiry.
    pub async fn allowed(&self, user_agent: &str, url: &Url) -> bool {
        let rules = self.rules_for(user_agent, url).await;
        let path = match url.query() {
            Some(q) => format!("{}?{}", url.path(), q),
            None => url.path().to_string(),
        };
        rules.allowed(user_agent, &path)
    }

    /// `Crawl-delay` declared for `user_agent` at this URL's origin.
    ///
    /// Advisory only; the token bucket is the enforced rate control.
    pub async fn crawl_delay(&self, user_agent: &str, url: &Url) -> Option<f64> {
        self.rules_for(user_agent, url).await.crawl_delay(user_agent)
    }

    /// `Sitemap:` directives declared at this URL's origin.
    pub async fn sitemaps(&self, user_agent: &str, url: &Url) -> Vec<String> {
        self.rules_for(user_agent, url).await.sitemaps().to_vec()
    }

    /// Drop every cached origin (test isolation helper).
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of origins currently cached.
    #[must_use]
    pub fn cached_origins(&self) -> usize {
        self.entries.len()
    }

    async fn rules_for(&self, user_agent: &str, url: &Url) -> Arc<RobotsRules> {
        let origin = url.origin().ascii_serialization();
        // Clone the slot out of the map immediately so no shard lock is
        // held across the await points below.
        let entry = Arc::clone(
            self.entries
                .entry(origin.clone())
                .or_insert_with(|| Arc::new(OriginEntry::new()))
                .value(),
        );

        if let Some(rules) = entry.fresh(self.ttl) {
            return rules;
        }

        let _guard = entry.fetch_guard.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(rules) = entry.fresh(self.ttl) {
            return rules;
        }

        let rules = Arc::new(self.fetch_rules(user_agent, url, &origin).await);
        entry.store(Arc::clone(&rules));
        rules
    }

    async fn fetch_rules(&self, user_agent: &str, url: &Url, origin: &str) -> RobotsRules {
        let mut robots_url = url.clone();
        robots_url.set_path("/robots.txt");
        robots_url.set_query(None);
        robots_url.set_fragment(None);

        debug!("fetching robots.txt for {origin}");
        let response = self
            .client
            .get(robots_url.clone())
            .header(reqwest::header::USER_AGENT, user_agent)
            .timeout(Duration::from_secs(ROBOTS_FETCH_TIMEOUT_SECS))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => RobotsRules::parse(&body),
                Err(e) => {
                    warn!("robots.txt body read failed for {origin}: {e}; allowing all");
                    RobotsRules::allow_all()
                }
            },
            Ok(resp) => {
                debug!(
                    "robots.txt for {origin} returned HTTP {}; allowing all",
                    resp.status()
                );
                RobotsRules::allow_all()
            }
            Err(e) => {
                warn!("robots.txt fetch failed for {origin}: {e}; allowing all");
                RobotsRules::allow_all()
            }
        }
    }
}
