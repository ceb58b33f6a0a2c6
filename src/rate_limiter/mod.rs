//! Per-domain token-bucket rate limiting.
//!
//! Lock-free limiter: a `DashMap` holds one bucket per domain, and each
//! bucket packs its whole mutable state (tokens plus last-refill
//! timestamp) into a single `AtomicU64` updated by compare-and-swap.
//! There is no central serialization point; token decisions for
//! unrelated domains never contend, and decisions for the same domain
//! contend only on the CAS retry loop.
//!
//! Refill is lazy: tokens accrue on access from the elapsed time since
//! the last refill, capped at bucket capacity. Fixed-point arithmetic
//! (1000 units per token) keeps sub-token precision without floats in
//! the atomic path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;

use crate::utils::constants::{
    BUCKET_IDLE_SECS, DEFAULT_BUCKET_CAPACITY, DEFAULT_RATE_LIMIT_RPS, HOUSEKEEPING_INTERVAL_SECS,
};

/// Fixed-point scale: 1000 bucket units per token.
const TOKEN_SCALE: u64 = 1000;

/// Pack bucket state into a single u64 for atomic updates.
/// Layout: [tokens_scaled (upper 32 bits)] [last_refill_millis (lower 32 bits)]
#[inline(always)]
fn pack_state(tokens_scaled: u32, last_refill_ms: u32) -> u64 {
    (u64::from(tokens_scaled) << 32) | u64::from(last_refill_ms)
}

/// Unpack bucket state from its atomic representation.
#[inline(always)]
fn unpack_state(packed: u64) -> (u32, u32) {
    ((packed >> 32) as u32, (packed & 0xFFFF_FFFF) as u32)
}

/// Outcome of a token request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// A token was consumed; the request may proceed.
    Allow,
    /// No token available; retry no sooner than `retry_after`.
    Deny { retry_after: Duration },
}

impl RateLimitDecision {
    /// True when a token was granted.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }
}

/// Capacity and refill rate for one domain's bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainLimit {
    /// Maximum tokens the bucket can hold (burst size).
    pub capacity: f64,
    /// Tokens added per second.
    pub rate_per_sec: f64,
}

impl Default for DomainLimit {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUCKET_CAPACITY,
            rate_per_sec: DEFAULT_RATE_LIMIT_RPS,
        }
    }
}

/// One domain's token bucket.
///
/// Cache-line aligned so concurrently accessed buckets never share a
/// line and CAS traffic on one domain cannot slow down another.
#[repr(C, align(64))]
#[derive(Debug)]
struct Bucket {
    /// Packed state, see `pack_state`. CAS-updated, never locked.
    state: AtomicU64,
    /// Capacity in scaled units.
    capacity_scaled: u32,
    /// Refill rate in scaled units per second.
    rate_scaled_per_sec: u32,
}

impl Bucket {
    fn new(limit: DomainLimit, now_ms: u32) -> Self {
        let capacity_scaled = (limit.capacity.max(1.0) * TOKEN_SCALE as f64) as u32;
        let rate_scaled_per_sec = (limit.rate_per_sec.max(0.001) * TOKEN_SCALE as f64) as u32;
        Self {
            // A fresh bucket starts full.
            state: AtomicU64::new(pack_state(capacity_scaled, now_ms)),
            capacity_scaled,
            rate_scaled_per_sec,
        }
    }

    /// Refill from elapsed time, then try to deduct one token.
    fn try_consume(&self, now_ms: u32) -> RateLimitDecision {
        let mut current = self.state.load(Ordering::Relaxed);
        loop {
            let (tokens, last_refill) = unpack_state(current);

            // Lazy refill. The timestamp only advances by the time that
            // actually produced whole scaled units, preserving fractional
            // accrual for the next caller.
            let elapsed_ms = now_ms.wrapping_sub(last_refill);
            let earned = (u64::from(elapsed_ms) * u64::from(self.rate_scaled_per_sec)) / 1000;
            let credited_ms = if self.rate_scaled_per_sec > 0 {
                ((earned * 1000) / u64::from(self.rate_scaled_per_sec)) as u32
            } else {
                0
            };
            let refilled = u64::from(tokens)
                .saturating_add(earned)
                .min(u64::from(self.capacity_scaled)) as u32;
            let new_last_refill = last_refill.wrapping_add(credited_ms);

            if u64::from(refilled) < TOKEN_SCALE {
                // Not enough even after refill; report how long a full
                // token takes to accrue from here.
                let deficit = TOKEN_SCALE - u64::from(refilled);
                let wait_ms = if self.rate_scaled_per_sec > 0 {
                    (deficit * 1000).div_ceil(u64::from(self.rate_scaled_per_sec))
                } else {
                    1000
                };
                return RateLimitDecision::Deny {
                    retry_after: Duration::from_millis(wait_ms.max(1)),
                };
            }

            let new_state = pack_state(refilled - TOKEN_SCALE as u32, new_last_refill);
            // AcqRel on success synchronizes the bucket with concurrent
            // consumers; Relaxed on failure because the Err value already
            // hands back the fresh state for the retry.
            match self.state.compare_exchange_weak(
                current,
                new_state,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return RateLimitDecision::Allow,
                Err(actual) => {
                    current = actual;
                    std::hint::spin_loop();
                }
            }
        }
    }

    /// Milliseconds since this bucket was last refilled, as of `now_ms`.
    fn idle_ms(&self, now_ms: u32) -> u32 {
        let (_, last_refill) = unpack_state(self.state.load(Ordering::Relaxed));
        now_ms.wrapping_sub(last_refill)
    }
}

/// Process-wide per-domain rate limiter.
///
/// Shared across all crawls and workers. The refill rate travels with
/// each call (a bucket adopts the first rate it is created with), so
/// crawls with different configured rates share one limiter without a
/// handshake. Every crawl run through one [`crate::Crawler`] shares its
/// limiter; separate instances exist for test isolation.
pub struct RateLimiter {
    buckets: DashMap<String, Arc<Bucket>>,
    overrides: DashMap<String, DomainLimit>,
    /// Burst capacity used when a bucket is created without an override.
    default_capacity: f64,
    /// Base for all millisecond timestamps in this instance.
    base: Instant,
    housekeeping_started: AtomicBool,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    /// New limiter with the default burst capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUCKET_CAPACITY)
    }

    /// New limiter with a custom burst capacity for new buckets.
    #[must_use]
    pub fn with_capacity(default_capacity: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            overrides: DashMap::new(),
            default_capacity,
            base: Instant::now(),
            housekeeping_started: AtomicBool::new(false),
        }
    }

    fn now_ms(&self) -> u32 {
        // Wrapping is harmless: idle buckets are purged long before the
        // 32-bit millisecond counter comes back around.
        self.base.elapsed().as_millis() as u32
    }

    /// Install a per-domain limit override.
    ///
    /// Replaces any existing bucket so the new limit takes effect
    /// immediately rather than on the next bucket rebuild.
    pub fn set_domain_limit(&self, domain: &str, limit: DomainLimit) {
        let domain = domain.to_lowercase();
        self.overrides.insert(domain.clone(), limit);
        self.buckets
            .insert(domain, Arc::new(Bucket::new(limit, self.now_ms())));
    }

    fn limit_for(&self, domain: &str, rate_per_sec: f64) -> DomainLimit {
        self.overrides
            .get(domain)
            .map_or(
                DomainLimit {
                    capacity: self.default_capacity,
                    rate_per_sec,
                },
                |r| *r.value(),
            )
    }

    /// Attempt to consume one token for a domain.
    ///
    /// `rate_per_sec` is used when the domain's bucket does not exist
    /// yet; a per-domain override installed via
    /// [`RateLimiter::set_domain_limit`] always wins. On first sight of
    /// a domain a full bucket is created, so the first request always
    /// passes. Wait-free apart from the CAS retry loop.
    pub fn try_consume(&self, domain: &str, rate_per_sec: f64) -> RateLimitDecision {
        if rate_per_sec <= 0.0 {
            return RateLimitDecision::Allow;
        }
        let domain = domain.to_lowercase();
        let now_ms = self.now_ms();
        // Clone the Arc out of the map entry before touching the bucket
        // so no shard lock is held across the CAS loop.
        let bucket = Arc::clone(
            self.buckets
                .entry(domain.clone())
                .or_insert_with(|| {
                    Arc::new(Bucket::new(self.limit_for(&domain, rate_per_sec), now_ms))
                })
                .value(),
        );
        bucket.try_consume(now_ms)
    }

    /// Drop buckets that have not refilled within `max_idle`.
    ///
    /// Returns the number of buckets removed.
    pub fn purge_idle(&self, max_idle: Duration) -> usize {
        let now_ms = self.now_ms();
        let max_idle_ms = max_idle.as_millis() as u32;
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.idle_ms(now_ms) < max_idle_ms);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!("rate limiter housekeeping dropped {removed} idle buckets");
        }
        removed
    }

    /// Spawn the periodic housekeeping task, once per instance.
    ///
    /// Must be called from within a tokio runtime. Subsequent calls are
    /// no-ops.
    pub fn ensure_housekeeping(self: &Arc<Self>) {
        if self
            .housekeeping_started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(HOUSEKEEPING_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                limiter.purge_idle(Duration::from_secs(BUCKET_IDLE_SECS));
            }
        });
    }

    /// Number of domains currently holding a bucket.
    #[must_use]
    pub fn tracked_domains(&self) -> usize {
        self.buckets.len()
    }

    /// Drop all buckets (test isolation helper).
    pub fn clear(&self) {
        self.buckets.clear();
        self.overrides.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sight_creates_full_bucket() {
        let rl = RateLimiter::with_capacity(3.0);
        assert!(rl.try_consume("a.test", 1.0).is_allowed());
        assert!(rl.try_consume("a.test", 1.0).is_allowed());
        assert!(rl.try_consume("a.test", 1.0).is_allowed());
        assert!(matches!(
            rl.try_consume("a.test", 1.0),
            RateLimitDecision::Deny { .. }
        ));
    }

    #[test]
    fn domains_are_independent() {
        let rl = RateLimiter::with_capacity(1.0);
        assert!(rl.try_consume("a.test", 1.0).is_allowed());
        assert!(rl.try_consume("b.test", 1.0).is_allowed());
        assert!(!rl.try_consume("a.test", 1.0).is_allowed());
        assert!(!rl.try_consume("b.test", 1.0).is_allowed());
    }

    #[test]
    fn zero_or_negative_rate_disables_limiting() {
        let rl = RateLimiter::with_capacity(1.0);
        assert!(rl.try_consume("a.test", 0.0).is_allowed());
        assert!(rl.try_consume("a.test", -1.0).is_allowed());
        assert_eq!(rl.tracked_domains(), 0);
    }

    #[test]
    fn deny_reports_positive_wait() {
        let rl = RateLimiter::with_capacity(1.0);
        assert!(rl.try_consume("a.test", 2.0).is_allowed());
        match rl.try_consume("a.test", 2.0) {
            RateLimitDecision::Deny { retry_after } => {
                assert!(retry_after > Duration::ZERO);
                // One token at 2 tokens/s takes at most 500ms.
                assert!(retry_after <= Duration::from_millis(500));
            }
            RateLimitDecision::Allow => panic!("expected denial"),
        }
    }

    #[test]
    fn refill_restores_tokens() {
        let rl = RateLimiter::with_capacity(1.0);
        assert!(rl.try_consume("a.test", 1000.0).is_allowed());
        assert!(!rl.try_consume("a.test", 1000.0).is_allowed());
        // At 1000 tokens/s a couple of milliseconds is a full token.
        std::thread::sleep(Duration::from_millis(5));
        assert!(rl.try_consume("a.test", 1000.0).is_allowed());
    }

    #[test]
    fn domain_case_is_folded() {
        let rl = RateLimiter::with_capacity(1.0);
        assert!(rl.try_consume("A.Test", 1.0).is_allowed());
        assert!(!rl.try_consume("a.test", 1.0).is_allowed());
    }

    #[test]
    fn override_beats_caller_rate() {
        let rl = RateLimiter::with_capacity(1.0);
        rl.set_domain_limit(
            "big.test",
            DomainLimit {
                capacity: 5.0,
                rate_per_sec: 1.0,
            },
        );
        for _ in 0..5 {
            assert!(rl.try_consume("big.test", 1.0).is_allowed());
        }
        assert!(!rl.try_consume("big.test", 1.0).is_allowed());
        // Unrelated domain still uses the default single-token bucket.
        assert!(rl.try_consume("small.test", 1.0).is_allowed());
        assert!(!rl.try_consume("small.test", 1.0).is_allowed());
    }

    #[test]
    fn bucket_keeps_its_creation_rate() {
        let rl = RateLimiter::with_capacity(1.0);
        assert!(rl.try_consume("a.test", 1000.0).is_allowed());
        // A later caller with a slower rate reuses the existing bucket.
        std::thread::sleep(Duration::from_millis(5));
        assert!(rl.try_consume("a.test", 0.001).is_allowed());
    }

    #[test]
    fn purge_drops_only_idle_buckets() {
        let rl = RateLimiter::with_capacity(1.0);
        rl.try_consume("a.test", 1.0);
        assert_eq!(rl.tracked_domains(), 1);
        assert_eq!(rl.purge_idle(Duration::from_secs(3600)), 0);
        assert_eq!(rl.purge_idle(Duration::ZERO), 1);
        assert_eq!(rl.tracked_domains(), 0);
    }

    #[test]
    fn concurrent_consumption_grants_exactly_capacity() {
        let rl = Arc::new(RateLimiter::with_capacity(8.0));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let rl = Arc::clone(&rl);
            handles.push(std::thread::spawn(move || {
                let mut granted = 0u32;
                for _ in 0..10 {
                    if rl.try_consume("hot.test", 0.001).is_allowed() {
                        granted += 1;
                    }
                }
                granted
            }));
        }
        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // 8 tokens of burst capacity, negligible refill during the test.
        assert_eq!(total, 8);
    }
}
