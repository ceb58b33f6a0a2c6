//! Time-ordered retry scheduling for transient failures.
//!
//! Failed-but-retryable URLs wait out an exponential backoff here
//! instead of going straight back into the frontier. Pending retries
//! count against crawl completion: the crawl is not done while any URL
//! is waiting its turn.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use super::frontier::FrontierEntry;
use crate::utils::constants::{RETRY_BASE_DELAY_MS, RETRY_JITTER_PERCENT, RETRY_MAX_DELAY_MS};

/// Exponential backoff with jitter for retry attempt `attempt` (1-based).
///
/// `base * 2^(attempt-1) * multiplier * (1 ± jitter)`, capped. The
/// jitter keeps a burst of same-instant failures from retrying in
/// lockstep.
pub(crate) fn retry_backoff(attempt: u32, multiplier: f64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(5);
    let exp_delay = RETRY_BASE_DELAY_MS.saturating_mul(1 << exponent);
    let adjusted = (exp_delay as f64 * multiplier) as u64;
    let jitter = rand::rng().random_range(-RETRY_JITTER_PERCENT..=RETRY_JITTER_PERCENT);
    let jittered = (adjusted as f64 * (1.0 + jitter)) as u64;
    Duration::from_millis(jittered.min(RETRY_MAX_DELAY_MS))
}

/// Entries waiting out their backoff, in no particular order.
///
/// The set stays small (bounded by in-flight failures), so linear scans
/// beat a heap in practice.
pub(crate) struct RetrySchedule {
    pending: Vec<(Instant, FrontierEntry)>,
}

impl RetrySchedule {
    pub(crate) fn new() -> Self {
        Self {
            pending: Vec::new(),
        }
    }

    /// Hold an entry back until `delay` has elapsed.
    pub(crate) fn schedule(&mut self, entry: FrontierEntry, delay: Duration) {
        self.pending.push((Instant::now() + delay, entry));
    }

    /// Earliest wake-up among pending retries.
    pub(crate) fn next_ready_at(&self) -> Option<Instant> {
        self.pending.iter().map(|(at, _)| *at).min()
    }

    /// Remove and return every entry whose delay has elapsed.
    pub(crate) fn drain_ready(&mut self) -> Vec<FrontierEntry> {
        let now = Instant::now();
        let mut ready = Vec::new();
        let mut i = 0;
        while i < self.pending.len() {
            if self.pending[i].0 <= now {
                ready.push(self.pending.swap_remove(i).1);
            } else {
                i += 1;
            }
        }
        ready
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn entry() -> FrontierEntry {
        FrontierEntry::seed(Url::parse("http://a.test/").unwrap())
    }

    #[test]
    fn backoff_grows_and_caps() {
        for _ in 0..20 {
            let first = retry_backoff(1, 1.0);
            assert!(first >= Duration::from_millis(800));
            assert!(first <= Duration::from_millis(1200));

            let third = retry_backoff(3, 1.0);
            assert!(third >= Duration::from_millis(3200));
            assert!(third <= Duration::from_millis(4800));

            // Deep attempts with a big multiplier hit the cap.
            let capped = retry_backoff(10, 3.0);
            assert!(capped <= Duration::from_millis(RETRY_MAX_DELAY_MS));
        }
    }

    #[test]
    fn rate_limited_backoff_outlasts_plain_backoff() {
        let plain = retry_backoff(2, 1.0);
        let throttled = retry_backoff(2, 3.0);
        // Worst-case jitter cannot close a 3x gap.
        assert!(throttled > plain);
    }

    #[tokio::test(start_paused = true)]
    async fn drain_respects_deadlines() {
        let mut schedule = RetrySchedule::new();
        schedule.schedule(entry(), Duration::from_secs(1));
        schedule.schedule(entry(), Duration::from_secs(10));

        assert!(schedule.drain_ready().is_empty());
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(schedule.drain_ready().len(), 1);
        assert_eq!(schedule.len(), 1);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(schedule.drain_ready().len(), 1);
        assert!(schedule.is_empty());
    }
}
