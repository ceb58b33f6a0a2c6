//! The URL frontier and visited set.
//!
//! The frontier is a FIFO of pending entries owned by the orchestrator.
//! The visited set is a concurrent `DashSet` whose atomic
//! insert-if-absent is the single primitive guaranteeing a URL is
//! dispatched at most once per crawl: only the caller that performed
//! the absent-to-present transition gets to enqueue.

use std::collections::VecDeque;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use url::Url;

/// One pending URL in the frontier.
#[derive(Debug, Clone)]
pub struct FrontierEntry {
    /// Normalized URL; the frontier never holds raw input.
    pub url: Url,
    /// Link hops from the seed, 0 for seeds.
    pub depth: u32,
    /// Page this URL was discovered on. Kept for diagnostics and the
    /// `Referer` header.
    pub source: Option<Url>,
    /// Delivery attempts so far, bumped on retry and crash requeue.
    pub attempts: u32,
}

impl FrontierEntry {
    /// A depth-0 entry with no source, as seeds enter the frontier.
    #[must_use]
    pub fn seed(url: Url) -> Self {
        Self {
            url,
            depth: 0,
            source: None,
            attempts: 0,
        }
    }
}

/// Why a candidate URL never made it into the frontier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterReason {
    /// Not an absolute http(s) URL.
    InvalidUrl,
    /// Outside the crawl's root domain in website mode.
    CrossDomain,
    /// Rejected by the include/exclude patterns.
    Pattern,
    /// Deeper than `max_depth`.
    Depth,
    /// Already admitted earlier in this crawl.
    AlreadyVisited,
    /// Vetoed by the handler's `should_crawl`.
    HandlerRejected,
}

impl FilterReason {
    /// Stable string form used in logs and serialized stats.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::CrossDomain => "cross_domain",
            Self::Pattern => "pattern",
            Self::Depth => "depth",
            Self::AlreadyVisited => "already_visited",
            Self::HandlerRejected => "handler_rejected",
        }
    }
}

impl std::fmt::Display for FilterReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FIFO frontier plus the crawl's visited set.
pub(crate) struct Frontier {
    queue: VecDeque<FrontierEntry>,
    visited: DashSet<String>,
}

impl Frontier {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            visited: DashSet::new(),
        }
    }

    /// Admit an entry if its URL has never been seen in this crawl.
    ///
    /// `DashSet::insert` returns true only for the caller that moved
    /// the URL from absent to present, so exactly one of N concurrent
    /// admissions for the same URL enqueues it.
    pub(crate) fn try_admit(&mut self, entry: FrontierEntry) -> bool {
        if !self.visited.insert(entry.url.as_str().to_string()) {
            return false;
        }
        self.queue.push_back(entry);
        true
    }

    /// Put an entry back at the head, bypassing the visited gate.
    ///
    /// Used when a worker crashed holding the entry: the URL is already
    /// in the visited set and must go out again next.
    pub(crate) fn requeue_front(&mut self, entry: FrontierEntry) {
        self.queue.push_front(entry);
    }

    /// Append an entry whose retry delay has elapsed, bypassing the
    /// visited gate.
    pub(crate) fn reinject(&mut self, entry: FrontierEntry) {
        self.queue.push_back(entry);
    }

    /// Head of the queue without removing it.
    ///
    /// Dispatch peeks first and only pops once a rate-limiter token is
    /// in hand, so a denial leaves the URL exactly where it was.
    pub(crate) fn peek(&self) -> Option<&FrontierEntry> {
        self.queue.front()
    }

    pub(crate) fn pop_front(&mut self) -> Option<FrontierEntry> {
        self.queue.pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// How many distinct URLs this crawl has admitted so far.
    pub(crate) fn visited_count(&self) -> usize {
        self.visited.len()
    }
}
