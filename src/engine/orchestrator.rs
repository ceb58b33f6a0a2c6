//! Per-crawl coordination.
//!
//! The orchestrator owns the frontier, visited set, active-worker map,
//! retry schedule, stats, and results for one crawl. Workers report
//! back through their join handles; all state mutation happens on the
//! orchestrator's task, which makes result application the single
//! ordering point the stats rely on.
//!
//! The dispatch protocol is deliberate: the head of the frontier is
//! peeked, a rate-limiter token is consumed, and only then is the entry
//! popped and a worker spawned. A denial leaves the URL in place and
//! arms a retry timer, so token starvation can delay URLs but never
//! drop them.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio::time::Instant;
use url::Url;

use super::frontier::{FilterReason, Frontier, FrontierEntry};
use super::handle::{CrawlOutcome, CrawlReport, CrawlState, UrlResult, UrlStatus};
use super::retry::{RetrySchedule, retry_backoff};
use super::stats::CrawlStats;
use super::worker::{WorkerContext, WorkerOutput, process_url};
use crate::config::{CrawlMode, CrawlOptions};
use crate::error::{CrawlError, ErrorKind};
use crate::handler::{CrawlContext, CrawlHandler};
use crate::rate_limiter::{RateLimitDecision, RateLimiter};
use crate::retriever::Retriever;
use crate::robots::RobotsCache;
use crate::url_tools::{self, UrlFilter};

/// Everything a crawl needs, assembled by the public API layer.
pub(crate) struct CrawlJob {
    pub mode: CrawlMode,
    pub seeds: Vec<String>,
    pub options: CrawlOptions,
    pub robots: Arc<RobotsCache>,
    pub limiter: Arc<RateLimiter>,
    pub retriever: Arc<dyn Retriever>,
    pub handler: Arc<dyn CrawlHandler>,
    pub cancel_rx: watch::Receiver<bool>,
    pub state_tx: watch::Sender<CrawlState>,
}

struct ActiveWorker {
    entry: FrontierEntry,
    started_at: Instant,
    abort: tokio::task::AbortHandle,
}

enum Event {
    Worker(u64, Result<WorkerOutput, JoinError>),
    Wake,
    Cancelled,
}

pub(crate) struct Orchestrator {
    mode: CrawlMode,
    options: CrawlOptions,
    filter: UrlFilter,
    root_domain: Option<String>,
    handler: Arc<dyn CrawlHandler>,
    limiter: Arc<RateLimiter>,
    worker_ctx: Arc<WorkerContext>,

    frontier: Frontier,
    retry: RetrySchedule,
    stats: CrawlStats,
    results: Vec<UrlResult>,
    active: HashMap<u64, ActiveWorker>,
    tasks: FuturesUnordered<BoxFuture<'static, (u64, Result<WorkerOutput, JoinError>)>>,
    next_worker_id: u64,

    /// Earliest moment dispatch should be retried after a token denial.
    next_dispatch_at: Option<Instant>,
    draining: bool,

    cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<CrawlState>,
}

impl Orchestrator {
    pub(crate) fn new(job: CrawlJob) -> Result<Self, CrawlError> {
        // Patterns compile exactly once per crawl, before any URL is
        // evaluated against them.
        let filter = UrlFilter::compile(&job.options.include_patterns, &job.options.exclude_patterns)?;

        let worker_ctx = Arc::new(WorkerContext {
            robots: job.robots,
            retriever: job.retriever,
            handler: Arc::clone(&job.handler),
            user_agent: job.options.user_agent.clone(),
            fetch_timeout: job.options.fetch_timeout,
            respect_robots_txt: job.options.respect_robots_txt,
        });

        Ok(Self {
            mode: job.mode,
            filter,
            root_domain: None,
            handler: job.handler,
            limiter: job.limiter,
            worker_ctx,
            frontier: Frontier::new(),
            retry: RetrySchedule::new(),
            stats: CrawlStats::default(),
            results: Vec::new(),
            active: HashMap::new(),
            tasks: FuturesUnordered::new(),
            next_worker_id: 0,
            next_dispatch_at: None,
            draining: false,
            cancel_rx: job.cancel_rx,
            state_tx: job.state_tx,
            options: job.options,
        }
        .with_seeds(job.seeds)?)
    }

    fn with_seeds(mut self, seeds: Vec<String>) -> Result<Self, CrawlError> {
        self.state_tx.send_replace(CrawlState::Initializing);

        let mut admitted = 0usize;
        let mut last_reason = String::new();
        for seed in &seeds {
            match url_tools::normalize(seed) {
                Ok(url) => {
                    if self.mode == CrawlMode::Website && self.root_domain.is_none() {
                        self.root_domain = url_tools::extract_domain(&url);
                    }
                    if self.frontier.try_admit(FrontierEntry::seed(url)) {
                        admitted += 1;
                    } else {
                        self.stats.record_filtered(FilterReason::AlreadyVisited);
                    }
                }
                Err(e) => {
                    warn!("seed rejected: {e}");
                    last_reason = e.to_string();
                    self.stats.record_filtered(FilterReason::InvalidUrl);
                }
            }
        }

        if admitted == 0 {
            let detail = if seeds.is_empty() {
                "empty seed list".to_string()
            } else if last_reason.is_empty() {
                "all seeds were duplicates".to_string()
            } else {
                last_reason
            };
            return Err(CrawlError::NoValidSeeds(detail));
        }

        info!(
            "crawl seeded with {admitted} urls ({} rejected)",
            seeds.len() - admitted
        );
        Ok(self)
    }

    /// Run the crawl to completion, cancellation, or deadline.
    pub(crate) async fn run(mut self) -> Result<CrawlReport, CrawlError> {
        let started = Instant::now();
        let deadline = self.options.crawl_timeout.map(|t| started + t);
        self.state_tx.send_replace(CrawlState::Running);

        let mut outcome = CrawlOutcome::Completed;
        loop {
            if *self.cancel_rx.borrow() {
                info!("crawl cancelled with {} urls pending", self.frontier.len());
                outcome = CrawlOutcome::Cancelled;
                break;
            }

            for entry in self.retry.drain_ready() {
                debug!("retry ready for {}", entry.url);
                self.frontier.reinject(entry);
            }

            self.dispatch();

            if self.frontier.is_empty() && self.active.is_empty() && self.retry.is_empty() {
                break;
            }

            if let Some(d) = deadline
                && Instant::now() >= d
            {
                warn!("crawl deadline reached with {} urls pending", self.frontier.len());
                outcome = CrawlOutcome::TimedOut;
                break;
            }

            let event = self.next_event(deadline).await;
            match event {
                Event::Worker(id, res) => self.on_worker_done(id, res),
                Event::Wake => {}
                Event::Cancelled => {
                    info!("crawl cancelled with {} urls pending", self.frontier.len());
                    outcome = CrawlOutcome::Cancelled;
                    break;
                }
            }
        }

        if outcome != CrawlOutcome::Completed {
            self.drain(self.options.grace_period).await;
        }

        self.stats.duration_ms = started.elapsed().as_millis() as u64;
        let state = match outcome {
            CrawlOutcome::Completed => CrawlState::Completed,
            CrawlOutcome::Cancelled => CrawlState::Cancelled,
            CrawlOutcome::TimedOut => CrawlState::Failed,
        };

        let report = CrawlReport {
            outcome,
            results: self.results,
            stats: self.stats,
        };

        // A hook panic must not take down the crawl that just finished.
        let handler = self.handler;
        if std::panic::catch_unwind(AssertUnwindSafe(|| handler.on_complete(&report))).is_err() {
            warn!("on_complete hook panicked");
        }
        self.state_tx.send_replace(state);

        if report.outcome == CrawlOutcome::Cancelled && report.stats.crawled == 0 {
            return Err(CrawlError::CancelledBeforeResults);
        }
        Ok(report)
    }

    /// Fill worker slots using peek-then-pop dispatch.
    fn dispatch(&mut self) {
        self.next_dispatch_at = None;
        while self.active.len() < self.options.max_workers {
            let Some(head) = self.frontier.peek() else {
                break;
            };
            let Some(domain) = url_tools::extract_domain(&head.url) else {
                // Normalized URLs always carry a host; treat the
                // impossible as filtered rather than looping on it.
                error!("frontier entry without host: {}", head.url);
                if self.frontier.pop_front().is_some() {
                    self.stats.record_filtered(FilterReason::InvalidUrl);
                }
                continue;
            };

            match self.limiter.try_consume(&domain, self.options.rate_limit) {
                RateLimitDecision::Deny { retry_after } => {
                    // Token denied: the URL stays at the head of the
                    // frontier and dispatch retries after the wait.
                    debug!("rate limited on {domain}; dispatch retries in {retry_after:?}");
                    let at = Instant::now() + retry_after;
                    self.next_dispatch_at =
                        Some(self.next_dispatch_at.map_or(at, |cur| cur.min(at)));
                    break;
                }
                RateLimitDecision::Allow => {
                    let Some(entry) = self.frontier.pop_front() else {
                        break;
                    };
                    self.spawn_worker(entry);
                }
            }
        }
    }

    fn spawn_worker(&mut self, entry: FrontierEntry) {
        let id = self.next_worker_id;
        self.next_worker_id += 1;

        let ctx = Arc::clone(&self.worker_ctx);
        let cancel = self.cancel_rx.clone();
        let handle = tokio::spawn(process_url(entry.clone(), ctx, cancel));
        self.active.insert(
            id,
            ActiveWorker {
                entry,
                started_at: Instant::now(),
                abort: handle.abort_handle(),
            },
        );
        self.tasks.push(Box::pin(async move { (id, handle.await) }));
    }

    async fn next_event(&mut self, deadline: Option<Instant>) -> Event {
        // Wake at the earliest of: dispatch retry, pending retry, crawl
        // deadline. With none of those, park for a long beat; worker
        // completions interrupt the sleep anyway.
        let mut wake = self
            .next_dispatch_at
            .into_iter()
            .chain(self.retry.next_ready_at())
            .chain(deadline)
            .min()
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(60));
        // Guard against a wake time already in the past.
        wake = wake.max(Instant::now());

        tokio::select! {
            biased;
            () = super::worker::cancelled(&mut self.cancel_rx) => Event::Cancelled,
            Some((id, res)) = self.tasks.next(), if !self.tasks.is_empty() => {
                Event::Worker(id, res)
            }
            () = tokio::time::sleep_until(wake) => Event::Wake,
        }
    }

    fn on_worker_done(&mut self, id: u64, res: Result<WorkerOutput, JoinError>) {
        let Some(active) = self.active.remove(&id) else {
            error!("result from unknown worker {id}");
            return;
        };

        match res {
            Ok(WorkerOutput {
                entry,
                result: Some(result),
            }) => self.apply_result(entry, result),
            Ok(WorkerOutput { result: None, .. }) => {
                // Worker observed cancellation before fetching; the
                // crawl is winding down and the URL is not accounted.
                debug!("worker {id} skipped its url on cancellation");
            }
            Err(join_err) if join_err.is_cancelled() => {
                debug!("worker {id} aborted during drain");
            }
            Err(join_err) => {
                // A panic in worker code. The URL is recovered from the
                // active-worker map and requeued at the head, bounded by
                // the retry budget.
                let mut entry = active.entry;
                error!(
                    "worker {id} crashed on {} after {:?}: {join_err}",
                    entry.url,
                    active.started_at.elapsed()
                );
                if !self.draining && entry.attempts < self.options.max_retries {
                    entry.attempts += 1;
                    self.frontier.requeue_front(entry);
                } else {
                    let url = entry.url.clone();
                    self.finish_failed(UrlResult {
                        url: url.as_str().to_string(),
                        status: UrlStatus::Failed,
                        http_status: None,
                        extracted_data: None,
                        discovered_urls: Vec::new(),
                        error_kind: Some(ErrorKind::WorkerCrash),
                        response_time_ms: 0,
                        attempts: entry.attempts + 1,
                    });
                }
            }
        }
    }

    /// Apply one worker outcome: stats, retries, link discovery, hooks.
    fn apply_result(&mut self, entry: FrontierEntry, result: UrlResult) {
        match result.status {
            UrlStatus::Ok => {
                self.stats.record_discovered(result.discovered_urls.len());
                if self.mode.follows_links() {
                    self.admit_discovered(&entry, &result.discovered_urls);
                }
                self.stats.record_outcome(&result);
                let handler = Arc::clone(&self.handler);
                let url = entry.url.clone();
                if std::panic::catch_unwind(AssertUnwindSafe(|| {
                    handler.on_url_success(&url, &result);
                }))
                .is_err()
                {
                    warn!("on_url_success hook panicked for {url}");
                }
                self.results.push(result);
            }
            UrlStatus::Failed => {
                let kind = result.error_kind.unwrap_or(ErrorKind::Connection);
                let retryable =
                    !self.draining && kind.is_retryable() && entry.attempts < self.options.max_retries;
                if retryable {
                    let mut entry = entry;
                    entry.attempts += 1;
                    let delay = retry_backoff(entry.attempts, kind.delay_multiplier());
                    warn!(
                        "{} failed ({kind}, attempt {}/{}); retrying in {delay:?}",
                        entry.url,
                        entry.attempts,
                        self.options.max_retries + 1
                    );
                    self.retry.schedule(entry, delay);
                } else {
                    self.finish_failed(result);
                }
            }
        }
    }

    /// Record a terminal failure and fire the failure hook.
    fn finish_failed(&mut self, result: UrlResult) {
        self.stats.record_outcome(&result);
        if let (Ok(url), Some(kind)) = (Url::parse(&result.url), result.error_kind) {
            let handler = Arc::clone(&self.handler);
            let attempts = result.attempts;
            if std::panic::catch_unwind(AssertUnwindSafe(|| {
                handler.on_url_failure(&url, kind, attempts);
            }))
            .is_err()
            {
                warn!("on_url_failure hook panicked for {url}");
            }
        }
        self.results.push(result);
    }

    /// Run discovered links through resolution, depth, domain, pattern,
    /// handler, and visited checks, in that order.
    fn admit_discovered(&mut self, source: &FrontierEntry, discovered: &[String]) {
        let depth = source.depth + 1;
        let ctx = CrawlContext {
            depth,
            source_url: Some(source.url.clone()),
            root_domain: self.root_domain.clone(),
        };

        for raw in discovered {
            let url = match url_tools::resolve(raw, &source.url)
                .and_then(|u| url_tools::normalize(u.as_str()))
            {
                Ok(url) => url,
                Err(e) => {
                    debug!("discovered url rejected: {e}");
                    self.stats.record_filtered(FilterReason::InvalidUrl);
                    continue;
                }
            };

            if depth > self.options.max_depth {
                self.stats.record_filtered(FilterReason::Depth);
                continue;
            }
            if let Some(root) = &self.root_domain
                && !url_tools::same_domain(&url, root)
            {
                self.stats.record_filtered(FilterReason::CrossDomain);
                continue;
            }
            if !self.filter.matches(url.as_str()) {
                self.stats.record_filtered(FilterReason::Pattern);
                continue;
            }
            if !self.handler.should_crawl(&url, &ctx) {
                self.stats.record_filtered(FilterReason::HandlerRejected);
                continue;
            }

            let entry = FrontierEntry {
                url,
                depth,
                source: Some(source.url.clone()),
                attempts: 0,
            };
            if !self.frontier.try_admit(entry) {
                self.stats.record_filtered(FilterReason::AlreadyVisited);
            }
        }
    }

    /// Let in-flight workers finish under the grace period, then abort
    /// the stragglers.
    async fn drain(&mut self, grace: Duration) {
        self.draining = true;
        if self.tasks.is_empty() {
            return;
        }
        self.state_tx.send_replace(CrawlState::Draining);
        let deadline = Instant::now() + grace;
        let mut aborted = false;

        loop {
            tokio::select! {
                maybe = self.tasks.next() => match maybe {
                    Some((id, res)) => self.on_worker_done(id, res),
                    None => break,
                },
                () = tokio::time::sleep_until(deadline), if !aborted => {
                    warn!("grace period expired; aborting {} workers", self.active.len());
                    for worker in self.active.values() {
                        worker.abort.abort();
                    }
                    aborted = true;
                }
            }
        }
    }
}

/// Build and run a crawl to completion on the current task.
pub(crate) async fn run_crawl(job: CrawlJob) -> Result<CrawlReport, CrawlError> {
    Orchestrator::new(job)?.run().await
}
