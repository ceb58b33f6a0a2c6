//! Worker execution: one URL from dispatch to result.
//!
//! A worker owns exactly one frontier entry. Everything expected —
//! robots denial, fetch errors, extractor failures — becomes a
//! structured [`UrlResult`]; only a genuine bug (a panic) escapes, and
//! the orchestrator observes that as a crash and requeues the URL.

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use tokio::sync::watch;
use url::Url;

use super::frontier::FrontierEntry;
use super::handle::{UrlResult, UrlStatus};
use crate::document::Document;
use crate::error::{ErrorKind, FetchError};
use crate::handler::CrawlHandler;
use crate::retriever::{FetchOptions, Retriever};
use crate::robots::RobotsCache;

/// Shared dependencies a worker needs, cloned once per crawl.
pub(crate) struct WorkerContext {
    pub robots: Arc<RobotsCache>,
    pub retriever: Arc<dyn Retriever>,
    pub handler: Arc<dyn CrawlHandler>,
    pub user_agent: String,
    pub fetch_timeout: Duration,
    pub respect_robots_txt: bool,
}

/// What a worker hands back to the orchestrator.
pub(crate) struct WorkerOutput {
    pub entry: FrontierEntry,
    /// `None` when the worker observed cancellation at the fetch
    /// boundary and never produced an outcome.
    pub result: Option<UrlResult>,
}

/// Resolves when the cancel signal flips to true; pends forever
/// otherwise (including when the sender is gone), so it is only useful
/// inside `select!`.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone means the orchestrator is gone; park.
            std::future::pending::<()>().await;
        }
    }
}

/// Process one URL: robots check, fetch, parse, extract, report.
pub(crate) async fn process_url(
    entry: FrontierEntry,
    ctx: Arc<WorkerContext>,
    mut cancel: watch::Receiver<bool>,
) -> WorkerOutput {
    if *cancel.borrow() {
        return WorkerOutput {
            entry,
            result: None,
        };
    }

    let attempts = entry.attempts + 1;
    let url = entry.url.clone();

    if ctx.respect_robots_txt && !ctx.robots.allowed(&ctx.user_agent, &url).await {
        debug!("robots.txt blocks {url}");
        let result = failed(&url, ErrorKind::RobotsBlocked, None, 0, attempts);
        return WorkerOutput {
            entry,
            result: Some(result),
        };
    }

    let mut opts = FetchOptions {
        timeout: ctx.fetch_timeout,
        user_agent: ctx.user_agent.clone(),
        ..FetchOptions::default()
    };
    if let Some(source) = &entry.source {
        opts.headers
            .insert("Referer".to_string(), source.as_str().to_string());
    }

    let started = Instant::now();
    let fetched = tokio::select! {
        fetched = ctx.retriever.get(&url, &opts) => fetched,
        () = cancelled(&mut cancel) => {
            debug!("fetch of {url} abandoned on cancellation");
            return WorkerOutput { entry, result: None };
        }
    };
    let response_time_ms = started.elapsed().as_millis() as u64;

    let result = match fetched {
        Err(err) => fetch_failure(&url, &err, response_time_ms, attempts),
        Ok(fetched) => {
            // Parsing and extraction are synchronous CPU work; the
            // scraper DOM lives and dies inside this block.
            let doc = Document::parse(&fetched);
            match ctx.handler.extract_data(&doc, &url) {
                Err(e) => {
                    debug!("extract_data failed on {url}: {e}");
                    failed(
                        &url,
                        ErrorKind::Parse,
                        Some(fetched.status),
                        response_time_ms,
                        attempts,
                    )
                }
                Ok(data) => match ctx.handler.extract_urls(&doc, &url) {
                    Err(e) => {
                        debug!("extract_urls failed on {url}: {e}");
                        failed(
                            &url,
                            ErrorKind::Parse,
                            Some(fetched.status),
                            response_time_ms,
                            attempts,
                        )
                    }
                    Ok(discovered) => UrlResult {
                        url: url.as_str().to_string(),
                        status: UrlStatus::Ok,
                        http_status: Some(fetched.status),
                        extracted_data: Some(data),
                        discovered_urls: discovered,
                        error_kind: None,
                        response_time_ms,
                        attempts,
                    },
                },
            }
        }
    };

    WorkerOutput {
        entry,
        result: Some(result),
    }
}

fn fetch_failure(url: &Url, err: &FetchError, response_time_ms: u64, attempts: u32) -> UrlResult {
    debug!("fetch failed on {url}: {err}");
    failed(url, err.kind(), err.http_status(), response_time_ms, attempts)
}

fn failed(
    url: &Url,
    kind: ErrorKind,
    http_status: Option<u16>,
    response_time_ms: u64,
    attempts: u32,
) -> UrlResult {
    UrlResult {
        url: url.as_str().to_string(),
        status: UrlStatus::Failed,
        http_status,
        extracted_data: None,
        discovered_urls: Vec::new(),
        error_kind: Some(kind),
        response_time_ms,
        attempts,
    }
}
