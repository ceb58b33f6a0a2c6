//! Shared helpers for engine integration tests: an in-process scripted
//! retriever and a handler that records every hook invocation.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use trawler::{
    CrawlContext, CrawlHandler, CrawlReport, Document, ErrorKind, ExtractError, FetchError,
    FetchOptions, FetchedDocument, LinkExtractor, Retriever,
};
use url::Url;

/// What the scripted retriever does for one URL.
pub enum Script {
    /// 200 with this HTML body.
    Body(String),
    /// The given non-success HTTP status on every attempt.
    Status(u16),
    /// `failures` 503s, then a 200 with the body.
    FailThenOk { failures: u32, body: String },
    /// `panics` worker crashes, then a 200 with the body.
    PanicThenOk { panics: u32, body: String },
    /// Never responds (until cancellation or deadline).
    Hang,
}

struct Route {
    script: Script,
    attempts: AtomicU32,
}

/// Deterministic in-process retriever keyed by normalized URL.
///
/// Unrouted URLs come back 404. Every attempt is recorded together with
/// the `Referer` header it carried.
pub struct ScriptedRetriever {
    routes: HashMap<String, Route>,
    pub hits: Mutex<Vec<(String, Option<String>)>>,
}

/// Route engine logs through the test harness.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

impl ScriptedRetriever {
    pub fn new() -> Self {
        init_logging();
        Self {
            routes: HashMap::new(),
            hits: Mutex::new(Vec::new()),
        }
    }

    pub fn route(mut self, url: &str, script: Script) -> Self {
        self.routes.insert(
            url.to_string(),
            Route {
                script,
                attempts: AtomicU32::new(0),
            },
        );
        self
    }

    /// Convenience: a 200 HTML page whose body is a list of links.
    pub fn page(self, url: &str, links: &[&str]) -> Self {
        self.route(url, Script::Body(html_with_links(links)))
    }

    pub fn hit_count(&self, url: &str) -> u32 {
        self.routes
            .get(url)
            .map_or(0, |r| r.attempts.load(Ordering::SeqCst))
    }

    pub fn referer_of(&self, url: &str) -> Option<String> {
        self.hits
            .lock()
            .unwrap()
            .iter()
            .find(|(hit, _)| hit == url)
            .and_then(|(_, referer)| referer.clone())
    }

    fn ok(url: &Url, body: &str) -> FetchedDocument {
        FetchedDocument {
            final_url: url.clone(),
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.to_string(),
        }
    }
}

impl Retriever for ScriptedRetriever {
    fn name(&self) -> &str {
        "scripted"
    }

    fn get<'a>(
        &'a self,
        url: &'a Url,
        opts: &'a FetchOptions,
    ) -> BoxFuture<'a, Result<FetchedDocument, FetchError>> {
        Box::pin(async move {
            self.hits
                .lock()
                .unwrap()
                .push((url.as_str().to_string(), opts.headers.get("Referer").cloned()));

            let Some(route) = self.routes.get(url.as_str()) else {
                return Err(FetchError::Http4xx(404));
            };
            let attempt = route.attempts.fetch_add(1, Ordering::SeqCst);

            match &route.script {
                Script::Body(body) => Ok(Self::ok(url, body)),
                Script::Status(status) => Err(FetchError::from_status(*status)
                    .unwrap_or(FetchError::Connection("bad script status".to_string()))),
                Script::FailThenOk { failures, body } => {
                    if attempt < *failures {
                        Err(FetchError::Http5xx(503))
                    } else {
                        Ok(Self::ok(url, body))
                    }
                }
                Script::PanicThenOk { panics, body } => {
                    if attempt < *panics {
                        panic!("scripted worker crash on {url}");
                    }
                    Ok(Self::ok(url, body))
                }
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(600)).await;
                    Ok(Self::ok(url, ""))
                }
            }
        })
    }
}

pub fn html_with_links(links: &[&str]) -> String {
    let anchors: String = links
        .iter()
        .map(|href| format!(r#"<a href="{href}">link</a>"#))
        .collect();
    format!("<html><head><title>page</title></head><body>{anchors}</body></html>")
}

/// Handler that records every hook call, with optional veto and
/// extraction-failure behavior layered over `LinkExtractor`.
#[derive(Default)]
pub struct RecordingHandler {
    inner: LinkExtractor,
    pub successes: Mutex<Vec<String>>,
    pub failures: Mutex<Vec<(String, ErrorKind)>>,
    pub completions: AtomicU32,
    /// `should_crawl` returns false for URLs containing any of these.
    pub reject_substrings: Vec<String>,
    /// `extract_data` fails for URLs containing any of these.
    pub fail_extract_substrings: Vec<String>,
}

impl RecordingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(mut self, substring: &str) -> Self {
        self.reject_substrings.push(substring.to_string());
        self
    }

    pub fn failing_extraction_on(mut self, substring: &str) -> Self {
        self.fail_extract_substrings.push(substring.to_string());
        self
    }

    pub fn success_urls(&self) -> Vec<String> {
        self.successes.lock().unwrap().clone()
    }

    pub fn failure_kinds(&self) -> Vec<(String, ErrorKind)> {
        self.failures.lock().unwrap().clone()
    }
}

impl CrawlHandler for RecordingHandler {
    fn should_crawl(&self, url: &Url, _ctx: &CrawlContext) -> bool {
        !self
            .reject_substrings
            .iter()
            .any(|s| url.as_str().contains(s.as_str()))
    }

    fn extract_data(&self, doc: &Document, url: &Url) -> Result<Value, ExtractError> {
        if self
            .fail_extract_substrings
            .iter()
            .any(|s| url.as_str().contains(s.as_str()))
        {
            return Err(ExtractError::from("scripted extraction failure"));
        }
        self.inner.extract_data(doc, url)
    }

    fn extract_urls(&self, doc: &Document, base: &Url) -> Result<Vec<String>, ExtractError> {
        self.inner.extract_urls(doc, base)
    }

    fn on_url_success(&self, url: &Url, _result: &trawler::UrlResult) {
        self.successes.lock().unwrap().push(url.as_str().to_string());
    }

    fn on_url_failure(&self, url: &Url, kind: ErrorKind, _attempts: u32) {
        self.failures
            .lock()
            .unwrap()
            .push((url.as_str().to_string(), kind));
    }

    fn on_complete(&self, _report: &CrawlReport) {
        self.completions.fetch_add(1, Ordering::SeqCst);
    }
}
