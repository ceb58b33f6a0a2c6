//! The fetch capability: anything that turns a URL into a document.
//!
//! The engine consumes retrievers through the dyn-compatible
//! [`Retriever`] trait, so plain HTTP, a headless browser, or a
//! third-party scraping API all plug in the same way. [`FallbackChain`]
//! composes several of them in priority order.

use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use log::{debug, warn};
use url::Url;

use crate::error::{CrawlError, FetchError};
use crate::utils::constants::{DEFAULT_FETCH_TIMEOUT_SECS, DEFAULT_USER_AGENT};

/// Response transformer applied by retrievers before returning.
///
/// Lets callers rewrite or reject a response (strip boilerplate, decode
/// a wrapper format) without implementing a whole retriever.
pub type Responder =
    std::sync::Arc<dyn Fn(FetchedDocument) -> Result<FetchedDocument, FetchError> + Send + Sync>;

/// Per-fetch knobs recognized by every retriever.
#[derive(Clone)]
pub struct FetchOptions {
    /// Extra request headers (e.g. `Referer`).
    pub headers: HashMap<String, String>,
    /// Extra query parameters appended to the URL.
    pub params: HashMap<String, String>,
    /// Per-request deadline.
    pub timeout: Duration,
    /// User agent to identify as.
    pub user_agent: String,
    /// Optional response transformer.
    pub responder: Option<Responder>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            headers: HashMap::new(),
            params: HashMap::new(),
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            responder: None,
        }
    }
}

impl std::fmt::Debug for FetchOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchOptions")
            .field("headers", &self.headers)
            .field("params", &self.params)
            .field("timeout", &self.timeout)
            .field("user_agent", &self.user_agent)
            .field("responder", &self.responder.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A successfully fetched document, before parsing.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    /// URL the response actually came from, after redirects.
    pub final_url: Url,
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header, when the server sent one.
    pub content_type: Option<String>,
    /// Response body as text.
    pub body: String,
}

/// Capability: given a URL and options, return a fetched document or a
/// classified error.
///
/// Implementations must be cheap to share behind an `Arc` across many
/// concurrent workers.
pub trait Retriever: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str {
        "retriever"
    }

    /// Fetch one URL.
    fn get<'a>(
        &'a self,
        url: &'a Url,
        opts: &'a FetchOptions,
    ) -> BoxFuture<'a, Result<FetchedDocument, FetchError>>;
}

/// Plain HTTP retriever on reqwest.
#[derive(Debug, Clone, Default)]
pub struct HttpRetriever {
    client: reqwest::Client,
}

impl HttpRetriever {
    /// New retriever with a default client.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// New retriever reusing an existing client (connection pools and
    /// proxies configured by the caller).
    #[must_use]
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn fetch(&self, url: &Url, opts: &FetchOptions) -> Result<FetchedDocument, FetchError> {
        let mut request = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, &opts.user_agent)
            .timeout(opts.timeout);
        if !opts.params.is_empty() {
            request = request.query(&opts.params);
        }
        for (name, value) in &opts.headers {
            request = request.header(name, value);
        }

        let response = request.send().await.map_err(|e| FetchError::from_reqwest(&e))?;
        let status = response.status().as_u16();
        if let Some(err) = FetchError::from_status(status) {
            return Err(err);
        }

        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Parse(e.to_string()))?;

        let fetched = FetchedDocument {
            final_url,
            status,
            content_type,
            body,
        };
        match &opts.responder {
            Some(responder) => responder(fetched),
            None => Ok(fetched),
        }
    }
}

impl Retriever for HttpRetriever {
    fn name(&self) -> &str {
        "http"
    }

    fn get<'a>(
        &'a self,
        url: &'a Url,
        opts: &'a FetchOptions,
    ) -> BoxFuture<'a, Result<FetchedDocument, FetchError>> {
        Box::pin(self.fetch(url, opts))
    }
}

/// Tries retrievers in order; first success wins.
///
/// The last retriever's error propagates when every link in the chain
/// fails.
pub struct FallbackChain {
    retrievers: Vec<std::sync::Arc<dyn Retriever>>,
}

impl FallbackChain {
    /// Build a chain. Rejects an empty list at configuration time.
    pub fn new(retrievers: Vec<std::sync::Arc<dyn Retriever>>) -> Result<Self, CrawlError> {
        if retrievers.is_empty() {
            return Err(CrawlError::EmptyRetrieverChain);
        }
        Ok(Self { retrievers })
    }
}

impl Retriever for FallbackChain {
    fn name(&self) -> &str {
        "fallback-chain"
    }

    fn get<'a>(
        &'a self,
        url: &'a Url,
        opts: &'a FetchOptions,
    ) -> BoxFuture<'a, Result<FetchedDocument, FetchError>> {
        Box::pin(async move {
            let mut last_err = FetchError::Connection("empty chain".to_string());
            for retriever in &self.retrievers {
                match retriever.get(url, opts).await {
                    Ok(doc) => {
                        debug!("{} fetched {url}", retriever.name());
                        return Ok(doc);
                    }
                    Err(e) => {
                        warn!("{} failed on {url}: {e}; trying next", retriever.name());
                        last_err = e;
                    }
                }
            }
            Err(last_err)
        })
    }
}
