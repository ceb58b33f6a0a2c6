//! trawler: a concurrent web crawler engine.
//!
//! Fetches pages in parallel from seed URLs, a website root, or
//! sitemap discovery; extracts structured data and further links
//! through a pluggable [`CrawlHandler`]; and stays polite with
//! per-domain token buckets and a shared robots.txt cache. Failures are
//! isolated per URL: a crawl that fetched anything returns partial
//! results and full accounting for everything else.
//!
//! ```rust,no_run
//! use trawler::{CrawlOptions, Crawler};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let options = CrawlOptions::builder()
//!         .max_workers(8)
//!         .max_depth(2)
//!         .build()?;
//!     let report = Crawler::new()
//!         .crawl_website("https://example.com", options)
//!         .await?;
//!     println!("crawled {} pages", report.stats.crawled);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod handler;
pub mod rate_limiter;
pub mod retriever;
pub mod robots;
pub mod sitemap;
pub mod url_tools;
pub mod utils;

use std::sync::{Arc, OnceLock};

use log::info;
use tokio::sync::watch;

pub use config::{CrawlMode, CrawlOptions, CrawlOptionsBuilder};
pub use document::{DocLink, Document};
pub use engine::{
    CrawlHandle, CrawlOutcome, CrawlReport, CrawlState, CrawlStats, DomainStats, FilterReason,
    UrlResult, UrlStatus,
};
pub use error::{CrawlError, ErrorKind, FetchError, InvalidUrl, PatternError};
pub use handler::{CrawlContext, CrawlHandler, ExtractError, LinkExtractor};
pub use rate_limiter::{DomainLimit, RateLimitDecision, RateLimiter};
pub use retriever::{
    FallbackChain, FetchOptions, FetchedDocument, HttpRetriever, Responder, Retriever,
};
pub use robots::{RobotsCache, RobotsRules};
pub use sitemap::SitemapClient;

use engine::{CrawlJob, run_crawl};

/// What a crawl starts from.
#[derive(Debug, Clone)]
pub enum CrawlTarget {
    /// Crawl exactly these URLs; never follow links.
    Urls(Vec<String>),
    /// Breadth-first from this root, following same-domain links.
    Website(String),
    /// Crawl the URLs listed in this site's sitemaps.
    Sitemap(String),
}

impl CrawlTarget {
    const fn mode(&self) -> CrawlMode {
        match self {
            Self::Urls(_) => CrawlMode::UrlList,
            Self::Website(_) => CrawlMode::Website,
            Self::Sitemap(_) => CrawlMode::Sitemap,
        }
    }
}

/// The engine's front door.
///
/// Owns the process-wide collaborators: the per-domain rate limiter,
/// the robots.txt cache, and the default retriever. One `Crawler` can
/// run any number of crawls, concurrently or in sequence; per-crawl
/// state lives and dies with each call.
pub struct Crawler {
    limiter: Arc<RateLimiter>,
    robots: Arc<RobotsCache>,
    retriever: Arc<dyn Retriever>,
}

impl Default for Crawler {
    fn default() -> Self {
        Self::new()
    }
}

impl Crawler {
    /// Crawler with its own rate limiter and robots cache, fetching
    /// with plain HTTP.
    ///
    /// The shared components live as long as the crawler and are shared
    /// by every crawl it runs. The free functions route through one
    /// process-wide instance.
    #[must_use]
    pub fn new() -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new()),
            robots: Arc::new(RobotsCache::new()),
            retriever: Arc::new(HttpRetriever::new()),
        }
    }

    /// Crawler with a custom retriever (or [`FallbackChain`]).
    #[must_use]
    pub fn with_retriever(retriever: Arc<dyn Retriever>) -> Self {
        Self {
            retriever,
            ..Self::new()
        }
    }

    /// Crawl an explicit list of URLs. Links are not followed.
    #[tracing::instrument(skip(self, seeds, options))]
    pub async fn crawl_urls<I, S>(
        &self,
        seeds: I,
        options: CrawlOptions,
    ) -> Result<CrawlReport, CrawlError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let seeds = seeds.into_iter().map(Into::into).collect();
        self.run(CrawlTarget::Urls(seeds), options).await
    }

    /// Crawl a website breadth-first from its root, following
    /// same-domain links up to `max_depth`.
    #[tracing::instrument(skip(self, options))]
    pub async fn crawl_website(
        &self,
        root: &str,
        options: CrawlOptions,
    ) -> Result<CrawlReport, CrawlError> {
        self.run(CrawlTarget::Website(root.to_string()), options)
            .await
    }

    /// Crawl the URLs a site's sitemaps declare. Links are not
    /// followed; the sitemap is the authority on what to fetch.
    #[tracing::instrument(skip(self, options))]
    pub async fn crawl_from_sitemap(
        &self,
        root: &str,
        options: CrawlOptions,
    ) -> Result<CrawlReport, CrawlError> {
        self.run(CrawlTarget::Sitemap(root.to_string()), options)
            .await
    }

    /// Start a crawl detached and return a handle for cancellation,
    /// state inspection, and joining.
    #[must_use]
    pub fn start(&self, target: CrawlTarget, options: CrawlOptions) -> CrawlHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(CrawlState::Initializing);

        let limiter = Arc::clone(&self.limiter);
        let robots = Arc::clone(&self.robots);
        let retriever = Arc::clone(&self.retriever);
        let join = tokio::spawn(execute(
            target, options, limiter, robots, retriever, cancel_rx, state_tx,
        ));

        CrawlHandle {
            cancel_tx,
            state_rx,
            join,
        }
    }

    async fn run(
        &self,
        target: CrawlTarget,
        options: CrawlOptions,
    ) -> Result<CrawlReport, CrawlError> {
        // Keep the cancel sender alive for the whole crawl so the
        // orchestrator's cancel watch stays connected; a blocking crawl
        // simply never fires it.
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (state_tx, _state_rx) = watch::channel(CrawlState::Initializing);
        execute(
            target,
            options,
            Arc::clone(&self.limiter),
            Arc::clone(&self.robots),
            Arc::clone(&self.retriever),
            cancel_rx,
            state_tx,
        )
        .await
    }
}

/// Assemble and run one crawl.
async fn execute(
    target: CrawlTarget,
    options: CrawlOptions,
    limiter: Arc<RateLimiter>,
    robots: Arc<RobotsCache>,
    default_retriever: Arc<dyn Retriever>,
    cancel_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<CrawlState>,
) -> Result<CrawlReport, CrawlError> {
    limiter.ensure_housekeeping();

    let mode = target.mode();
    let seeds = match target {
        CrawlTarget::Urls(seeds) => seeds,
        CrawlTarget::Website(root) => vec![root],
        CrawlTarget::Sitemap(root) => {
            let root_url = url_tools::normalize(&root)
                .map_err(|e| CrawlError::NoValidSeeds(e.to_string()))?;
            let seeds = SitemapClient::new(options.user_agent())
                .discover(&root_url, &robots)
                .await;
            if seeds.is_empty() {
                return Err(CrawlError::EmptySitemap(root));
            }
            info!("sitemap mode seeding {} urls", seeds.len());
            seeds
        }
    };

    let retriever = options.retriever.clone().unwrap_or(default_retriever);
    let handler = options
        .handler
        .clone()
        .unwrap_or_else(|| Arc::new(LinkExtractor));

    run_crawl(CrawlJob {
        mode,
        seeds,
        options,
        robots,
        limiter,
        retriever,
        handler,
        cancel_rx,
        state_tx,
    })
    .await
}

/// Process-wide default crawler used by the free functions.
fn global_crawler() -> &'static Crawler {
    static GLOBAL: OnceLock<Crawler> = OnceLock::new();
    GLOBAL.get_or_init(Crawler::new)
}

/// Crawl an explicit URL list with the process-wide [`Crawler`].
pub async fn crawl_urls<I, S>(seeds: I, options: CrawlOptions) -> Result<CrawlReport, CrawlError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    global_crawler().crawl_urls(seeds, options).await
}

/// Crawl a website with the process-wide [`Crawler`].
pub async fn crawl_website(root: &str, options: CrawlOptions) -> Result<CrawlReport, CrawlError> {
    global_crawler().crawl_website(root, options).await
}

/// Crawl from sitemap discovery with the process-wide [`Crawler`].
pub async fn crawl_from_sitemap(
    root: &str,
    options: CrawlOptions,
) -> Result<CrawlReport, CrawlError> {
    global_crawler().crawl_from_sitemap(root, options).await
}
