//! Crawl configuration: the options struct and its builder.

pub mod builder;
pub mod types;

pub use builder::CrawlOptionsBuilder;
pub use types::{CrawlMode, CrawlOptions};
