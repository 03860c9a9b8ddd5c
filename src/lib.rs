//! # catalog-spider
//!
//! Crawl-and-extract engine for paginated retail book catalogs.
//!
//! Starting from a site's seed listing pages, the crawler discovers the full
//! set of listing pages and product detail pages, extracts a fixed schema of
//! book fields from each detail page, normalizes the values and writes one
//! item per product to a sink. Requests are paced by an adaptive throttle and
//! pages can be fetched statically or rendered in a browser.
//!
//! ## Example
//!
//! ```rust,ignore
//! use catalog_spider::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CrawlError> {
//!     let settings = CrawlSettings::from_env()?;
//!     let site = SiteProfile::casa_del_libro();
//!     let sink = CsvSink::create(&settings.feed_uri, site.compile()?.columns())?;
//!
//!     let crawler = CrawlerBuilder::new(site)
//!         .settings(settings)
//!         .sink(sink)
//!         .build()
//!         .await?;
//!     let stats = crawler.get_stats();
//!     crawler.start_crawl().await?;
//!     println!("{}", stats);
//!     Ok(())
//! }
//! ```

pub mod builder;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extraction;
pub mod fetcher;
pub mod item;
pub mod normalizer;
pub mod prelude;
pub mod request;
pub mod scheduler;
pub mod sink;
pub mod site;
pub mod state;
pub mod stats;
pub mod throttle;

pub use builder::{CrawlerBuilder, CrawlerConfig};
pub use config::CrawlSettings;
pub use crawler::Crawler;
pub use error::{CrawlError, ExtractionError, FetchError, NormalizationError, SinkError};
pub use item::{FieldValue, Item};
pub use request::{CrawlRequest, RequestKind};
pub use scheduler::Scheduler;
pub use site::{CompiledSite, FetchMode, SiteProfile};
pub use stats::StatCollector;
pub use throttle::{ThrottleConfig, ThrottleController};

pub use async_trait::async_trait;
pub use tokio;
