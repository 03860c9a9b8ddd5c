//! A "prelude" for users of the `catalog-spider` crate.
//!
//! This prelude re-exports the most commonly used traits, structs and
//! functions so that they can be easily imported.
//!
//! # Example
//!
//! ```
//! use catalog_spider::prelude::*;
//! ```

pub use crate::{
    // Core structs
    CrawlSettings,
    Crawler,
    CrawlerBuilder,
    SiteProfile,
    StatCollector,
    // Data
    CrawlRequest,
    FieldValue,
    Item,
    RequestKind,
    // Errors
    CrawlError,
    FetchError,
    SinkError,
    // Essential re-exports for trait implementation
    async_trait,
};

pub use crate::extraction::{Attribute, ExtractionSpec, FieldSpec, LinkRule, Pagination};
pub use crate::fetcher::{
    InteractionStep, PageFetcher, RenderOptions, RenderedDocument, StaticFetcher,
};
pub use crate::normalizer::Normalizer;
pub use crate::site::FetchMode;
pub use crate::sink::{ConsoleSink, CsvSink, ItemSink, MemorySink};
