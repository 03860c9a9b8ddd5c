//! # Fetcher Module
//!
//! Page acquisition behind one interface.
//!
//! ## Overview
//!
//! A [`PageFetcher`] turns a [`CrawlRequest`] into a [`RenderedDocument`].
//! Two strategies are provided and chosen per site, never at runtime:
//!
//! - [`StaticFetcher`]: a plain HTTP GET, for pages whose content is in the
//!   initial server response.
//! - [`RenderedFetcher`]: drives a browser page through navigation, network
//!   quiescence and interaction steps (scrolling, waiting for a container),
//!   then snapshots the DOM. The browser page is released on every exit path.
//!
//! Retries are not the fetcher's business; the downloader task retries failed
//! fetches with the throttle's delay as backoff.

use crate::error::FetchError;
use crate::request::CrawlRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use url::Url;

#[cfg(feature = "browser")]
pub mod chromium;
pub mod rendered;
pub mod static_fetcher;

#[cfg(feature = "browser")]
pub use chromium::ChromiumBrowser;
pub use rendered::{
    Browser, BrowserPage, InteractionStep, PageGuard, RenderOptions, RenderedFetcher,
};
pub use static_fetcher::StaticFetcher;

/// A fetched page, ready for extraction.
#[derive(Debug, Clone)]
pub struct RenderedDocument {
    /// The request that produced this document.
    pub request: CrawlRequest,
    /// The URL after redirects. Relative links resolve against it.
    pub final_url: Url,
    pub status: u16,
    /// Serialized DOM (rendered strategy) or response body (static strategy).
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

impl RenderedDocument {
    pub fn new(request: CrawlRequest, final_url: Url, status: u16, html: String) -> Self {
        Self {
            request,
            final_url,
            status,
            html,
            fetched_at: Utc::now(),
        }
    }

    /// Size of the document in bytes.
    pub fn len(&self) -> usize {
        self.html.len()
    }

    pub fn is_empty(&self) -> bool {
        self.html.is_empty()
    }
}

/// Acquires pages for the crawler.
#[async_trait]
pub trait PageFetcher: Send + Sync + 'static {
    /// A short name for logs.
    fn name(&self) -> &'static str;

    async fn fetch(&self, request: &CrawlRequest) -> Result<RenderedDocument, FetchError>;

    /// Releases long-lived resources such as a browser process.
    async fn shutdown(&self) -> Result<(), FetchError> {
        Ok(())
    }
}
