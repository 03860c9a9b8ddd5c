//! # Builder Module
//!
//! Provides the `CrawlerBuilder`, a fluent API for constructing and configuring
//! `Crawler` instances for one site.
//!
//! ## Overview
//!
//! The builder assembles a site profile, crawl settings, a page fetcher and an
//! item sink into a ready-to-run [`Crawler`]. Everything that can be checked
//! before the first request is checked in [`CrawlerBuilder::build`]: settings
//! are validated and the profile's seeds and selectors are compiled.
//!
//! ## Defaults
//!
//! - **Fetcher**: chosen from the profile's fetch mode. Static profiles get a
//!   [`StaticFetcher`]; rendered profiles launch Chromium (feature `browser`).
//! - **Sink**: a [`CsvSink`] at `settings.feed_uri`, one column per field.
//!
//! ## Example
//!
//! ```rust,ignore
//! use catalog_spider::{CrawlSettings, CrawlerBuilder, SiteProfile};
//!
//! async fn crawl() -> Result<(), catalog_spider::CrawlError> {
//!     let crawler = CrawlerBuilder::new(SiteProfile::casa_del_libro())
//!         .settings(CrawlSettings::from_env()?)
//!         .build()
//!         .await?;
//!
//!     crawler.start_crawl().await
//! }
//! ```

use crate::config::CrawlSettings;
use crate::crawler::Crawler;
use crate::error::CrawlError;
use crate::fetcher::{PageFetcher, StaticFetcher};
use crate::scheduler::Scheduler;
use crate::sink::{CsvSink, ItemSink};
use crate::site::{CompiledSite, FetchMode, SiteProfile};
use crate::stats::StatCollector;
use crate::throttle::ThrottleController;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Configuration for the crawler's plumbing.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// The capacity of communication channels between components.
    pub channel_capacity: usize,
    /// How long shutdown waits for tasks to drain before aborting them.
    pub shutdown_timeout: Duration,
    /// Whether Ctrl-C starts a graceful shutdown.
    pub handle_ctrl_c: bool,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        CrawlerConfig {
            channel_capacity: 1000,
            shutdown_timeout: Duration::from_secs(30),
            handle_ctrl_c: true,
        }
    }
}

pub struct CrawlerBuilder {
    crawler_config: CrawlerConfig,
    settings: CrawlSettings,
    profile: SiteProfile,
    fetcher: Option<Arc<dyn PageFetcher>>,
    sink: Option<Arc<dyn ItemSink>>,
    stats: Arc<StatCollector>,
}

impl CrawlerBuilder {
    /// Creates a new `CrawlerBuilder` for a site, with default settings.
    pub fn new(profile: SiteProfile) -> Self {
        Self {
            crawler_config: CrawlerConfig::default(),
            settings: CrawlSettings::default(),
            profile,
            fetcher: None,
            sink: None,
            stats: Arc::new(StatCollector::new()),
        }
    }

    pub fn settings(mut self, settings: CrawlSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Sets the capacity of communication channels between components.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.crawler_config.channel_capacity = capacity;
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.crawler_config.shutdown_timeout = timeout;
        self
    }

    /// Enables or disables the Ctrl-C handler. Embedders that manage signals
    /// themselves should turn it off.
    pub fn handle_ctrl_c(mut self, enabled: bool) -> Self {
        self.crawler_config.handle_ctrl_c = enabled;
        self
    }

    /// Uses `fetcher` instead of the one implied by the profile's fetch mode.
    pub fn fetcher<F: PageFetcher>(mut self, fetcher: F) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    /// Uses `sink` instead of the CSV feed.
    pub fn sink<K: ItemSink>(mut self, sink: K) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }

    /// The collector the built crawler will report to.
    pub fn stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    /// Builds the `Crawler` instance.
    pub async fn build(self) -> Result<Crawler, CrawlError> {
        self.validate()?;
        let site = self.profile.compile()?;
        debug!(
            "Compiled site '{}' with {} seeds and {} output columns",
            site.name,
            site.seeds.len(),
            site.columns().len()
        );

        let sink = match self.sink {
            Some(sink) => sink,
            None => Arc::new(CsvSink::create(&self.settings.feed_uri, site.columns())?),
        };
        let fetcher = match self.fetcher {
            Some(fetcher) => fetcher,
            None => default_fetcher(&site, &self.settings, &self.stats).await?,
        };

        Ok(Crawler::new(
            Scheduler::new(),
            site,
            fetcher,
            sink,
            ThrottleController::new(self.settings.throttle_config()),
            self.stats,
            self.crawler_config,
            self.settings.retry_times,
            self.settings.item_limit,
        ))
    }

    fn validate(&self) -> Result<(), CrawlError> {
        self.settings.validate()?;
        if self.crawler_config.channel_capacity == 0 {
            return Err(CrawlError::Configuration(
                "channel_capacity must be greater than 0.".to_string(),
            ));
        }
        Ok(())
    }
}

async fn default_fetcher(
    site: &CompiledSite,
    settings: &CrawlSettings,
    stats: &Arc<StatCollector>,
) -> Result<Arc<dyn PageFetcher>, CrawlError> {
    match &site.fetch_mode {
        FetchMode::Static => Ok(Arc::new(StaticFetcher::new(settings)?)),
        #[cfg(feature = "browser")]
        FetchMode::Rendered(options) => {
            use crate::fetcher::{ChromiumBrowser, RenderedFetcher};

            let browser = ChromiumBrowser::launch(settings).await?;
            let fetcher =
                RenderedFetcher::new(browser, options.clone()).with_stats(Arc::clone(stats));
            Ok(Arc::new(fetcher))
        }
        #[cfg(not(feature = "browser"))]
        FetchMode::Rendered(_) => {
            let _ = stats;
            Err(CrawlError::Configuration(format!(
                "site `{}` needs a browser; rebuild with the `browser` feature",
                site.name
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{ExtractionSpec, FieldSpec};

    fn static_profile() -> SiteProfile {
        SiteProfile {
            name: "example-books".into(),
            start_urls: vec!["https://books.example/catalogue/".into()],
            fetch_mode: FetchMode::Static,
            listing: ExtractionSpec::default(),
            detail: ExtractionSpec::default().field(FieldSpec::new("title", "h1")),
        }
    }

    #[tokio::test]
    async fn defaults_to_a_csv_feed_for_static_sites() {
        let dir = tempfile::tempdir().unwrap();
        let settings = CrawlSettings {
            feed_uri: dir.path().join("books.csv"),
            ..CrawlSettings::default()
        };

        let crawler = CrawlerBuilder::new(static_profile())
            .settings(settings)
            .build()
            .await
            .unwrap();

        assert_eq!(crawler.site().seeds.len(), 1);
        let header = std::fs::read_to_string(dir.path().join("books.csv")).unwrap();
        assert_eq!(header.trim_end(), "url,parent_url,title");
    }

    #[tokio::test]
    async fn rejects_zero_channel_capacity_and_bad_profiles() {
        let result = CrawlerBuilder::new(static_profile())
            .channel_capacity(0)
            .build()
            .await;
        assert!(matches!(result, Err(CrawlError::Configuration(_))));

        let mut profile = static_profile();
        profile.start_urls = vec!["books.example".into()];
        let result = CrawlerBuilder::new(profile).build().await;
        assert!(matches!(result, Err(CrawlError::InvalidUrl(..))));
    }
}
