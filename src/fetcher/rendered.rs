//! Browser-rendered fetch strategy.
//!
//! The strategy is written against two small traits, [`Browser`] and
//! [`BrowserPage`], so the navigation sequence can be exercised without a real
//! browser. The Chromium adapter lives in `chromium.rs`.
//!
//! Every page opened by [`RenderedFetcher`] is wrapped in a [`PageGuard`]. The
//! fetcher releases it explicitly once rendering finishes, successfully or
//! not. If the fetch future is dropped mid-render, the guard's `Drop` schedules
//! the close on the current runtime instead. Either way the guard records the
//! release, so open-page counts and stats agree with what was actually closed.

use super::{PageFetcher, RenderedDocument};
use crate::error::FetchError;
use crate::request::{CrawlRequest, RequestKind};
use crate::stats::StatCollector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// A browser able to open pages.
#[async_trait]
pub trait Browser: Send + Sync + 'static {
    type Page: BrowserPage;

    async fn new_page(&self) -> Result<Self::Page, FetchError>;

    async fn close(&self) -> Result<(), FetchError> {
        Ok(())
    }
}

/// One browser tab.
#[async_trait]
pub trait BrowserPage: Send + 'static {
    /// Navigates to `url`. Returns the main document's status when the
    /// browser reports one.
    async fn goto(&mut self, url: &Url, timeout: Duration) -> Result<Option<u16>, FetchError>;

    /// Waits until no new network activity has been seen for `quiet`.
    async fn wait_for_network_idle(
        &mut self,
        quiet: Duration,
        timeout: Duration,
    ) -> Result<(), FetchError>;

    async fn scroll_to_bottom(&mut self) -> Result<(), FetchError>;

    async fn wait_for_selector(&mut self, selector: &str, timeout: Duration)
        -> Result<(), FetchError>;

    /// Serializes the current DOM.
    async fn content(&mut self) -> Result<String, FetchError>;

    async fn current_url(&mut self) -> Result<Option<String>, FetchError>;

    async fn close(self) -> Result<(), FetchError>;
}

fn default_wait_timeout_ms() -> u64 {
    30_000
}

/// A scripted action run after navigation settles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum InteractionStep {
    /// Scrolls by the full document height to trigger lazy loading.
    ScrollToBottom,
    /// Fails the fetch with a timeout if `selector` never appears.
    WaitForSelector {
        selector: String,
        #[serde(default = "default_wait_timeout_ms")]
        timeout_ms: u64,
    },
    Pause { millis: u64 },
}

fn default_network_quiet_ms() -> u64 {
    500
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

/// Per-site browser behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// How long the network must stay silent before the page counts as loaded.
    #[serde(default = "default_network_quiet_ms")]
    pub network_quiet_ms: u64,
    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,
    #[serde(default)]
    pub listing_steps: Vec<InteractionStep>,
    #[serde(default)]
    pub detail_steps: Vec<InteractionStep>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            network_quiet_ms: default_network_quiet_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            listing_steps: Vec::new(),
            detail_steps: Vec::new(),
        }
    }
}

impl RenderOptions {
    pub fn steps_for(&self, kind: RequestKind) -> &[InteractionStep] {
        match kind {
            RequestKind::Listing => &self.listing_steps,
            RequestKind::Detail => &self.detail_steps,
        }
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    fn network_quiet(&self) -> Duration {
        Duration::from_millis(self.network_quiet_ms)
    }
}

/// Page open and close counts shared by a fetcher and its guards.
#[derive(Default)]
struct PageLedger {
    opened: AtomicUsize,
    released: AtomicUsize,
    stats: Option<Arc<StatCollector>>,
}

impl PageLedger {
    fn record_opened(&self) {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if let Some(stats) = &self.stats {
            stats.increment_browser_pages_opened();
        }
    }

    fn record_released(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
        if let Some(stats) = &self.stats {
            stats.increment_browser_pages_closed();
        }
    }

    fn open_pages(&self) -> usize {
        self.opened
            .load(Ordering::SeqCst)
            .saturating_sub(self.released.load(Ordering::SeqCst))
    }
}

/// Owns an open page and guarantees it is closed exactly once.
pub struct PageGuard<P: BrowserPage> {
    page: Option<P>,
    url: String,
    ledger: Option<Arc<PageLedger>>,
}

impl<P: BrowserPage> PageGuard<P> {
    pub fn new(page: P, url: impl Into<String>) -> Self {
        Self {
            page: Some(page),
            url: url.into(),
            ledger: None,
        }
    }

    fn tracked(page: P, url: impl Into<String>, ledger: Arc<PageLedger>) -> Self {
        Self {
            page: Some(page),
            url: url.into(),
            ledger: Some(ledger),
        }
    }

    fn record_released(&self) {
        if let Some(ledger) = &self.ledger {
            ledger.record_released();
        }
    }

    pub fn page_mut(&mut self) -> Result<&mut P, FetchError> {
        self.page
            .as_mut()
            .ok_or_else(|| FetchError::Browser(format!("page for {} already released", self.url)))
    }

    /// Closes the page now.
    pub async fn release(mut self) -> Result<(), FetchError> {
        let Some(page) = self.page.take() else {
            return Ok(());
        };
        self.record_released();
        page.close().await
    }
}

impl<P: BrowserPage> Drop for PageGuard<P> {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        self.record_released();
        let url = std::mem::take(&mut self.url);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Closing abandoned browser page for {}", url);
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!("Failed to close browser page for {}: {}", url, e);
                    }
                });
            }
            Err(_) => warn!("No runtime available to close browser page for {}", url),
        }
    }
}

/// Fetches pages by rendering them in a browser.
pub struct RenderedFetcher<B: Browser> {
    browser: B,
    options: RenderOptions,
    ledger: Arc<PageLedger>,
}

impl<B: Browser> RenderedFetcher<B> {
    pub fn new(browser: B, options: RenderOptions) -> Self {
        Self {
            browser,
            options,
            ledger: Arc::new(PageLedger::default()),
        }
    }

    /// Reports page opens, closes and finished renders to `stats`.
    pub fn with_stats(mut self, stats: Arc<StatCollector>) -> Self {
        self.ledger = Arc::new(PageLedger {
            stats: Some(stats),
            ..PageLedger::default()
        });
        self
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// Pages opened and not yet handed back for closing.
    pub fn open_pages(&self) -> usize {
        self.ledger.open_pages()
    }

    async fn render(
        &self,
        page: &mut B::Page,
        request: &CrawlRequest,
    ) -> Result<RenderedDocument, FetchError> {
        let timeout = self.options.navigation_timeout();
        let status = page.goto(&request.url, timeout).await?;
        if let Some(status) = status.filter(|s| !(200..300).contains(s)) {
            return Err(FetchError::Status {
                url: request.url.to_string(),
                status,
            });
        }

        page.wait_for_network_idle(self.options.network_quiet(), timeout)
            .await?;

        for step in self.options.steps_for(request.kind) {
            match step {
                InteractionStep::ScrollToBottom => page.scroll_to_bottom().await?,
                InteractionStep::WaitForSelector {
                    selector,
                    timeout_ms,
                } => {
                    page.wait_for_selector(selector, Duration::from_millis(*timeout_ms))
                        .await?
                }
                InteractionStep::Pause { millis } => {
                    tokio::time::sleep(Duration::from_millis(*millis)).await
                }
            }
        }

        let html = page.content().await?;
        let final_url = page
            .current_url()
            .await?
            .and_then(|u| Url::parse(&u).ok())
            .unwrap_or_else(|| request.url.clone());

        Ok(RenderedDocument::new(
            request.clone(),
            final_url,
            status.unwrap_or(200),
            html,
        ))
    }
}

#[async_trait]
impl<B: Browser> PageFetcher for RenderedFetcher<B> {
    fn name(&self) -> &'static str {
        "rendered"
    }

    async fn fetch(&self, request: &CrawlRequest) -> Result<RenderedDocument, FetchError> {
        let page = self.browser.new_page().await?;
        self.ledger.record_opened();
        let mut guard = PageGuard::tracked(page, request.url.as_str(), Arc::clone(&self.ledger));

        let outcome = match guard.page_mut() {
            Ok(page) => self.render(page, request).await,
            Err(e) => Err(e),
        };

        if let Err(e) = guard.release().await {
            warn!("Failed to close browser page for {}: {}", request.url, e);
        }
        if let (Ok(_), Some(stats)) = (&outcome, &self.ledger.stats) {
            stats.increment_pages_rendered();
        }

        outcome
    }

    async fn shutdown(&self) -> Result<(), FetchError> {
        let leaked = self.open_pages();
        if leaked > 0 {
            warn!("{} browser pages still open at shutdown", leaked);
        }
        self.browser.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Tally {
        opened: AtomicUsize,
        closed: AtomicUsize,
        scrolls: AtomicUsize,
    }

    struct FakeBrowser {
        tally: Arc<Tally>,
        fail_navigation: bool,
        status: Option<u16>,
    }

    struct FakePage {
        tally: Arc<Tally>,
        fail_navigation: bool,
        status: Option<u16>,
        visited: Option<Url>,
    }

    #[async_trait]
    impl Browser for FakeBrowser {
        type Page = FakePage;

        async fn new_page(&self) -> Result<FakePage, FetchError> {
            self.tally.opened.fetch_add(1, Ordering::SeqCst);
            Ok(FakePage {
                tally: self.tally.clone(),
                fail_navigation: self.fail_navigation,
                status: self.status,
                visited: None,
            })
        }
    }

    #[async_trait]
    impl BrowserPage for FakePage {
        async fn goto(&mut self, url: &Url, _: Duration) -> Result<Option<u16>, FetchError> {
            if self.fail_navigation {
                return Err(FetchError::Navigation {
                    url: url.to_string(),
                    message: "net::ERR_NAME_NOT_RESOLVED".into(),
                });
            }
            self.visited = Some(url.clone());
            Ok(self.status)
        }

        async fn wait_for_network_idle(&mut self, _: Duration, _: Duration) -> Result<(), FetchError> {
            Ok(())
        }

        async fn scroll_to_bottom(&mut self) -> Result<(), FetchError> {
            self.tally.scrolls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn wait_for_selector(&mut self, selector: &str, _: Duration) -> Result<(), FetchError> {
            if selector == "div.forever" {
                std::future::pending::<()>().await;
            }
            if selector == "div.never" {
                return Err(FetchError::Timeout {
                    url: "waiting for div.never".into(),
                });
            }
            Ok(())
        }

        async fn content(&mut self) -> Result<String, FetchError> {
            Ok("<html><body><div class=\"products\"></div></body></html>".into())
        }

        async fn current_url(&mut self) -> Result<Option<String>, FetchError> {
            Ok(self.visited.as_ref().map(|u| u.to_string()))
        }

        async fn close(self) -> Result<(), FetchError> {
            self.tally.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn fetcher(
        fail_navigation: bool,
        status: Option<u16>,
        options: RenderOptions,
    ) -> (RenderedFetcher<FakeBrowser>, Arc<Tally>) {
        let tally = Arc::new(Tally::default());
        let browser = FakeBrowser {
            tally: tally.clone(),
            fail_navigation,
            status,
        };
        (RenderedFetcher::new(browser, options), tally)
    }

    fn listing() -> CrawlRequest {
        CrawlRequest::listing(Url::parse("https://shop.test/libros/comics/411000000").unwrap())
    }

    #[tokio::test]
    async fn releases_page_after_successful_render() {
        let options = RenderOptions {
            listing_steps: vec![
                InteractionStep::ScrollToBottom,
                InteractionStep::WaitForSelector {
                    selector: "div.products".into(),
                    timeout_ms: 1_000,
                },
            ],
            ..RenderOptions::default()
        };
        let (fetcher, tally) = fetcher(false, Some(200), options);
        let stats = Arc::new(StatCollector::new());
        let fetcher = fetcher.with_stats(stats.clone());

        let doc = fetcher.fetch(&listing()).await.unwrap();

        assert!(doc.html.contains("products"));
        assert_eq!(doc.status, 200);
        assert_eq!(doc.final_url.as_str(), "https://shop.test/libros/comics/411000000");
        assert_eq!(tally.scrolls.load(Ordering::SeqCst), 1);
        assert_eq!(tally.opened.load(Ordering::SeqCst), 1);
        assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.open_pages(), 0);
        assert_eq!(stats.pages_rendered.load(Ordering::SeqCst), 1);
        assert_eq!(stats.browser_pages_closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_render_records_its_page_as_closed() {
        let options = RenderOptions {
            listing_steps: vec![InteractionStep::WaitForSelector {
                selector: "div.forever".into(),
                timeout_ms: 60_000,
            }],
            ..RenderOptions::default()
        };
        let (fetcher, tally) = fetcher(false, Some(200), options);
        let stats = Arc::new(StatCollector::new());
        let fetcher = fetcher.with_stats(stats.clone());

        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), fetcher.fetch(&listing())).await;
        assert!(cancelled.is_err());

        for _ in 0..10 {
            if tally.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
        assert_eq!(fetcher.open_pages(), 0);
        assert_eq!(stats.browser_pages_opened.load(Ordering::SeqCst), 1);
        assert_eq!(stats.browser_pages_closed.load(Ordering::SeqCst), 1);
        assert_eq!(stats.pages_rendered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn releases_page_after_every_failure() {
        let (failing_nav, tally_nav) = fetcher(true, None, RenderOptions::default());
        let (bad_status, tally_status) = fetcher(false, Some(503), RenderOptions::default());
        let (missing_container, tally_wait) = fetcher(
            false,
            Some(200),
            RenderOptions {
                listing_steps: vec![InteractionStep::WaitForSelector {
                    selector: "div.never".into(),
                    timeout_ms: 10,
                }],
                ..RenderOptions::default()
            },
        );

        assert!(matches!(
            failing_nav.fetch(&listing()).await,
            Err(FetchError::Navigation { .. })
        ));
        assert!(matches!(
            bad_status.fetch(&listing()).await,
            Err(FetchError::Status { status: 503, .. })
        ));
        assert!(matches!(
            missing_container.fetch(&listing()).await,
            Err(FetchError::Timeout { .. })
        ));

        for tally in [tally_nav, tally_status, tally_wait] {
            assert_eq!(tally.opened.load(Ordering::SeqCst), 1);
            assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn detail_pages_skip_listing_steps() {
        let options = RenderOptions {
            listing_steps: vec![InteractionStep::ScrollToBottom],
            ..RenderOptions::default()
        };
        let (fetcher, tally) = fetcher(false, None, options);
        let root = listing();
        let detail = CrawlRequest::detail(
            Url::parse("https://shop.test/libro-one-piece/9788468471556/1").unwrap(),
            &root.url,
        );

        let doc = fetcher.fetch(&detail).await.unwrap();

        assert_eq!(doc.status, 200);
        assert_eq!(tally.scrolls.load(Ordering::SeqCst), 0);
        assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_guard_closes_page_in_background() {
        let tally = Arc::new(Tally::default());
        let browser = FakeBrowser {
            tally: tally.clone(),
            fail_navigation: false,
            status: None,
        };
        let page = browser.new_page().await.unwrap();
        drop(PageGuard::new(page, "https://shop.test/"));

        for _ in 0..10 {
            if tally.closed.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(tally.closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn steps_deserialize_from_profile_json() {
        let options: RenderOptions = serde_json::from_str(
            r#"{"listing_steps": [
                {"action": "scroll_to_bottom"},
                {"action": "wait_for_selector", "selector": "div.products"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(options.network_quiet_ms, 500);
        assert_eq!(
            options.listing_steps[1],
            InteractionStep::WaitForSelector {
                selector: "div.products".into(),
                timeout_ms: 30_000
            }
        );
        assert!(options.detail_steps.is_empty());
    }
}
