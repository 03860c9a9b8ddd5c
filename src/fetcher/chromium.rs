//! Chromium adapter for the rendered strategy, via the DevTools protocol.

use super::rendered::{Browser, BrowserPage};
use crate::config::CrawlSettings;
use crate::error::FetchError;
use async_trait::async_trait;
use chromiumoxide::{Browser as CdpBrowser, BrowserConfig, Page};
use futures_util::StreamExt;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info};
use url::Url;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

const SCROLL_SCRIPT: &str = "window.scrollBy(0, document.body.scrollHeight)";

// Ready state plus the number of resource entries seen so far.
const ACTIVITY_SCRIPT: &str =
    "document.readyState + '|' + performance.getEntriesByType('resource').length";

fn browser_error(e: impl std::fmt::Display) -> FetchError {
    FetchError::Browser(e.to_string())
}

/// A launched Chromium process and its event-loop task.
pub struct ChromiumBrowser {
    browser: Mutex<CdpBrowser>,
    handler: JoinHandle<()>,
}

impl ChromiumBrowser {
    pub async fn launch(settings: &CrawlSettings) -> Result<Self, FetchError> {
        let mut builder = BrowserConfig::builder()
            .request_timeout(settings.download_timeout)
            .arg(format!("--user-agent={}", settings.user_agent));
        if !settings.browser_headless {
            builder = builder.with_head();
        }
        let config = builder.build().map_err(FetchError::Setup)?;

        let (browser, mut handler) = CdpBrowser::launch(config)
            .await
            .map_err(|e| FetchError::Setup(e.to_string()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!(
            "Launched Chromium ({})",
            if settings.browser_headless {
                "headless"
            } else {
                "headed"
            }
        );
        Ok(Self {
            browser: Mutex::new(browser),
            handler,
        })
    }
}

#[async_trait]
impl Browser for ChromiumBrowser {
    type Page = ChromiumPage;

    async fn new_page(&self) -> Result<ChromiumPage, FetchError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(browser_error)?;
        Ok(ChromiumPage { page })
    }

    async fn close(&self) -> Result<(), FetchError> {
        let mut browser = self.browser.lock().await;
        browser.close().await.map_err(browser_error)?;
        browser.wait().await.map_err(browser_error)?;
        self.handler.abort();
        info!("Chromium closed");
        Ok(())
    }
}

pub struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn activity(&self) -> Result<(bool, usize), FetchError> {
        let snapshot: String = self
            .page
            .evaluate(ACTIVITY_SCRIPT)
            .await
            .map_err(browser_error)?
            .into_value()
            .map_err(browser_error)?;
        let (state, count) = snapshot.split_once('|').unwrap_or((snapshot.as_str(), "0"));
        Ok((state == "complete", count.parse().unwrap_or(0)))
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn goto(&mut self, url: &Url, limit: Duration) -> Result<Option<u16>, FetchError> {
        match timeout(limit, self.page.goto(url.as_str())).await {
            Err(_) => Err(FetchError::Timeout {
                url: url.to_string(),
            }),
            Ok(Err(e)) => Err(FetchError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }),
            // The DevTools navigation result carries no HTTP status.
            Ok(Ok(_)) => Ok(None),
        }
    }

    async fn wait_for_network_idle(
        &mut self,
        quiet: Duration,
        limit: Duration,
    ) -> Result<(), FetchError> {
        let deadline = Instant::now() + limit;
        let mut last_count = None;
        let mut quiet_since = Instant::now();

        while Instant::now() < deadline {
            let (complete, count) = self.activity().await?;
            if last_count != Some(count) {
                last_count = Some(count);
                quiet_since = Instant::now();
            } else if complete && quiet_since.elapsed() >= quiet {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }

        // Pages with long-polling never go quiet; snapshot what is there.
        debug!("Network never settled within {:?}, continuing", limit);
        Ok(())
    }

    async fn scroll_to_bottom(&mut self) -> Result<(), FetchError> {
        self.page
            .evaluate(SCROLL_SCRIPT)
            .await
            .map_err(browser_error)?;
        Ok(())
    }

    async fn wait_for_selector(
        &mut self,
        selector: &str,
        limit: Duration,
    ) -> Result<(), FetchError> {
        let deadline = Instant::now() + limit;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(FetchError::Timeout {
                    url: format!("waiting for `{}`", selector),
                });
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn content(&mut self) -> Result<String, FetchError> {
        self.page.content().await.map_err(browser_error)
    }

    async fn current_url(&mut self) -> Result<Option<String>, FetchError> {
        self.page.url().await.map_err(browser_error)
    }

    async fn close(self) -> Result<(), FetchError> {
        self.page.close().await.map_err(browser_error)
    }
}
