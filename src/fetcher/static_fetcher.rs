//! Direct HTTP fetch strategy.

use super::{PageFetcher, RenderedDocument};
use crate::config::CrawlSettings;
use crate::error::FetchError;
use crate::request::CrawlRequest;
use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, trace};
use url::Url;

/// Fetches pages with a single `GET`, without running scripts.
#[derive(Debug, Clone)]
pub struct StaticFetcher {
    client: Client,
}

impl StaticFetcher {
    /// Builds a client with the configured user agent and timeouts.
    pub fn new(settings: &CrawlSettings) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(settings.user_agent.as_str())
            .connect_timeout(settings.dns_timeout)
            .timeout(settings.download_timeout)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Setup(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wraps an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn transport_error(url: &Url, error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Transport {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn fetch(&self, request: &CrawlRequest) -> Result<RenderedDocument, FetchError> {
        trace!("GET {}", request.url);
        let response = self
            .client
            .get(request.url.clone())
            .send()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: request.url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().clone();
        // `text()` decodes using the charset the server declares.
        let html = response
            .text()
            .await
            .map_err(|e| transport_error(&request.url, e))?;

        debug!("Fetched {} ({}, {} bytes)", final_url, status, html.len());
        Ok(RenderedDocument::new(
            request.clone(),
            final_url,
            status.as_u16(),
            html,
        ))
    }
}
