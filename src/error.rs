//! Error types for the crawl engine.
//!
//! Failures are layered by how far they are allowed to travel:
//!
//! - [`FetchError`] stays with a single request. It is retried by the
//!   downloader and, once retries are exhausted, the request is dropped.
//! - [`ExtractionError`] and [`NormalizationError`] stay with a single field.
//!   The field becomes null or absent and the item is still emitted.
//! - [`SinkError`] stays with a single item.
//! - [`CrawlError`] is the only error that aborts a run: bad configuration,
//!   malformed site profiles, or seeds that could not be fetched at all.

use thiserror::Error;

/// A failure to acquire a page.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("transport error for {url}: {message}")]
    Transport { url: String, message: String },

    #[error("browser error: {0}")]
    Browser(String),

    #[error("fetcher setup failed: {0}")]
    Setup(String),
}

impl FetchError {
    /// Whether the failure suggests the server wants us to slow down.
    pub fn is_throttle_signal(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Timeout { .. } | FetchError::Transport { .. } => true,
            _ => false,
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                matches!(*status, 408 | 429 | 500 | 502 | 503 | 504 | 522 | 524)
            }
            FetchError::Setup(_) => false,
            _ => true,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// A selector matched but its result could not be turned into a value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractionError {
    #[error("element matched by `{selector}` has no `{attribute}` attribute")]
    MissingAttribute { selector: String, attribute: String },

    #[error("`{value}` cannot be resolved against {base}")]
    InvalidUrl { value: String, base: String },
}

/// A normalizer could not coerce a raw value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationError {
    #[error("`{0}` is not a numeric amount")]
    NotNumeric(String),

    #[error("value is empty after normalization")]
    Empty,
}

/// A failure to hand an item to its sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("sink is closed")]
    Closed,
}

/// A run-aborting failure.
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("invalid selector `{selector}` for field `{field}`: {message}")]
    InvalidSelector {
        field: String,
        selector: String,
        message: String,
    },

    #[error("invalid URL `{0}`: {1}")]
    InvalidUrl(String, #[source] url::ParseError),

    #[error("none of the {0} seed URLs could be fetched")]
    SeedsUnreachable(usize),

    #[error(transparent)]
    Fetcher(#[from] FetchError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fetch_failures() {
        let status = |status| FetchError::Status {
            url: "https://shop.test/".into(),
            status,
        };

        assert!(status(429).is_throttle_signal());
        assert!(status(503).is_throttle_signal());
        assert!(!status(404).is_throttle_signal());
        assert!(status(503).is_retryable());
        assert!(!status(404).is_retryable());
        assert!(!FetchError::Setup("no browser".into()).is_retryable());
        assert!(FetchError::Timeout {
            url: "https://shop.test/".into()
        }
        .is_throttle_signal());
        assert_eq!(status(404).status(), Some(404));
    }
}
