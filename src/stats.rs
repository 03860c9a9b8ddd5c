//! # Statistics Module
//!
//! Counters describing a crawl run.
//!
//! ## Overview
//!
//! The `StatCollector` is shared by every crawler task and updated with atomic
//! operations. At the end of a run the orchestrator logs it; callers can also
//! export it as JSON or Markdown.
//!
//! ## Key Metrics Tracked
//!
//! - **Requests**: enqueued, duplicates skipped, sent, succeeded, failed, retried
//! - **Responses**: received, status code distribution, bytes downloaded
//! - **Browser**: pages rendered, pages opened and closed
//! - **Items**: scraped, emitted to the sink, dropped, field failures
//!
//! ## Example
//!
//! ```rust,ignore
//! let stats = crawler.get_stats();
//! crawler.start_crawl().await?;
//! println!("{}", stats);
//! println!("{}", stats.to_json_string_pretty()?);
//! ```

use crate::error::CrawlError;
use dashmap::DashMap;
use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::{Duration, Instant},
};

// Point-in-time copy used by every report format.
struct StatsSnapshot {
    requests_enqueued: usize,
    duplicates_skipped: usize,
    requests_sent: usize,
    requests_succeeded: usize,
    requests_failed: usize,
    requests_retried: usize,
    responses_received: usize,
    total_bytes_downloaded: usize,
    pages_rendered: usize,
    browser_pages_opened: usize,
    browser_pages_closed: usize,
    items_scraped: usize,
    items_emitted: usize,
    items_dropped: usize,
    field_failures: usize,
    response_status_counts: BTreeMap<u16, usize>,
    average_fetch_time: Duration,
    elapsed_duration: Duration,
}

impl StatsSnapshot {
    fn formatted_duration(&self) -> String {
        format!("{:?}", self.elapsed_duration)
    }

    fn per_second(&self, count: usize) -> f64 {
        let total_seconds = self.elapsed_duration.as_secs();
        if total_seconds > 0 {
            count as f64 / total_seconds as f64
        } else {
            0.0
        }
    }

    fn formatted_bytes(&self) -> String {
        const KB: usize = 1024;
        const MB: usize = 1024 * KB;
        const GB: usize = 1024 * MB;

        if self.total_bytes_downloaded >= GB {
            format!("{:.2} GB", self.total_bytes_downloaded as f64 / GB as f64)
        } else if self.total_bytes_downloaded >= MB {
            format!("{:.2} MB", self.total_bytes_downloaded as f64 / MB as f64)
        } else if self.total_bytes_downloaded >= KB {
            format!("{:.2} KB", self.total_bytes_downloaded as f64 / KB as f64)
        } else {
            format!("{} B", self.total_bytes_downloaded)
        }
    }

    fn formatted_statuses(&self, separator: &str, markdown: bool) -> String {
        self.response_status_counts
            .iter()
            .map(|(code, count)| {
                if markdown {
                    format!("- **{}**: {}", code, count)
                } else {
                    format!("{}: {}", code, count)
                }
            })
            .collect::<Vec<String>>()
            .join(separator)
    }
}

/// Collects statistics about a crawl run.
#[derive(Debug, serde::Serialize)]
pub struct StatCollector {
    #[serde(skip)]
    pub start_time: Instant,

    pub requests_enqueued: AtomicUsize,
    pub duplicates_skipped: AtomicUsize,
    pub requests_sent: AtomicUsize,
    pub requests_succeeded: AtomicUsize,
    pub requests_failed: AtomicUsize,
    pub requests_retried: AtomicUsize,

    pub responses_received: AtomicUsize,
    pub response_status_counts: DashMap<u16, usize>,
    pub total_bytes_downloaded: AtomicUsize,
    pub total_fetch_millis: AtomicU64,

    pub pages_rendered: AtomicUsize,
    pub browser_pages_opened: AtomicUsize,
    pub browser_pages_closed: AtomicUsize,

    pub items_scraped: AtomicUsize,
    pub items_emitted: AtomicUsize,
    pub items_dropped: AtomicUsize,
    pub field_failures: AtomicUsize,
}

impl StatCollector {
    pub fn new() -> Self {
        StatCollector {
            start_time: Instant::now(),
            requests_enqueued: AtomicUsize::new(0),
            duplicates_skipped: AtomicUsize::new(0),
            requests_sent: AtomicUsize::new(0),
            requests_succeeded: AtomicUsize::new(0),
            requests_failed: AtomicUsize::new(0),
            requests_retried: AtomicUsize::new(0),
            responses_received: AtomicUsize::new(0),
            response_status_counts: DashMap::new(),
            total_bytes_downloaded: AtomicUsize::new(0),
            total_fetch_millis: AtomicU64::new(0),
            pages_rendered: AtomicUsize::new(0),
            browser_pages_opened: AtomicUsize::new(0),
            browser_pages_closed: AtomicUsize::new(0),
            items_scraped: AtomicUsize::new(0),
            items_emitted: AtomicUsize::new(0),
            items_dropped: AtomicUsize::new(0),
            field_failures: AtomicUsize::new(0),
        }
    }

    fn snapshot(&self) -> StatsSnapshot {
        let response_status_counts = self
            .response_status_counts
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();

        let received = self.responses_received.load(Ordering::SeqCst);
        let average_fetch_time = if received > 0 {
            Duration::from_millis(self.total_fetch_millis.load(Ordering::SeqCst) / received as u64)
        } else {
            Duration::ZERO
        };

        StatsSnapshot {
            requests_enqueued: self.requests_enqueued.load(Ordering::SeqCst),
            duplicates_skipped: self.duplicates_skipped.load(Ordering::SeqCst),
            requests_sent: self.requests_sent.load(Ordering::SeqCst),
            requests_succeeded: self.requests_succeeded.load(Ordering::SeqCst),
            requests_failed: self.requests_failed.load(Ordering::SeqCst),
            requests_retried: self.requests_retried.load(Ordering::SeqCst),
            responses_received: received,
            total_bytes_downloaded: self.total_bytes_downloaded.load(Ordering::SeqCst),
            pages_rendered: self.pages_rendered.load(Ordering::SeqCst),
            browser_pages_opened: self.browser_pages_opened.load(Ordering::SeqCst),
            browser_pages_closed: self.browser_pages_closed.load(Ordering::SeqCst),
            items_scraped: self.items_scraped.load(Ordering::SeqCst),
            items_emitted: self.items_emitted.load(Ordering::SeqCst),
            items_dropped: self.items_dropped.load(Ordering::SeqCst),
            field_failures: self.field_failures.load(Ordering::SeqCst),
            response_status_counts,
            average_fetch_time,
            elapsed_duration: self.start_time.elapsed(),
        }
    }

    pub(crate) fn increment_requests_enqueued(&self) {
        self.requests_enqueued.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_duplicates_skipped(&self) {
        self.duplicates_skipped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_sent(&self) {
        self.requests_sent.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_succeeded(&self) {
        self.requests_succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_requests_retried(&self) {
        self.requests_retried.fetch_add(1, Ordering::SeqCst);
    }

    /// Records a received document: its status, size and fetch latency.
    pub(crate) fn record_response(&self, status_code: u16, bytes: usize, latency: Duration) {
        self.responses_received.fetch_add(1, Ordering::SeqCst);
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
        self.total_bytes_downloaded.fetch_add(bytes, Ordering::SeqCst);
        self.total_fetch_millis
            .fetch_add(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Records a failed attempt that still produced a status code.
    pub(crate) fn record_response_status(&self, status_code: u16) {
        *self.response_status_counts.entry(status_code).or_insert(0) += 1;
    }

    pub(crate) fn increment_pages_rendered(&self) {
        self.pages_rendered.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_browser_pages_opened(&self) {
        self.browser_pages_opened.fetch_add(1, Ordering::SeqCst);
    }

    pub fn increment_browser_pages_closed(&self) {
        self.browser_pages_closed.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_scraped(&self) {
        self.items_scraped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_emitted(&self) {
        self.items_emitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn increment_items_dropped(&self) {
        self.items_dropped.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn add_field_failures(&self, count: usize) {
        self.field_failures.fetch_add(count, Ordering::SeqCst);
    }

    pub fn items_emitted(&self) -> usize {
        self.items_emitted.load(Ordering::SeqCst)
    }

    pub fn requests_succeeded(&self) -> usize {
        self.requests_succeeded.load(Ordering::SeqCst)
    }

    pub fn to_json_string(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn to_json_string_pretty(&self) -> Result<String, CrawlError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Exports the current statistics to a Markdown formatted string.
    pub fn to_markdown_string(&self) -> String {
        let snapshot = self.snapshot();
        let status_codes = snapshot.formatted_statuses("\n", true);
        let status_codes_output = if status_codes.is_empty() {
            "N/A".to_string()
        } else {
            status_codes
        };

        format!(
            r#"# Crawl Statistics Report

- **Duration**: {}
- **Average Speed**: {:.2} req/s, {:.2} item/s
- **Average Fetch Time**: {:?}

## Requests
| Metric     | Count |
|------------|-------|
| Enqueued   | {}     |
| Duplicates | {}     |
| Sent       | {}     |
| Succeeded  | {}     |
| Failed     | {}     |
| Retried    | {}     |

## Responses
| Metric     | Count |
|------------|-------|
| Received   | {}     |
| Rendered   | {}     |
| Downloaded | {}     |

## Browser Pages
| Metric     | Count |
|------------|-------|
| Opened     | {}     |
| Closed     | {}     |

## Items
| Metric         | Count |
|----------------|-------|
| Scraped        | {}     |
| Emitted        | {}     |
| Dropped        | {}     |
| Field failures | {}     |

## Status Codes
{}
"#,
            snapshot.formatted_duration(),
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.items_emitted),
            snapshot.average_fetch_time,
            snapshot.requests_enqueued,
            snapshot.duplicates_skipped,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_retried,
            snapshot.responses_received,
            snapshot.pages_rendered,
            snapshot.formatted_bytes(),
            snapshot.browser_pages_opened,
            snapshot.browser_pages_closed,
            snapshot.items_scraped,
            snapshot.items_emitted,
            snapshot.items_dropped,
            snapshot.field_failures,
            status_codes_output
        )
    }
}

impl Default for StatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StatCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let snapshot = self.snapshot();

        writeln!(f, "\nCrawl Statistics")?;
        writeln!(f, "----------------")?;
        writeln!(f, "  duration : {}", snapshot.formatted_duration())?;
        writeln!(
            f,
            "  speed    : req/s: {:.2}, item/s: {:.2}, avg fetch: {:?}",
            snapshot.per_second(snapshot.requests_sent),
            snapshot.per_second(snapshot.items_emitted),
            snapshot.average_fetch_time
        )?;
        writeln!(
            f,
            "  requests : enqueued: {}, dup: {}, sent: {}, ok: {}, fail: {}, retry: {}",
            snapshot.requests_enqueued,
            snapshot.duplicates_skipped,
            snapshot.requests_sent,
            snapshot.requests_succeeded,
            snapshot.requests_failed,
            snapshot.requests_retried
        )?;
        writeln!(
            f,
            "  response : received: {}, rendered: {}, downloaded: {}",
            snapshot.responses_received,
            snapshot.pages_rendered,
            snapshot.formatted_bytes()
        )?;
        writeln!(
            f,
            "  browser  : opened: {}, closed: {}",
            snapshot.browser_pages_opened, snapshot.browser_pages_closed
        )?;
        writeln!(
            f,
            "  items    : scraped: {}, emitted: {}, dropped: {}, field failures: {}",
            snapshot.items_scraped,
            snapshot.items_emitted,
            snapshot.items_dropped,
            snapshot.field_failures
        )?;

        let status_string = if snapshot.response_status_counts.is_empty() {
            "none".to_string()
        } else {
            snapshot.formatted_statuses(", ", false)
        };

        writeln!(f, "  status   : {}\n", status_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_include_recorded_counts() {
        let stats = StatCollector::new();
        stats.increment_requests_enqueued();
        stats.increment_requests_sent();
        stats.record_response(200, 2048, Duration::from_millis(300));
        stats.record_response(200, 1024, Duration::from_millis(100));
        stats.record_response_status(503);
        stats.increment_items_emitted();

        let json: serde_json::Value = serde_json::from_str(&stats.to_json_string().unwrap()).unwrap();
        assert_eq!(json["responses_received"], 2);
        assert_eq!(json["response_status_counts"]["200"], 2);
        assert_eq!(json["items_emitted"], 1);

        let markdown = stats.to_markdown_string();
        assert!(markdown.contains("| Emitted        | 1     |"));
        assert!(markdown.contains("- **503**: 1"));
        assert!(markdown.contains("3.00 KB"));

        let text = stats.to_string();
        assert!(text.contains("avg fetch: 200ms"));
        assert!(text.contains("200: 2, 503: 1"));
    }
}
