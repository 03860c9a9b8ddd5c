//! # Scheduler Module
//!
//! The crawl frontier: pending requests plus the set of URLs already seen.
//!
//! ## Overview
//!
//! The `Scheduler` owns a single lock around the pending queue and the seen
//! set, so deduplication and queuing happen atomically. A fingerprint is
//! marked seen when it is enqueued, not when it is fetched: the same product
//! linked from two listing pages is fetched once.
//!
//! ## Exhaustion
//!
//! Every dequeued request is *outstanding* until the crawler calls
//! [`Scheduler::complete`], which it does only after the request's
//! discoveries have been enqueued. [`Scheduler::dequeue`] suspends while the
//! queue is empty but requests are outstanding, and returns `None` once both
//! are zero. That `None` is the end of the crawl, not an error.
//!
//! ## Example
//!
//! ```rust,ignore
//! use catalog_spider::scheduler::Scheduler;
//! use catalog_spider::request::CrawlRequest;
//! use url::Url;
//!
//! let scheduler = Scheduler::new();
//! let seed = CrawlRequest::listing(Url::parse("https://example.com/books")?);
//! assert!(scheduler.enqueue(seed.clone()));
//! assert!(!scheduler.enqueue(seed));
//!
//! while let Some(request) = scheduler.dequeue().await {
//!     // fetch, extract, enqueue discoveries...
//!     scheduler.complete();
//! }
//! ```

use crate::request::CrawlRequest;
use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{debug, info, trace};

#[derive(Debug, Default)]
struct FrontierState {
    seen: HashSet<String>,
    pending: VecDeque<CrawlRequest>,
    outstanding: usize,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    frontier: Mutex<FrontierState>,
    changed: Notify,
    pub(crate) is_shutting_down: AtomicBool,
}

impl Scheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a request unless its canonical URL was seen before.
    ///
    /// Returns `true` only when the request was newly queued. Requests
    /// offered after shutdown are refused.
    pub fn enqueue(&self, request: CrawlRequest) -> bool {
        if self.is_shutting_down() {
            trace!("Scheduler is shutting down, refusing {}", request.url);
            return false;
        }

        let fingerprint = request.fingerprint();
        {
            let mut frontier = self.frontier.lock();
            if !frontier.seen.insert(fingerprint) {
                trace!("Already seen, skipping: {}", request.url);
                return false;
            }
            trace!("Enqueuing {} request: {}", request.kind, request.url);
            frontier.pending.push_back(request);
        }
        self.changed.notify_waiters();
        true
    }

    /// Takes the next pending request, waiting while other requests are
    /// still outstanding and may discover more.
    pub async fn dequeue(&self) -> Option<CrawlRequest> {
        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            // Register before checking so a wake-up between check and await is not lost.
            notified.as_mut().enable();

            if self.is_shutting_down() {
                return None;
            }

            {
                let mut frontier = self.frontier.lock();
                if let Some(request) = frontier.pending.pop_front() {
                    frontier.outstanding += 1;
                    return Some(request);
                }
                if frontier.outstanding == 0 {
                    debug!("Frontier exhausted after {} URLs", frontier.seen.len());
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Marks one dequeued request as fully handled.
    pub fn complete(&self) {
        {
            let mut frontier = self.frontier.lock();
            frontier.outstanding = frontier.outstanding.saturating_sub(1);
        }
        self.changed.notify_waiters();
    }

    /// Stops handing out requests. Waiting callers of `dequeue` get `None`.
    pub fn shutdown(&self) {
        if !self.is_shutting_down.swap(true, Ordering::SeqCst) {
            info!("Scheduler shutting down with {} requests pending", self.len());
        }
        self.changed.notify_waiters();
    }

    #[inline]
    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Number of requests waiting to be dequeued.
    #[inline]
    pub fn len(&self) -> usize {
        self.frontier.lock().pending.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct canonical URLs ever enqueued.
    pub fn seen_count(&self) -> usize {
        self.frontier.lock().seen.len()
    }

    /// Number of dequeued requests not yet completed.
    pub fn outstanding(&self) -> usize {
        self.frontier.lock().outstanding
    }

    /// Checks if nothing is pending and nothing is outstanding.
    pub fn is_idle(&self) -> bool {
        let frontier = self.frontier.lock();
        frontier.pending.is_empty() && frontier.outstanding == 0
    }
}
