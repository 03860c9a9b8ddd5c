//! Contains the download loop of the crawler.
//!
//! The downloader task pulls requests from the [`Scheduler`] and fetches them
//! with the site's [`PageFetcher`]. Dispatch is paced by the
//! [`ThrottleController`]: each request waits for its slot, and no new fetch
//! starts while the number in flight is at the throttle's effective
//! concurrency. Failed fetches are retried in place, sleeping the current
//! throttle delay between attempts.
//!
//! Every dequeued request ends in exactly one of two ways: its document is
//! handed to the parser (which completes it after merging discoveries), or it
//! is completed here after the last failed attempt. The loop exits when
//! `dequeue` reports the frontier exhausted or shut down, then waits for the
//! fetches it already started.

use crate::error::FetchError;
use crate::fetcher::{PageFetcher, RenderedDocument};
use crate::request::CrawlRequest;
use crate::scheduler::Scheduler;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use crate::throttle::ThrottleController;

use kanal::AsyncSender;
use log::{debug, error, trace, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;

pub fn spawn_downloader_task(
    scheduler: Arc<Scheduler>,
    fetcher: Arc<dyn PageFetcher>,
    throttle: Arc<ThrottleController>,
    state: Arc<CrawlerState>,
    res_tx: AsyncSender<RenderedDocument>,
    retry_times: u32,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()> {
    let max_concurrent_fetches = throttle.config().max_concurrency.max(1);
    let semaphore = Arc::new(Semaphore::new(max_concurrent_fetches));
    let mut tasks = JoinSet::new();

    tokio::spawn(async move {
        trace!(
            "Downloader task started with fetcher '{}', max_concurrent_fetches: {}",
            fetcher.name(),
            max_concurrent_fetches
        );
        loop {
            while let Some(res) = tasks.try_join_next() {
                if let Err(e) = res {
                    error!("A fetch task failed: {:?}", e);
                }
            }

            let Some(request) = scheduler.dequeue().await else {
                trace!("Frontier exhausted or shutting down, exiting downloader task");
                break;
            };

            while state.in_flight() >= throttle.effective_concurrency() {
                trace!(
                    "Throttled: {} fetches in flight, effective concurrency {}",
                    state.in_flight(),
                    throttle.effective_concurrency()
                );
                match tasks.join_next().await {
                    Some(Err(e)) => error!("A fetch task failed: {:?}", e),
                    Some(Ok(())) => {}
                    None => break,
                }
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(p) => p,
                Err(_) => {
                    warn!("Fetch semaphore closed, stopping downloader.");
                    scheduler.complete();
                    break;
                }
            };

            throttle.wait_turn().await;

            state.in_flight_fetches.fetch_add(1, Ordering::SeqCst);
            let fetcher_clone = Arc::clone(&fetcher);
            let throttle_clone = Arc::clone(&throttle);
            let scheduler_clone = Arc::clone(&scheduler);
            let state_clone = Arc::clone(&state);
            let stats_clone = Arc::clone(&stats);
            let res_tx_clone = res_tx.clone();

            tasks.spawn(async move {
                let is_seed = request.is_listing_root();
                let fetched = fetch_with_retries(
                    request,
                    &fetcher_clone,
                    &throttle_clone,
                    retry_times,
                    &stats_clone,
                )
                .await;

                match fetched {
                    Some(document) => {
                        if is_seed {
                            state_clone.seeds_fetched.fetch_add(1, Ordering::SeqCst);
                        }
                        trace!("Sending document for URL: {}", document.final_url);
                        if res_tx_clone.send(document).await.is_err() {
                            error!("Response channel closed, cannot send fetched document.");
                            scheduler_clone.complete();
                        }
                    }
                    None => scheduler_clone.complete(),
                }

                state_clone.in_flight_fetches.fetch_sub(1, Ordering::SeqCst);
                drop(permit);
            });
        }

        trace!("Waiting for active fetch tasks to complete");
        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                error!("A fetch task failed: {:?}", e);
            } else {
                trace!("Fetch task completed successfully");
            }
        }
        trace!("Downloader task finished");
    })
}

/// Fetches `request`, retrying retryable failures up to `retry_times` extra
/// times. Returns `None` once the request is given up on.
async fn fetch_with_retries(
    request: CrawlRequest,
    fetcher: &Arc<dyn PageFetcher>,
    throttle: &ThrottleController,
    retry_times: u32,
    stats: &StatCollector,
) -> Option<RenderedDocument> {
    let mut attempt: u32 = 0;
    loop {
        trace!("Fetching {} {} (attempt {})", request.kind, request.url, attempt + 1);
        stats.increment_requests_sent();
        let start_time = Instant::now();
        let result = fetcher.fetch(&request).await;
        let latency = start_time.elapsed();

        match result {
            Ok(document) => {
                trace!(
                    "Fetch successful for URL: {}, took {:?}",
                    document.final_url, latency
                );
                throttle.record(latency, false);
                stats.increment_requests_succeeded();
                stats.record_response(document.status, document.len(), latency);
                return Some(document);
            }
            Err(e) => {
                throttle.record(latency, e.is_throttle_signal());
                if let Some(status) = e.status() {
                    stats.record_response_status(status);
                }

                if attempt < retry_times && e.is_retryable() {
                    attempt += 1;
                    stats.increment_requests_retried();
                    let delay = throttle.current_delay();
                    debug!(
                        "Retrying {} in {:?} ({} of {}): {}",
                        request.url, delay, attempt, retry_times, e
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }

                log_gave_up(&request, attempt + 1, &e);
                stats.increment_requests_failed();
                return None;
            }
        }
    }
}

fn log_gave_up(request: &CrawlRequest, attempts: u32, e: &FetchError) {
    match &request.parent_url {
        Some(parent) => error!(
            "Giving up on {} (found on {}) after {} attempt(s): {}",
            request.url, parent, attempts, e
        ),
        None => error!(
            "Giving up on seed {} after {} attempt(s): {}",
            request.url, attempts, e
        ),
    }
}
