//! The core Crawler implementation.
//!
//! This module defines the `Crawler` struct, which acts as the central
//! orchestrator of a catalog crawl. It ties together the scheduler, the page
//! fetcher, the throttle, the extraction specs of one site and the item sink.
//!
//! It utilizes a task-based asynchronous model, spawning distinct tasks for
//! downloading pages, parsing documents and writing items. The tasks are
//! chained by bounded channels, so shutdown flows downstream: once the
//! downloader stops dequeuing, the parser drains and stops, then the item
//! processor drains and stops.

use crate::builder::CrawlerConfig;
use crate::error::CrawlError;
use crate::fetcher::PageFetcher;
use crate::scheduler::Scheduler;
use crate::sink::ItemSink;
use crate::site::CompiledSite;
use crate::state::CrawlerState;
use crate::stats::StatCollector;
use crate::throttle::ThrottleController;
use futures_util::future::join_all;
use kanal::bounded_async;
use tracing::{debug, error, info, trace, warn};

use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinHandle};

/// The central orchestrator for a crawl, handling the frontier, fetching,
/// extraction, item output, shutdown and statistics collection.
pub struct Crawler {
    scheduler: Arc<Scheduler>,
    site: Arc<CompiledSite>,
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn ItemSink>,
    throttle: Arc<ThrottleController>,
    stats: Arc<StatCollector>,
    config: CrawlerConfig,
    retry_times: u32,
    item_limit: Option<usize>,
}

impl Crawler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        scheduler: Arc<Scheduler>,
        site: CompiledSite,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn ItemSink>,
        throttle: ThrottleController,
        stats: Arc<StatCollector>,
        config: CrawlerConfig,
        retry_times: u32,
        item_limit: Option<usize>,
    ) -> Self {
        Crawler {
            scheduler,
            site: Arc::new(site),
            fetcher,
            sink,
            throttle: Arc::new(throttle),
            stats,
            config,
            retry_times,
            item_limit,
        }
    }

    /// Runs the crawl to completion.
    ///
    /// Returns once the frontier is exhausted, the item limit is reached or
    /// Ctrl-C is received (when enabled), and every task has drained. Fails
    /// with [`CrawlError::SeedsUnreachable`] when the run was not interrupted
    /// and none of the seeds could be fetched.
    pub async fn start_crawl(self) -> Result<(), CrawlError> {
        let Crawler {
            scheduler,
            site,
            fetcher,
            sink,
            throttle,
            stats,
            config,
            retry_times,
            item_limit,
        } = self;

        info!(
            "Crawler starting crawl of '{}' with fetcher '{}': seeds={}, max_concurrency={}, initial_delay={:?}, item_limit={:?}",
            site.name,
            fetcher.name(),
            site.seeds.len(),
            throttle.config().max_concurrency,
            throttle.current_delay(),
            item_limit
        );

        let state = CrawlerState::new();

        trace!(
            "Creating communication channels with capacity: {}",
            config.channel_capacity
        );
        let (res_tx, res_rx) = bounded_async(config.channel_capacity);
        let (item_tx, item_rx) = bounded_async(config.channel_capacity);

        let seed_count = enqueue_start_requests(&scheduler, &site, &stats);

        trace!("Spawning downloader task");
        let downloader_task = super::spawn_downloader_task(
            scheduler.clone(),
            fetcher.clone(),
            throttle.clone(),
            state.clone(),
            res_tx,
            retry_times,
            stats.clone(),
        );

        trace!("Spawning parser task");
        let parser_task = super::spawn_parser_task(
            scheduler.clone(),
            site.clone(),
            res_rx,
            item_tx,
            stats.clone(),
        );

        trace!("Spawning item processor task");
        let mut item_processor_task = super::spawn_item_processor_task(
            item_rx,
            sink.clone(),
            item_limit,
            scheduler.clone(),
            stats.clone(),
        );

        let interrupted = tokio::select! {
            _ = shutdown_signal(config.handle_ctrl_c) => {
                info!("Ctrl-C received, initiating graceful shutdown.");
                true
            }
            result = &mut item_processor_task => {
                if let Err(e) = result {
                    error!("Item processor task failed: {}", e);
                }
                info!("Crawl pipeline drained, initiating shutdown.");
                false
            }
        };

        scheduler.shutdown();
        debug!("Scheduler shutdown initiated successfully");

        let mut remaining: Vec<JoinHandle<()>> = vec![downloader_task, parser_task];
        if interrupted {
            remaining.push(item_processor_task);
        }
        let abort_handles: Vec<AbortHandle> =
            remaining.iter().map(JoinHandle::abort_handle).collect();

        match tokio::time::timeout(config.shutdown_timeout, join_all(remaining)).await {
            Ok(results) => {
                trace!("All tasks completed during shutdown");
                for result in results {
                    if let Err(e) = result {
                        error!("Task failed during shutdown: {}", e);
                    }
                }
            }
            Err(_) => {
                warn!(
                    "Tasks did not complete within timeout ({}s), aborting remaining tasks and continuing with shutdown...",
                    config.shutdown_timeout.as_secs()
                );
                for handle in abort_handles {
                    handle.abort();
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }

        info!("Closing item sink '{}'...", sink.name());
        if let Err(e) = sink.close().await {
            error!("Failed to close item sink '{}': {}", sink.name(), e);
        }
        if let Err(e) = fetcher.shutdown().await {
            error!("Failed to shut down fetcher '{}': {}", fetcher.name(), e);
        }

        info!("Crawl finished. Stats:\n{}", stats);

        let seeds_fetched = state.seeds_fetched();
        if !interrupted && seed_count > 0 && seeds_fetched == 0 {
            return Err(CrawlError::SeedsUnreachable(seed_count));
        }
        if seeds_fetched < seed_count {
            warn!(
                "{} of {} seeds could not be fetched",
                seed_count - seeds_fetched,
                seed_count
            );
        }
        Ok(())
    }

    /// Returns a cloned Arc to the `StatCollector` instance used by this crawler.
    ///
    /// This allows programmatic access to the collected statistics at any time during or after the crawl.
    pub fn get_stats(&self) -> Arc<StatCollector> {
        Arc::clone(&self.stats)
    }

    pub fn site(&self) -> &CompiledSite {
        &self.site
    }
}

/// Enqueues every seed as a listing root. Seeds must be in the frontier
/// before the downloader starts, or it would see an exhausted frontier.
fn enqueue_start_requests(
    scheduler: &Scheduler,
    site: &CompiledSite,
    stats: &StatCollector,
) -> usize {
    let mut count = 0;
    for request in site.start_requests() {
        let url = request.url.clone();
        if scheduler.enqueue(request) {
            stats.increment_requests_enqueued();
            count += 1;
        } else {
            warn!("Seed {} duplicates an earlier seed, skipping", url);
            stats.increment_duplicates_skipped();
        }
    }
    debug!("Enqueued {} seed requests", count);
    count
}

async fn shutdown_signal(handle_ctrl_c: bool) {
    if handle_ctrl_c {
        match tokio::signal::ctrl_c().await {
            Ok(()) => return,
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    }
    std::future::pending::<()>().await
}
