//! Contains the item processor functionality for the crawler.
//! Items are written to the sink one at a time, in the order they arrive, and
//! the item-count limit is enforced here.

use crate::item::Item;
use crate::scheduler::Scheduler;
use crate::sink::ItemSink;
use crate::stats::StatCollector;
use kanal::AsyncReceiver;
use log::{debug, error, info, trace};
use std::sync::Arc;

/// Drains `item_rx` into `sink`.
///
/// Once `item_limit` items have been written the scheduler is shut down;
/// items still in the pipeline after that are counted as dropped, so the
/// sink never sees more than `item_limit` items.
pub fn spawn_item_processor_task(
    item_rx: AsyncReceiver<Item>,
    sink: Arc<dyn ItemSink>,
    item_limit: Option<usize>,
    scheduler: Arc<Scheduler>,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()> {
    trace!(
        "Starting item processor with sink '{}', item limit: {:?}",
        sink.name(),
        item_limit
    );
    tokio::spawn(async move {
        let mut emitted = 0usize;
        while let Ok(item) = item_rx.recv().await {
            if item_limit.is_some_and(|limit| emitted >= limit) {
                debug!(
                    "Item limit reached, dropping item from {}",
                    item.url().unwrap_or("unknown")
                );
                stats.increment_items_dropped();
                continue;
            }

            match sink.write(&item).await {
                Ok(()) => {
                    emitted += 1;
                    stats.increment_items_emitted();
                    trace!("Item {} written to '{}'", emitted, sink.name());

                    if item_limit == Some(emitted) {
                        info!("Item limit of {} reached, closing crawl.", emitted);
                        scheduler.shutdown();
                    }
                }
                Err(e) => {
                    error!(
                        "Sink '{}' failed to write item from {}: {}",
                        sink.name(),
                        item.url().unwrap_or("unknown"),
                        e
                    );
                    stats.increment_items_dropped();
                }
            }
        }
        trace!("Item processor finished");
    })
}
