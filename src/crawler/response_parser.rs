//! # Response Parser Module
//!
//! Turns fetched documents into items and new requests.
//!
//! ## Overview
//!
//! A single parser task receives every [`RenderedDocument`] from the
//! downloader and runs the extraction spec for the document's request kind.
//! Extraction is synchronous, so one worker is enough and keeps the
//! scheduler's merge step single-writer.
//!
//! For each document, in this order:
//!
//! 1. discovered requests are merged into the frontier (duplicates counted
//!    and skipped),
//! 2. the item, if any, is sent to the item processor,
//! 3. the originating request is marked complete.
//!
//! Completing last means the frontier never looks exhausted while a parsed
//! page still has discoveries to contribute.

use crate::extraction::{Extraction, extract};
use crate::fetcher::RenderedDocument;
use crate::item::Item;
use crate::scheduler::Scheduler;
use crate::site::CompiledSite;
use crate::stats::StatCollector;
use kanal::{AsyncReceiver, AsyncSender};
use log::{debug, error, trace, warn};
use std::sync::Arc;

pub fn spawn_parser_task(
    scheduler: Arc<Scheduler>,
    site: Arc<CompiledSite>,
    res_rx: AsyncReceiver<RenderedDocument>,
    item_tx: AsyncSender<Item>,
    stats: Arc<StatCollector>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        trace!("Response parser started for site '{}'", site.name);
        while let Ok(document) = res_rx.recv().await {
            debug!(
                "Parsing {} page {} ({} bytes)",
                document.request.kind,
                document.final_url,
                document.len()
            );
            let spec = site.spec_for(document.request.kind);
            let extraction = extract(&document, spec);
            if extraction.item.is_none() && spec.yields_items() {
                stats.increment_items_dropped();
            }

            process_crawl_outputs(
                extraction,
                &document,
                &scheduler,
                &item_tx,
                &stats,
            )
            .await;

            scheduler.complete();
        }
        trace!("Response parser finished");
    })
}

/// Merges discoveries into the frontier, then forwards the item.
pub async fn process_crawl_outputs(
    extraction: Extraction,
    document: &RenderedDocument,
    scheduler: &Scheduler,
    item_tx: &AsyncSender<Item>,
    stats: &StatCollector,
) {
    let Extraction {
        item,
        discovered,
        failures,
    } = extraction;

    if !failures.is_empty() {
        stats.add_field_failures(failures.len());
        for failure in &failures {
            warn!(
                "Field '{}' failed on {}: {}",
                failure.field, document.final_url, failure.reason
            );
        }
    }

    let discovered_len = discovered.len();
    let mut enqueued = 0;
    let mut refused_on_shutdown = 0;
    for request in discovered {
        if scheduler.is_shutting_down() {
            refused_on_shutdown += 1;
            continue;
        }
        trace!("Discovered {} link: {}", request.kind, request.url);
        if scheduler.enqueue(request) {
            enqueued += 1;
            stats.increment_requests_enqueued();
        } else {
            stats.increment_duplicates_skipped();
        }
    }

    if discovered_len > 0 {
        debug!(
            "{} yielded {} links: {} new, {} duplicates, {} skipped for shutdown",
            document.final_url,
            discovered_len,
            enqueued,
            discovered_len - enqueued - refused_on_shutdown,
            refused_on_shutdown
        );
    }

    if let Some(item) = item {
        stats.increment_items_scraped();
        if item_tx.send(item).await.is_err() {
            error!("Item channel closed, dropping item from {}", document.final_url);
            stats.increment_items_dropped();
        }
    }
}
