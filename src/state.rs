//! Live counters shared by the crawler's tasks.
//!
//! The downloader compares `in_flight_fetches` with the throttle's effective
//! concurrency before dispatching. The orchestrator reads `seeds_fetched`
//! after shutdown to decide whether the run reached its site at all.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CrawlerState {
    /// Fetches started and not yet finished, retries included.
    pub in_flight_fetches: AtomicUsize,
    /// Listing roots fetched successfully.
    pub seeds_fetched: AtomicUsize,
}

impl CrawlerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight_fetches.load(Ordering::SeqCst)
    }

    pub fn seeds_fetched(&self) -> usize {
        self.seeds_fetched.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_empty_and_tracks_fetches() {
        let state = CrawlerState::new();
        assert_eq!(state.in_flight(), 0);
        assert_eq!(state.seeds_fetched(), 0);

        state.in_flight_fetches.fetch_add(2, Ordering::SeqCst);
        state.seeds_fetched.fetch_add(1, Ordering::SeqCst);
        state.in_flight_fetches.fetch_sub(1, Ordering::SeqCst);

        assert_eq!(state.in_flight(), 1);
        assert_eq!(state.seeds_fetched(), 1);
    }
}
