//! # Throttle Module
//!
//! Adaptive pacing of outbound fetches.
//!
//! ## Overview
//!
//! The [`ThrottleController`] keeps one inter-request delay for the whole
//! crawl, steered by an exponential moving average of observed latency:
//!
//! - A rate-limit, server-error or timeout signal doubles the delay.
//! - While the latency average rises the delay is held or raised to
//!   `ema / target_concurrency`.
//! - While it is flat or falling and below `delay * target_concurrency`, the
//!   delay moves halfway down towards that value.
//!
//! The delay always stays within `[floor, ceiling]`. The number of fetches the
//! downloader keeps in flight is derived from it, and every dispatch reserves
//! a slot on a single shared clock via [`ThrottleController::wait_turn`].

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Weight of the newest latency sample in the moving average.
const EMA_ALPHA: f64 = 0.3;

#[derive(Debug, Clone, PartialEq)]
pub struct ThrottleConfig {
    /// When off, the delay stays at `floor` and concurrency at the cap.
    pub enabled: bool,
    pub floor: Duration,
    pub start_delay: Duration,
    pub ceiling: Duration,
    pub target_concurrency: f64,
    /// Hard cap on fetches in flight.
    pub max_concurrency: usize,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            floor: Duration::from_secs(2),
            start_delay: Duration::from_secs(5),
            ceiling: Duration::from_secs(60),
            target_concurrency: 1.0,
            max_concurrency: 8,
        }
    }
}

impl ThrottleConfig {
    /// The delay a crawl starts with.
    pub fn seed_delay(&self) -> Duration {
        if self.enabled {
            self.start_delay.max(self.floor).min(self.ceiling.max(self.floor))
        } else {
            self.floor
        }
    }
}

#[derive(Debug)]
struct ThrottleState {
    current_delay: Duration,
    ema_latency: Option<f64>,
    last_latency_sample: Option<Duration>,
    next_slot: Option<Instant>,
}

/// Shared pacing state for every fetch of a crawl.
#[derive(Debug)]
pub struct ThrottleController {
    config: ThrottleConfig,
    state: Mutex<ThrottleState>,
}

impl ThrottleController {
    pub fn new(config: ThrottleConfig) -> Self {
        let state = ThrottleState {
            current_delay: config.seed_delay(),
            ema_latency: None,
            last_latency_sample: None,
            next_slot: None,
        };
        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn config(&self) -> &ThrottleConfig {
        &self.config
    }

    /// Feeds one completed fetch into the controller.
    ///
    /// `throttled` marks responses that ask us to back off: HTTP 429, 5xx,
    /// timeouts and transport failures.
    pub fn record(&self, latency: Duration, throttled: bool) {
        let mut state = self.state.lock();
        let sample = latency.as_secs_f64();
        let previous = state.ema_latency;
        let ema = match previous {
            Some(prev) => EMA_ALPHA * sample + (1.0 - EMA_ALPHA) * prev,
            None => sample,
        };
        state.ema_latency = Some(ema);
        state.last_latency_sample = Some(latency);

        if !self.config.enabled {
            return;
        }

        let current = state.current_delay.as_secs_f64();
        let target = ema / self.config.target_concurrency;
        let next = if throttled {
            (current * 2.0).max(target)
        } else if previous.map_or(true, |prev| ema > prev) {
            current.max(target)
        } else if target < current {
            (current + target) / 2.0
        } else {
            current
        };

        let floor = self.config.floor.as_secs_f64();
        let ceiling = self.config.ceiling.as_secs_f64().max(floor);
        state.current_delay = Duration::from_secs_f64(next.clamp(floor, ceiling));
    }

    pub fn current_delay(&self) -> Duration {
        self.state.lock().current_delay
    }

    /// The smoothed latency, once at least one fetch has completed.
    pub fn ema_latency(&self) -> Option<Duration> {
        self.state.lock().ema_latency.map(Duration::from_secs_f64)
    }

    pub fn last_latency(&self) -> Option<Duration> {
        self.state.lock().last_latency_sample
    }

    /// How many fetches may be in flight right now, in `[1, max_concurrency]`.
    pub fn effective_concurrency(&self) -> usize {
        let cap = self.config.max_concurrency.max(1);
        if !self.config.enabled {
            return cap;
        }
        let delay = self.current_delay().as_secs_f64();
        if delay <= 0.0 {
            return cap;
        }
        let scaled = (cap as f64 * self.config.seed_delay().as_secs_f64() / delay).floor();
        (scaled as usize).clamp(1, cap)
    }

    /// Waits for this caller's dispatch slot. Slots are spaced by the delay
    /// in force when each one is reserved.
    pub async fn wait_turn(&self) {
        let slot = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let slot = match state.next_slot {
                Some(previous) => (previous + state.current_delay).max(now),
                None => now,
            };
            state.next_slot = Some(slot);
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}
