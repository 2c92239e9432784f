//! Pulse monitor: a bounded, clock-jump-safe activity gauge.
//!
//! Every heartbeat is one tick. Active ticks are remembered (by tick
//! position) in a ring buffer of fixed capacity, and each heartbeat after
//! the first derives:
//!
//! - **bpm**: active ticks per second over the window since the previous
//!   heartbeat. The window is clamped to `[min_window, 4 × nominal_window]`
//!   so a suspended laptop or a clock stepping backwards cannot produce
//!   absurd rates.
//! - **hvv**: root-mean-square spacing, in ticks, between consecutive
//!   active ticks. Zero when nothing was active.
//!
//! The monitor is shared by reference between call sites. All mutation goes
//! through one internal mutex, so concurrent heartbeats never lose a tick.

use mnemo_config::PulseConfig;
use mnemo_core::pulse::{PulseRecord, PulseSnapshot};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::clock::{MonotonicClock, SystemClock};

/// The process-wide activity monitor.
pub struct PulseMonitor {
    config: PulseConfig,
    clock: Arc<dyn MonotonicClock>,
    state: Mutex<PulseState>,
}

struct PulseState {
    tick_counter: u64,
    active_ticks: VecDeque<u64>,
    /// Position of the most recently evicted active tick (0 before any eviction)
    evicted_through: u64,
    /// Sum of squared spacings between retained active ticks
    spacing_sq_sum: u128,
    last_heartbeat: Option<f64>,
    bpm: f64,
    hvv: f64,
    window_secs: f64,
}

impl PulseState {
    fn new() -> Self {
        Self {
            tick_counter: 0,
            active_ticks: VecDeque::new(),
            evicted_through: 0,
            spacing_sq_sum: 0,
            last_heartbeat: None,
            bpm: 0.0,
            hvv: 0.0,
            window_secs: 0.0,
        }
    }

    fn push_active(&mut self, position: u64, capacity: usize) {
        let prev = self.active_ticks.back().copied().unwrap_or(self.evicted_through);
        self.spacing_sq_sum += square(position - prev);
        self.active_ticks.push_back(position);

        while self.active_ticks.len() > capacity {
            if let Some(oldest) = self.active_ticks.pop_front() {
                self.spacing_sq_sum -= square(oldest - self.evicted_through);
                self.evicted_through = oldest;
            }
        }
    }

    fn spacing_rms(&self) -> f64 {
        if self.active_ticks.is_empty() {
            return 0.0;
        }
        (self.spacing_sq_sum as f64 / self.active_ticks.len() as f64).sqrt()
    }

    fn snapshot(&self) -> PulseSnapshot {
        PulseSnapshot {
            bpm: self.bpm,
            hvv: self.hvv,
            tick_counter: self.tick_counter,
            active_ticks: self.active_ticks.len(),
            window_secs: self.window_secs,
        }
    }
}

fn square(gap: u64) -> u128 {
    let gap = gap as u128;
    gap * gap
}

/// Clamp a raw heartbeat interval into `[min, max]`.
///
/// Non-finite or negative intervals (a clock that stepped backwards) land
/// on `min`; anything beyond `max` (a suspended process, a forward jump)
/// lands on `max`.
pub fn clamp_window(elapsed: f64, min: f64, max: f64) -> f64 {
    if !elapsed.is_finite() {
        return min;
    }
    elapsed.max(min).min(max)
}

impl PulseMonitor {
    /// Create a monitor driven by the process monotonic clock.
    pub fn new(config: PulseConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock::new()))
    }

    /// Create a monitor driven by a custom clock.
    pub fn with_clock(config: PulseConfig, clock: Arc<dyn MonotonicClock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(PulseState::new()),
        }
    }

    // A panic elsewhere must not stop ticks from being counted
    fn lock(&self) -> MutexGuard<'_, PulseState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record one tick and, after the first call, recompute the metrics.
    pub fn heartbeat(&self, active: bool) {
        let now = self.clock.now_secs();
        let mut state = self.lock();

        state.tick_counter += 1;
        if active {
            let position = state.tick_counter;
            state.push_active(position, self.config.capacity);
        }

        let Some(last) = state.last_heartbeat.replace(now) else {
            debug!(tick = state.tick_counter, "Pulse primed");
            return;
        };

        let window = clamp_window(
            now - last,
            self.config.min_window_secs,
            self.config.max_window_secs(),
        );
        if window != now - last {
            debug!(
                raw_secs = now - last,
                clamped_secs = window,
                "Pulse window clamped"
            );
        }

        let actives = state.active_ticks.len();
        state.window_secs = window;
        state.bpm = if window > 0.0 && actives > 0 {
            actives as f64 / window
        } else {
            0.0
        };
        state.hvv = state.spacing_rms();
    }

    /// Start a tick that is emitted when the returned guard drops.
    ///
    /// The guard emits on every exit path (normal return, `?`, panic
    /// unwinding), so a tick is counted exactly once per guard.
    pub fn begin_tick(&self) -> TickGuard<'_> {
        TickGuard {
            monitor: self,
            active: false,
        }
    }

    /// Metrics from the last heartbeat plus current counters.
    pub fn snapshot(&self) -> PulseSnapshot {
        self.lock().snapshot()
    }

    pub fn tick_counter(&self) -> u64 {
        self.lock().tick_counter
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Persistent form of the current state.
    pub fn record(&self) -> PulseRecord {
        let state = self.lock();
        PulseRecord {
            tick_counter: state.tick_counter,
            active_ticks: state.active_ticks.iter().copied().collect(),
            last_heartbeat: state.last_heartbeat,
        }
    }

    /// Replace the current state with a persisted record.
    ///
    /// Positions that are not strictly increasing or exceed the tick
    /// counter are dropped; only the newest `capacity` positions are kept.
    /// Metrics are recomputed on the next heartbeat.
    pub fn restore(&self, record: &PulseRecord) {
        let mut fresh = PulseState::new();
        fresh.tick_counter = record.tick_counter;
        fresh.last_heartbeat = record.last_heartbeat.filter(|t| t.is_finite());

        let mut dropped = 0usize;
        let mut prev = 0u64;
        for &position in &record.active_ticks {
            if position <= prev || position > record.tick_counter {
                dropped += 1;
                continue;
            }
            fresh.push_active(position, self.config.capacity);
            prev = position;
        }
        if dropped > 0 {
            warn!(dropped, "Dropped inconsistent active tick positions on restore");
        }

        *self.lock() = fresh;
    }
}

/// Scoped tick emission; see [`PulseMonitor::begin_tick`].
#[must_use = "the tick is emitted when the guard is dropped"]
pub struct TickGuard<'a> {
    monitor: &'a PulseMonitor,
    active: bool,
}

impl TickGuard<'_> {
    pub fn mark_active(&mut self) {
        self.active = true;
    }

    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }
}

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.monitor.heartbeat(self.active);
    }
}
