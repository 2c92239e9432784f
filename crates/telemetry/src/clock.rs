//! Monotonic clock abstraction.
//!
//! The pulse monitor never reads wall-clock time. It asks a
//! [`MonotonicClock`] for seconds since an arbitrary origin, which makes
//! clock anomalies injectable in tests.

use std::sync::{Mutex, PoisonError};
use std::time::Instant;

pub trait MonotonicClock: Send + Sync {
    /// Seconds since this clock's origin.
    fn now_secs(&self) -> f64;
}

/// Process-local monotonic clock backed by [`Instant`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicClock for SystemClock {
    fn now_secs(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// A hand-driven clock for deterministic tests.
///
/// With a non-zero `step`, every read returns the current value and then
/// advances by `step` (0.0, 0.1, 0.2, ... for a step of 0.1).
pub struct ManualClock {
    inner: Mutex<ManualState>,
}

struct ManualState {
    now: f64,
    step: f64,
}

impl ManualClock {
    /// A clock frozen at `start` until moved by hand.
    pub fn new(start: f64) -> Self {
        Self {
            inner: Mutex::new(ManualState {
                now: start,
                step: 0.0,
            }),
        }
    }

    /// A clock that starts at 0.0 and advances by `step` after each read.
    pub fn stepping(step: f64) -> Self {
        Self {
            inner: Mutex::new(ManualState { now: 0.0, step }),
        }
    }

    pub fn set(&self, now: f64) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).now = now;
    }

    pub fn advance(&self, secs: f64) {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner).now += secs;
    }
}

impl MonotonicClock for ManualClock {
    fn now_secs(&self) -> f64 {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let now = state.now;
        // Integer step counts keep 0.1-stepping exact enough for equality checks
        state.now = ((now + state.step) * 1e9).round() / 1e9;
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.now_secs();
        let b = clock.now_secs();
        assert!(b >= a);
    }

    #[test]
    fn manual_clock_moves_only_by_hand() {
        let clock = ManualClock::new(10.0);
        assert_eq!(clock.now_secs(), 10.0);
        assert_eq!(clock.now_secs(), 10.0);
        clock.advance(2.5);
        assert_eq!(clock.now_secs(), 12.5);
        clock.set(1.0);
        assert_eq!(clock.now_secs(), 1.0);
    }

    #[test]
    fn stepping_clock_advances_per_read() {
        let clock = ManualClock::stepping(0.1);
        assert_eq!(clock.now_secs(), 0.0);
        assert_eq!(clock.now_secs(), 0.1);
        assert_eq!(clock.now_secs(), 0.2);
        assert_eq!(clock.now_secs(), 0.3);
    }
}
