//! Circuit breaker: stops calling a dependency that keeps failing.
//!
//! ```text
//! CLOSED --(failures >= threshold)--> OPEN
//! OPEN   --(cooldown elapsed, next call admitted as probe)--> HALF_OPEN
//! HALF_OPEN --(probe succeeds)--> CLOSED
//! HALF_OPEN --(probe fails)--> OPEN
//! ```
//!
//! While open, [`CircuitBreaker::check`] short-circuits with
//! [`ResilienceError::BreakerOpen`] and the failure count is frozen.
//! Half-open admits a single probe; other callers are short-circuited until
//! the probe resolves, or until a cooldown passes without a verdict (the
//! probe was dropped) and a new probe is admitted.

use mnemo_config::ResilienceConfig;
use mnemo_core::error::ResilienceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Externally visible breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerStatus {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Open => "OPEN",
            Self::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for BreakerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of a breaker, for status displays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub name: String,
    pub status: BreakerStatus,
    pub failure_count: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone, Copy)]
enum CircuitState {
    Closed,
    Open { since: Instant },
    HalfOpen { probe_since: Instant },
}

struct BreakerState {
    circuit: CircuitState,
    failure_count: u32,
}

pub struct CircuitBreaker {
    name: String,
    threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            threshold: threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState {
                circuit: CircuitState::Closed,
                failure_count: 0,
            }),
        }
    }

    pub fn from_config(name: impl Into<String>, config: &ResilienceConfig) -> Self {
        Self::new(name, config.breaker_threshold, config.breaker_cooldown())
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask whether a call may go through.
    ///
    /// An open breaker whose cooldown has elapsed moves to half-open and
    /// admits the call as the only probe.
    pub fn check(&self) -> Result<(), ResilienceError> {
        let mut state = self.lock();
        let since = match state.circuit {
            CircuitState::Closed => return Ok(()),
            CircuitState::Open { since } => since,
            CircuitState::HalfOpen { probe_since } => probe_since,
        };
        if since.elapsed() < self.cooldown {
            return Err(ResilienceError::BreakerOpen {
                breaker: self.name.clone(),
            });
        }
        info!(breaker = %self.name, "Circuit breaker half-open, admitting probe");
        state.circuit = CircuitState::HalfOpen {
            probe_since: Instant::now(),
        };
        Ok(())
    }

    /// Record a successful call. Closes the breaker and resets the count.
    pub fn record_success(&self) {
        let mut state = self.lock();
        state.failure_count = 0;
        if !matches!(state.circuit, CircuitState::Closed) {
            info!(breaker = %self.name, "Circuit breaker closed after successful probe");
            state.circuit = CircuitState::Closed;
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut state = self.lock();
        match state.circuit {
            // Short-circuited calls never reach here; late results are ignored
            CircuitState::Open { .. } => {}
            CircuitState::HalfOpen { .. } => {
                warn!(breaker = %self.name, "Probe failed, circuit breaker reopened");
                state.circuit = CircuitState::Open {
                    since: Instant::now(),
                };
            }
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.threshold {
                    warn!(
                        breaker = %self.name,
                        failures = state.failure_count,
                        cooldown_secs = self.cooldown.as_secs(),
                        "Circuit breaker opened"
                    );
                    state.circuit = CircuitState::Open {
                        since: Instant::now(),
                    };
                }
            }
        }
    }

    pub fn status(&self) -> BreakerStatus {
        match self.lock().circuit {
            CircuitState::Closed => BreakerStatus::Closed,
            CircuitState::Open { .. } => BreakerStatus::Open,
            CircuitState::HalfOpen { .. } => BreakerStatus::HalfOpen,
        }
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        BreakerSnapshot {
            name: self.name.clone(),
            status: self.status(),
            failure_count: self.failure_count(),
            threshold: self.threshold,
        }
    }
}
