//! Activity pulse records shared between the monitor, the consolidator and
//! snapshot persistence.

use serde::{Deserialize, Serialize};

/// Metrics derived by the pulse monitor at its last heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseSnapshot {
    /// Active ticks per second over the clamped window
    pub bpm: f64,
    /// Root-mean-square spacing between active ticks (0 with no actives)
    pub hvv: f64,
    pub tick_counter: u64,
    pub active_ticks: usize,
    /// The clamped window the metrics were computed over (0 before priming)
    pub window_secs: f64,
}

impl PulseSnapshot {
    /// The activity hint handed to the consolidator.
    pub fn activity_hint(&self) -> ActivityHint {
        ActivityHint { bpm: self.bpm }
    }
}

/// Observed activity rate in events per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityHint {
    pub bpm: f64,
}

/// Persistent form of the pulse state.
///
/// `last_heartbeat` is a reading of the monitor's monotonic clock; after a
/// restart it belongs to a different clock epoch, which the window clamp
/// absorbs on the next heartbeat.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseRecord {
    pub tick_counter: u64,
    pub active_ticks: Vec<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<f64>,
}
