//! Activity pulse monitoring for Mnemo.
//!
//! The [`PulseMonitor`] counts heartbeats, remembers which ticks were
//! active in a bounded ring buffer, and derives an activity rate (bpm) and
//! an irregularity measure (hvv) over a clamped time window. The
//! consolidator reads its snapshot to pick between hot and cold paths.

pub mod clock;
pub mod pulse;

pub use clock::{ManualClock, MonotonicClock, SystemClock};
pub use pulse::{PulseMonitor, TickGuard, clamp_window};
