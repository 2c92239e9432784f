//! Response value tiers: how much context and generation budget a request deserves.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Value tier of an incoming request, in ascending order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValueTier {
    Trivial,
    Low,
    Medium,
    High,
    Critical,
    Maximum,
}

impl ValueTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trivial => "TRIVIAL",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Maximum => "MAXIMUM",
        }
    }
}

impl fmt::Display for ValueTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The classifier's verdict for one piece of input text.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueAssessment {
    pub tier: ValueTier,
    /// Token ceiling for context allocation and generation
    pub max_budget: u64,
    /// Complexity score in [0, 1] the tier was derived from
    pub complexity: f64,
}
