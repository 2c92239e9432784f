//! Error types for the Mnemo domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] wraps them all.

use std::time::Duration;
use thiserror::Error;

/// The top-level error type for all Mnemo operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Input validation ---
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    // --- Cross-boundary calls ---
    #[error("Resilience error: {0}")]
    Resilience(#[from] ResilienceError),

    // --- Store / persistence ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// Malformed fragment, span or mixture input.
///
/// Fragment and span validation failures are filtered by the components
/// that receive them; only mixture errors reach callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("fragment content is missing")]
    MissingContent,

    #[error("fragment content is empty")]
    EmptyContent,

    #[error("fragment content has the wrong type: expected string, got {0}")]
    WrongContentType(&'static str),

    #[error("span is invalid: {span_id}: {reason}")]
    InvalidSpan { span_id: String, reason: String },

    #[error("category mixture is invalid: {0}")]
    InvalidMixture(String),
}

/// Failures of a call that crosses a component boundary
/// (e.g. the consolidator asking an embedding capability for a vector).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResilienceError {
    #[error("{operation} timed out after {}ms", timeout.as_millis())]
    Timeout { operation: String, timeout: Duration },

    #[error("circuit breaker '{breaker}' is open")]
    BreakerOpen { breaker: String },

    #[error("{operation} failed: {reason}")]
    Failed { operation: String, reason: String },
}

impl ResilienceError {
    /// Whether a retry policy may try the call again.
    ///
    /// An open breaker is surfaced immediately and never retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::BreakerOpen { .. })
    }
}

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Embedding generation failed: {0}")]
    Embedding(#[from] ResilienceError),

    #[error("Merge conflict: {0}")]
    Conflict(String),
}
