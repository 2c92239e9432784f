//! # Mnemo Core
//!
//! Domain types, traits, and error definitions for the Mnemo memory engine.
//! This crate has **no runtime dependencies on other Mnemo crates**; it
//! defines the domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Cross-boundary capabilities (embedding) are traits here; implementations
//! live in their respective crates. Concept extraction lives here too, since
//! the compressor and the offline embedder must agree on it. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with mock/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod assessment;
pub mod concepts;
pub mod embedding;
pub mod error;
pub mod event;
pub mod fragment;
pub mod pulse;
pub mod span;

// Re-export key types at crate root for ergonomics
pub use assessment::{ValueAssessment, ValueTier};
pub use embedding::Embedder;
pub use error::{Error, MemoryError, ResilienceError, Result, ValidationError};
pub use event::{DomainEvent, EventBus};
pub use fragment::{Fragment, RawFragment};
pub use pulse::{ActivityHint, PulseRecord, PulseSnapshot};
pub use span::{Allocation, CategoryMixture, Span, SpanCategory};
