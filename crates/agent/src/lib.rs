//! The Mnemo memory engine.
//!
//! A request flows through three steps:
//!
//! 1. **Classify** the input text into a value tier with a token ceiling
//! 2. **Collect** candidate spans: caller context plus stored fragments
//! 3. **Allocate** a diverse, budget-bounded subset of those spans
//!
//! Meanwhile consolidation merges similar old fragments in the background,
//! choosing its hot or cold path from the activity pulse.

pub mod classifier;
pub mod context;
pub mod engine;

pub use classifier::ValueClassifier;
pub use context::{ContextAllocator, estimate_tokens, span_cost};
pub use engine::{BackgroundConsolidation, ContextPlan, MemoryCore, StatusReport};
