//! Context budgeting: token costs and the span allocator.
//!
//! The allocator picks which spans a request gets; the budget it works
//! against comes from the value classifier's tier.

pub mod allocator;
pub mod token;

pub use allocator::ContextAllocator;
pub use token::{estimate_tokens, span_cost};
