//! Domain event system: decoupled communication between components.
//!
//! Events are published when something interesting happens in the memory
//! core. The presentation layer (or anything else) can subscribe to react
//! without reaching into component state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// A fragment entered the store
    FragmentIngested {
        fragment_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The store was compacted in place
    CompactionCompleted {
        before: usize,
        after: usize,
        ratio: f64,
        timestamp: DateTime<Utc>,
    },

    /// A consolidation run finished
    ConsolidationFinished {
        merged_count: usize,
        mode: String,
        replayed: bool,
        timestamp: DateTime<Utc>,
    },

    /// A consolidation run failed and was contained
    ConsolidationFailed {
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Context was allocated for a request
    ContextAllocated {
        tier: String,
        spans: usize,
        budget_used: u64,
        budget_total: u64,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
