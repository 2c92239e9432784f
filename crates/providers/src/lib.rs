//! Embedding providers and the resilience wrapper for Mnemo.
//!
//! All embedders implement `mnemo_core::Embedder`. The consolidator only
//! ever sees an embedder wrapped in [`ResilientEmbedder`], which applies
//! retry, circuit breaking and timeouts.

pub mod breaker;
pub mod local;
pub mod reliable;
pub mod retry;

pub use breaker::{BreakerSnapshot, BreakerStatus, CircuitBreaker};
pub use local::HashingEmbedder;
pub use reliable::{Resilience, ResilientEmbedder};
pub use retry::RetryPolicy;

use mnemo_config::AppConfig;
use mnemo_core::Embedder;
use std::sync::Arc;
use tracing::warn;

/// The configured embedder behind the resilience wrapper, plus a handle to
/// its breaker for status reporting.
pub fn build_from_config(config: &AppConfig) -> (Arc<dyn Embedder>, Arc<CircuitBreaker>) {
    let inner = match config.embedding.provider.as_str() {
        "hashing" => HashingEmbedder::new(config.embedding.dimensions),
        other => {
            warn!(
                provider = %other,
                "Unknown embedding provider, using the built-in hashing embedder"
            );
            HashingEmbedder::new(config.embedding.dimensions)
        }
    };

    let resilient = ResilientEmbedder::from_config(inner, &config.resilience);
    let breaker = resilient.breaker().clone();
    (Arc::new(resilient), breaker)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn build_from_default_config() {
        let config = AppConfig::default();
        let (embedder, breaker) = build_from_config(&config);
        assert_eq!(embedder.name(), "hashing");
        assert_eq!(breaker.status(), BreakerStatus::Closed);
        assert_eq!(breaker.threshold(), 5);

        let v = embedder.embed("hello memory").await.unwrap();
        assert_eq!(v.len(), config.embedding.dimensions);
    }
}
