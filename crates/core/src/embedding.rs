//! Embedding trait: the injected capability that turns text into vectors.
//!
//! Mnemo never produces production embeddings itself. The consolidator
//! talks to an [`Embedder`] across a component boundary, so every
//! implementation reports failures as [`ResilienceError`] and is expected to
//! be wrapped in retry, timeout and circuit-breaker logic.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::ResilienceError;

#[async_trait]
pub trait Embedder: Send + Sync {
    /// A human-readable name for this embedder (e.g., "hashing").
    fn name(&self) -> &str;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ResilienceError>;

    /// Embed several texts in order.
    ///
    /// Default implementation calls `embed()` once per text and stops at the
    /// first failure.
    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ResilienceError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn embed(&self, text: &str) -> std::result::Result<Vec<f32>, ResilienceError> {
        (**self).embed(text).await
    }

    async fn embed_batch(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ResilienceError> {
        (**self).embed_batch(texts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        fn name(&self) -> &str {
            "length"
        }

        async fn embed(&self, text: &str) -> Result<Vec<f32>, ResilienceError> {
            if text.is_empty() {
                return Err(ResilienceError::Failed {
                    operation: "embed".into(),
                    reason: "empty text".into(),
                });
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn default_batch_embeds_in_order() {
        let embedder: Arc<dyn Embedder> = Arc::new(LengthEmbedder);
        let out = embedder
            .embed_batch(&["a".to_string(), "abc".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![1.0, 1.0], vec![3.0, 1.0]]);
    }

    #[tokio::test]
    async fn default_batch_stops_at_first_failure() {
        let result = LengthEmbedder
            .embed_batch(&["ok".to_string(), String::new()])
            .await;
        assert!(matches!(result, Err(ResilienceError::Failed { .. })));
    }
}
