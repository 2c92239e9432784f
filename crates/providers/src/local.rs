//! Offline embedder using concept feature hashing.
//!
//! Each concept of the text is hashed with SHA-256 into one of `dimensions`
//! buckets with a hash-derived sign, and the resulting vector is
//! L2-normalized. Texts with the same concept set get identical vectors;
//! texts sharing most concepts get a high cosine similarity.

use async_trait::async_trait;
use mnemo_core::concepts;
use mnemo_core::embedding::Embedder;
use mnemo_core::error::ResilienceError;
use sha2::{Digest, Sha256};

pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Synchronous form of [`Embedder::embed`].
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for concept in concepts::extract(text) {
            let digest = Sha256::digest(concept.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, ResilienceError> {
        Ok(self.embed_sync(text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn deterministic_and_normalized() {
        let e = HashingEmbedder::new(64);
        let a = e.embed_sync("Kubernetes pod restarted after OOM");
        let b = e.embed_sync("Kubernetes pod restarted after OOM");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn same_concepts_same_vector() {
        let e = HashingEmbedder::default();
        assert_eq!(
            e.embed_sync("The database errors were resolved"),
            e.embed_sync("database error resolved")
        );
    }

    #[test]
    fn overlapping_texts_are_closer_than_unrelated() {
        let e = HashingEmbedder::default();
        let a = e.embed_sync("payment service timeout checkout page");
        let b = e.embed_sync("payment service timeout checkout flow");
        let c = e.embed_sync("garden tomatoes watering schedule");
        assert!(dot(&a, &b) > dot(&a, &c));
    }

    #[test]
    fn text_without_concepts_is_zero() {
        let e = HashingEmbedder::new(8);
        assert_eq!(e.embed_sync("the of and"), vec![0.0; 8]);
    }

    #[tokio::test]
    async fn embed_matches_sync() {
        let e = HashingEmbedder::new(32);
        let v = e.embed("memory consolidation").await.unwrap();
        assert_eq!(v, e.embed_sync("memory consolidation"));
        assert_eq!(e.name(), "hashing");
    }
}
