//! Mock embedding provider for tests and offline development.
//!
//! Vectors are drawn from a cryptographically secure RNG and L2-normalized.
//! Selected only by explicit configuration; no production path falls back
//! here.

use async_trait::async_trait;
use rand::rngs::OsRng;
use rand::RngCore;

use super::{l2_normalize, EmbeddingProvider};
use crate::error::MemoryError;

#[derive(Debug)]
pub struct MockEmbeddingProvider {
    dimensions: usize,
}

impl MockEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut raw = vec![0.0f32; self.dimensions];
        for value in &mut raw {
            // Uniform in [-1, 1) from 32 CSPRNG bits
            *value = (OsRng.next_u32() as f32 / u32::MAX as f32) * 2.0 - 1.0;
        }
        Ok(l2_normalize(&raw))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn produces_normalized_vectors_of_requested_dimension() {
        let provider = MockEmbeddingProvider::new(32);
        let v = provider.embed("anything").await.unwrap();
        assert_eq!(v.len(), 32);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn vectors_are_random_per_call() {
        // Idempotence for mock mode comes from the cache, not the provider.
        let provider = MockEmbeddingProvider::new(32);
        let a = provider.embed("same text").await.unwrap();
        let b = provider.embed("same text").await.unwrap();
        assert_ne!(a, b);
    }
}
