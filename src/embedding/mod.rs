//! Text-to-vector embedding providers.
//!
//! Three implementations behind one trait: a local ONNX pipeline
//! (all-MiniLM-L6-v2, 384 dims), a remote HTTP endpoint (1536 dims), and a
//! mock that draws from a CSPRNG. The mock exists for tests and offline
//! development and is selected only by explicit configuration — a production
//! embed path that cannot reach its model must fail, never silently
//! substitute randomness.

pub mod cache;
pub mod local;
pub mod mock;
pub mod remote;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::MemoryError;

/// Dimension of the local provider (all-MiniLM-L6-v2).
pub const LOCAL_DIM: usize = 384;

/// Dimension of the remote HTTP provider.
pub const REMOTE_DIM: usize = 1536;

/// Embeds text into L2-normalized vectors of a fixed dimension.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;

    /// The fixed dimension this provider produces.
    fn dimensions(&self) -> usize;

    fn name(&self) -> &'static str;
}

/// Create an embedding provider from config.
pub fn create_provider(
    config: &EmbeddingConfig,
) -> Result<Box<dyn EmbeddingProvider>, MemoryError> {
    match config.provider.as_str() {
        "local" => Ok(Box::new(local::LocalEmbeddingProvider::new(config)?)),
        "remote" => Ok(Box::new(remote::RemoteEmbeddingProvider::new(config)?)),
        "mock" => {
            tracing::warn!(
                dimensions = config.mock_dimensions,
                "mock embedding provider selected — vectors are random, not semantic"
            );
            Ok(Box::new(mock::MockEmbeddingProvider::new(
                config.mock_dimensions,
            )))
        }
        other => Err(MemoryError::Validation {
            field: "embedding.provider",
            message: format!("unknown embedding provider: {other}. Supported: local, remote, mock"),
        }),
    }
}

/// L2-normalize a vector. Returns a zero vector if the input norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
