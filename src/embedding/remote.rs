//! Remote HTTP embedding provider (1536 dims).
//!
//! Posts to an OpenAI-compatible `/embeddings` endpoint. The API key is read
//! from the environment variable named in config, never stored in config
//! files. Transport and status failures surface as `ExternalServiceError`
//! for the circuit breaker to count — there is no fallback path.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::{l2_normalize, EmbeddingProvider, REMOTE_DIM};
use crate::config::EmbeddingConfig;
use crate::error::{redact_secrets, MemoryError};

#[derive(Debug)]
pub struct RemoteEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, MemoryError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| MemoryError::Validation {
            field: "embedding.endpoint",
            message: "remote provider requires an endpoint".into(),
        })?;

        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| MemoryError::Validation {
                field: "embedding.api_key_env",
                message: format!("environment variable {} is not set", config.api_key_env),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| MemoryError::ExternalService {
                service: "embedding",
                operation: "init",
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let err = |message: String| MemoryError::ExternalService {
            service: "embedding",
            operation: "embed",
            message: redact_secrets(&message),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": text,
            }))
            .send()
            .await
            .map_err(|e| err(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(err(format!("endpoint returned {status}: {body}")));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| err(format!("malformed response: {e}")))?;

        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| err("response contained no embedding".into()))?;

        if vector.len() != REMOTE_DIM {
            return Err(err(format!(
                "dimension mismatch: endpoint returned {}, expected {REMOTE_DIM}",
                vector.len()
            )));
        }

        Ok(l2_normalize(&vector))
    }

    fn dimensions(&self) -> usize {
        REMOTE_DIM
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
