//! Local ONNX Runtime embedding provider (all-MiniLM-L6-v2, 384 dims).
//!
//! Tokenization, inference, attention-masked mean pooling, and L2
//! normalization. The ONNX session is serialized behind a mutex; inference is
//! CPU-bound and short, so it runs inline in the calling task.

use std::sync::Mutex;

use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider, LOCAL_DIM};
use crate::config::EmbeddingConfig;
use crate::error::MemoryError;

/// Maximum sequence length for all-MiniLM-L6-v2 (trained at 256).
const MAX_SEQ_LEN: usize = 256;

#[derive(Debug)]
pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: Tokenizer is Send+Sync. Session is behind a Mutex which guarantees
// exclusive access during run().
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, MemoryError> {
        let model_dir = crate::config::expand_tilde(&config.model_dir);
        let model_path = model_dir.join("model.onnx");
        let tokenizer_path = model_dir.join("tokenizer.json");

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                return Err(MemoryError::ExternalService {
                    service: "embedding",
                    operation: "init",
                    message: format!(
                        "model file not found at {}. Place the ONNX export of {} there.",
                        path.display(),
                        config.model
                    ),
                });
            }
        }

        let session = Session::builder()
            .and_then(|b| {
                b.with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)
                    .map_err(Into::into)
            })
            .and_then(|b| b.with_intra_threads(4).map_err(Into::into))
            .and_then(|mut b| b.commit_from_file(&model_path))
            .map_err(|e| MemoryError::ExternalService {
                service: "embedding",
                operation: "init",
                message: format!("failed to load ONNX model: {e}"),
            })?;
        tracing::info!(model = %model_path.display(), "ONNX model loaded");

        let mut tokenizer =
            Tokenizer::from_file(&tokenizer_path).map_err(|e| MemoryError::ExternalService {
                service: "embedding",
                operation: "init",
                message: format!("failed to load tokenizer: {e}"),
            })?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| MemoryError::ExternalService {
                service: "embedding",
                operation: "init",
                message: format!("failed to set truncation: {e}"),
            })?;

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }

    fn embed_sync(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let infer_err = |message: String| MemoryError::ExternalService {
            service: "embedding",
            operation: "embed",
            message,
        };

        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| infer_err(format!("tokenization failed: {e}")))?;

        let seq_len = encoding.get_ids().len();
        let input_ids: Vec<i64> = encoding.get_ids().iter().map(|&id| id as i64).collect();
        let attention_mask: Vec<i64> = encoding
            .get_attention_mask()
            .iter()
            .map(|&m| m as i64)
            .collect();
        let token_type_ids = vec![0i64; seq_len];

        let shape = vec![1i64, seq_len as i64];
        let input_ids_tensor = Tensor::from_array((shape.clone(), input_ids.into_boxed_slice()))
            .map_err(|e| infer_err(e.to_string()))?;
        let attention_tensor =
            Tensor::from_array((shape.clone(), attention_mask.clone().into_boxed_slice()))
                .map_err(|e| infer_err(e.to_string()))?;
        let token_type_tensor = Tensor::from_array((shape, token_type_ids.into_boxed_slice()))
            .map_err(|e| infer_err(e.to_string()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| infer_err(format!("session lock poisoned: {e}")))?;

        let outputs = session
            .run(ort::inputs! {
                "input_ids" => input_ids_tensor,
                "attention_mask" => attention_tensor,
                "token_type_ids" => token_type_tensor,
            })
            .map_err(|e| infer_err(format!("inference failed: {e}")))?;

        // Output name varies by ONNX export; fall back to index 0.
        let token_embeddings = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);

        let (dims, data) = token_embeddings
            .try_extract_tensor::<f32>()
            .map_err(|e| infer_err(format!("failed to extract output tensor: {e}")))?;

        let dims: &[i64] = &dims;
        if dims.len() != 3 || dims[2] != LOCAL_DIM as i64 {
            return Err(infer_err(format!(
                "unexpected output shape {dims:?}, expected [1, seq, {LOCAL_DIM}]"
            )));
        }
        let actual_seq = dims[1] as usize;

        // Attention-masked mean pooling
        let mut pooled = vec![0.0f32; LOCAL_DIM];
        let mut count = 0.0f32;
        for s in 0..actual_seq {
            let mask = attention_mask.get(s).copied().unwrap_or(0) as f32;
            if mask > 0.0 {
                let offset = s * LOCAL_DIM;
                for d in 0..LOCAL_DIM {
                    pooled[d] += data[offset + d] * mask;
                }
                count += mask;
            }
        }
        if count > 0.0 {
            for value in &mut pooled {
                *value /= count;
            }
        }

        Ok(l2_normalize(&pooled))
    }
}

#[async_trait]
impl EmbeddingProvider for LocalEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        self.embed_sync(text)
    }

    fn dimensions(&self) -> usize {
        LOCAL_DIM
    }

    fn name(&self) -> &'static str {
        "local"
    }
}
