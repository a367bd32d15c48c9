//! Entity extraction and summarization over the LLM collaborator.
//!
//! Extraction asks a chat-completions endpoint (JSON mode) for
//! `{entities, relationships}`; raw output is sanitized (C0/C1 controls and
//! `<script>` blocks stripped) before parsing. Transport or parse failures
//! surface as errors so the circuit breaker can count them — the caller
//! tolerates them as empty extraction, keeping the memory usable.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::ExtractionConfig;
use crate::error::{redact_secrets, MemoryError};

/// An entity surfaced from ingested text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    #[serde(rename = "type", default = "default_entity_type")]
    pub entity_type: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

fn default_entity_type() -> String {
    "concept".into()
}

/// A directed relationship between two extracted entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub from: String,
    pub to: String,
    #[serde(rename = "type", default = "default_relationship_type")]
    pub rel_type: String,
}

fn default_relationship_type() -> String {
    "related_to".into()
}

/// The full extraction result. Empty sets are a valid outcome.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Extraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relationships: Vec<ExtractedRelationship>,
}

/// Derives knowledge-graph fragments from free text.
#[async_trait]
pub trait EntityExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<Extraction, MemoryError>;
}

/// Synthesizes a short answer from retrieved memory fragments.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, query: &str, fragments: &[String]) -> Result<String, MemoryError>;
}

/// No-op extractor used when no LLM endpoint is configured.
pub struct DisabledExtractor;

#[async_trait]
impl EntityExtractor for DisabledExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction, MemoryError> {
        Ok(Extraction::default())
    }
}

// ── LLM-backed implementation ─────────────────────────────────────────────────

const EXTRACTION_PROMPT: &str = "Extract entities and relationships from the text. \
Respond with JSON only: {\"entities\": [{\"name\", \"type\", \"metadata\"}], \
\"relationships\": [{\"from\", \"to\", \"type\"}]}. \
Entity names should be short identifiers; relationship types should be lowercase verbs.";

pub struct LlmClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

impl LlmClient {
    pub fn new(config: &ExtractionConfig) -> Result<Self, MemoryError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| MemoryError::Validation {
            field: "extraction.endpoint",
            message: "extraction requires an endpoint when enabled".into(),
        })?;
        let api_key =
            std::env::var(&config.api_key_env).map_err(|_| MemoryError::Validation {
                field: "extraction.api_key_env",
                message: format!("environment variable {} is not set", config.api_key_env),
            })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| MemoryError::ExternalService {
                service: "llm",
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

    /// One chat completion. `json_mode` toggles the endpoint's JSON response
    /// format.
    async fn complete(
        &self,
        system: &str,
        user: &str,
        json_mode: bool,
    ) -> Result<String, MemoryError> {
        let err = |message: String| MemoryError::ExternalService {
            service: "llm",
            operation: "complete",
            message: redact_secrets(&message),
        };

        let mut body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });
        if json_mode {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| err(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(err(format!("endpoint returned {status}: {text}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| err(format!("malformed response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| err("response contained no choices".into()))
    }
}

#[async_trait]
impl EntityExtractor for LlmClient {
    async fn extract(&self, text: &str) -> Result<Extraction, MemoryError> {
        let raw = self.complete(EXTRACTION_PROMPT, text, true).await?;
        let sanitized = sanitize_llm_output(&raw);
        serde_json::from_str(&sanitized).map_err(|e| MemoryError::ExternalService {
            service: "llm",
            operation: "extract",
            message: format!("unparseable extraction output: {e}"),
        })
    }
}

#[async_trait]
impl Summarizer for LlmClient {
    async fn summarize(&self, query: &str, fragments: &[String]) -> Result<String, MemoryError> {
        let prompt = format!(
            "Answer the question from these memory fragments only. Be brief.\n\n\
             Question: {query}\n\nFragments:\n{}",
            fragments.join("\n---\n")
        );
        let raw = self
            .complete("You synthesize answers from retrieved memories.", &prompt, false)
            .await?;
        Ok(sanitize_llm_output(&raw).trim().to_string())
    }
}

static SCRIPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<script\b[^>]*>.*?</script>").expect("valid script pattern")
});

/// Strip C0/C1 control characters (keeping `\n`, `\r`, `\t`) and `<script>`
/// blocks from model output before it is parsed or stored.
pub fn sanitize_llm_output(raw: &str) -> String {
    let without_scripts = SCRIPT_RE.replace_all(raw, "");
    without_scripts
        .chars()
        .filter(|&c| {
            !(c.is_control() && c != '\n' && c != '\r' && c != '\t')
                && !('\u{0080}'..='\u{009F}').contains(&c)
        })
        .collect()
}
