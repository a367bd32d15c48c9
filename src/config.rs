use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MnemaConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub extraction: ExtractionConfig,
    pub breaker: BreakerSettings,
    pub recovery: RecoverySettings,
    pub rate_limit: RateLimitSettings,
    pub search: SearchSettings,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    /// `"stdio"` or `"http"`.
    pub transport: String,
    pub host: String,
    pub port: u16,
    pub log_level: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the relational graph database file.
    pub db_path: String,
    /// Directory holding the vector store database.
    pub vector_dir: String,
    /// Directory holding the on-disk embedding cache (one file per key).
    pub embedding_cache_dir: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `"local"` (ONNX, 384 dims), `"remote"` (HTTP, 1536 dims), or `"mock"`.
    pub provider: String,
    pub model: String,
    /// Directory with the local model files (`model.onnx`, `tokenizer.json`).
    pub model_dir: String,
    /// Endpoint for the remote provider.
    pub endpoint: Option<String>,
    /// Environment variable holding the remote provider's API key.
    pub api_key_env: String,
    /// Vector dimension for the mock provider. Local and remote providers
    /// fix their own dimensions.
    pub mock_dimensions: usize,
    /// L1 cache capacity (entries).
    pub cache_capacity: u64,
    /// L1 cache TTL in hours.
    pub cache_ttl_hours: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ExtractionConfig {
    pub enabled: bool,
    /// Chat-completions endpoint used for entity extraction and summaries.
    pub endpoint: Option<String>,
    pub model: String,
    pub api_key_env: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub reset_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RecoverySettings {
    pub enabled: bool,
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// A PENDING node older than this is marked FAILED.
    pub stale_after_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitSettings {
    pub max_requests: u32,
    pub window_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SearchSettings {
    /// k for vector nearest-neighbor search.
    pub default_k: usize,
    /// Subgraph depth used to hydrate context around each hit.
    pub context_depth: u32,
}

impl Default for MnemaConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            embedding: EmbeddingConfig::default(),
            extraction: ExtractionConfig::default(),
            breaker: BreakerSettings::default(),
            recovery: RecoverySettings::default(),
            rate_limit: RateLimitSettings::default(),
            search: SearchSettings::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".into(),
            host: "127.0.0.1".into(),
            port: 8765,
            log_level: "info".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base = default_mnema_dir();
        Self {
            db_path: base.join("graph.db").to_string_lossy().into_owned(),
            vector_dir: base.join("vectors").to_string_lossy().into_owned(),
            embedding_cache_dir: base
                .join("embedding-cache")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "local".into(),
            model: "all-MiniLM-L6-v2".into(),
            model_dir: default_mnema_dir()
                .join("models")
                .to_string_lossy()
                .into_owned(),
            endpoint: None,
            api_key_env: "MNEMA_EMBEDDING_API_KEY".into(),
            mock_dimensions: 384,
            cache_capacity: 10_000,
            cache_ttl_hours: 24,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: None,
            model: "gpt-4o-mini".into(),
            api_key_env: "MNEMA_LLM_API_KEY".into(),
        }
    }
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_ms: 30_000,
        }
    }
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 300,
            stale_after_secs: 600,
        }
    }
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window_secs: 60,
        }
    }
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            default_k: 5,
            context_depth: 1,
        }
    }
}

/// Returns `~/.mnema/`
pub fn default_mnema_dir() -> PathBuf {
    dirs::home_dir()
        .expect("home directory must exist")
        .join(".mnema")
}

/// Returns the default config file path: `~/.mnema/config.toml`
pub fn default_config_path() -> PathBuf {
    default_mnema_dir().join("config.toml")
}

impl MnemaConfig {
    /// Load config from TOML file (if it exists) then apply env var overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(default_config_path())
    }

    /// Load from a specific path, then apply env var overrides.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents =
                std::fs::read_to_string(path).context("failed to read config file")?;
            toml::from_str(&contents).context("failed to parse config TOML")?
        } else {
            info!("no config file at {}, using defaults", path.display());
            MnemaConfig::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    /// (MNEMA_DB, MNEMA_VECTOR_DIR, MNEMA_LOG_LEVEL, MNEMA_EMBEDDING_PROVIDER).
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("MNEMA_DB") {
            self.storage.db_path = val;
        }
        if let Ok(val) = std::env::var("MNEMA_VECTOR_DIR") {
            self.storage.vector_dir = val;
        }
        if let Ok(val) = std::env::var("MNEMA_LOG_LEVEL") {
            self.server.log_level = val;
        }
        if let Ok(val) = std::env::var("MNEMA_EMBEDDING_PROVIDER") {
            self.embedding.provider = val;
        }
    }

    /// Resolve the graph database path, expanding `~` if needed.
    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    /// Resolve the vector store directory.
    pub fn resolved_vector_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.vector_dir)
    }

    /// Resolve the embedding disk-cache directory.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        expand_tilde(&self.storage.embedding_cache_dir)
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        dirs::home_dir()
            .expect("home directory must exist")
            .join(rest)
    } else {
        PathBuf::from(path)
    }
}
