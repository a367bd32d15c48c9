//! Structured error taxonomy.
//!
//! Every fallible operation in the engine surfaces a [`MemoryError`]. Each kind
//! carries a stable machine code, the component and operation it came from, a
//! user-facing suggestion, and a retryability hint, so the tool layer can render
//! actionable messages without string-matching.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Errors produced by the memory engine.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// Input rejected before any execution. Not retryable.
    #[error("validation failed for {field}: {message}")]
    Validation { field: &'static str, message: String },

    /// A referenced entity does not exist. Not retryable.
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    /// Relational store failure. Retryable when transient (lock contention,
    /// busy timeout); not when structural (constraint violation).
    #[error("database error during {operation}: {message}")]
    Database {
        operation: &'static str,
        message: String,
        transient: bool,
    },

    /// Embedding, LLM, or vector-store failure. Retryable; normally reached
    /// through a circuit breaker.
    #[error("{service} failed during {operation}: {message}")]
    ExternalService {
        service: &'static str,
        operation: &'static str,
        message: String,
    },

    /// Transaction or mutex conflict. Retryable after backoff.
    #[error("concurrency conflict during {operation}: {message}")]
    Concurrency {
        operation: &'static str,
        message: String,
    },

    /// A circuit breaker is suppressing calls to a dependency.
    /// Retryable after the reset window.
    #[error("circuit '{name}' is open, retry in {retry_after_ms} ms")]
    CircuitOpen { name: String, retry_after_ms: u64 },
}

impl MemoryError {
    /// Stable machine code for this error kind.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Database { .. } => "DATABASE_ERROR",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Concurrency { .. } => "CONCURRENCY_ERROR",
            Self::CircuitOpen { .. } => "CIRCUIT_OPEN",
        }
    }

    /// The component the error originated in.
    pub fn component(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validator",
            Self::NotFound { .. } => "graph_store",
            Self::Database { .. } => "graph_store",
            Self::ExternalService { service, .. } => service,
            Self::Concurrency { .. } => "transaction_manager",
            Self::CircuitOpen { .. } => "circuit_breaker",
        }
    }

    /// The operation that failed, where one was recorded.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Database { operation, .. }
            | Self::ExternalService { operation, .. }
            | Self::Concurrency { operation, .. } => operation,
            Self::Validation { field, .. } => field,
            Self::NotFound { .. } | Self::CircuitOpen { .. } => "lookup",
        }
    }

    /// Whether a caller may reasonably retry the same request.
    pub fn retryable(&self) -> bool {
        match self {
            Self::Validation { .. } | Self::NotFound { .. } => false,
            Self::Database { transient, .. } => *transient,
            Self::ExternalService { .. }
            | Self::Concurrency { .. }
            | Self::CircuitOpen { .. } => true,
        }
    }

    /// A short, user-facing remediation hint.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::Validation { .. } => {
                "Check the input: names are 1-200 chars of [A-Za-z0-9_-], tenants must be non-empty."
            }
            Self::NotFound { .. } => "Verify the identifier and tenant, then retry the lookup.",
            Self::Database { transient: true, .. } => {
                "The store was busy; retry shortly."
            }
            Self::Database { transient: false, .. } => {
                "This looks structural; inspect the request rather than retrying."
            }
            Self::ExternalService { .. } => {
                "An upstream dependency failed; the request is safe to retry."
            }
            Self::Concurrency { .. } => "Another operation held the transaction; retry after a short backoff.",
            Self::CircuitOpen { .. } => "The dependency is cooling down; retry after the reset window.",
        }
    }

    /// Structured details for logging and tool responses.
    pub fn details(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "component": self.component(),
            "operation": self.operation(),
            "retryable": self.retryable(),
        })
    }

    /// Rendering used by the tool layer: code, message, and suggestion,
    /// with secrets redacted.
    pub fn to_user_friendly(&self) -> String {
        redact_secrets(&format!("{}: {}. {}", self.code(), self, self.suggestion()))
    }

    /// Shorthand for database errors wrapping a rusqlite failure.
    pub fn db(operation: &'static str, err: rusqlite::Error) -> Self {
        let transient = matches!(
            &err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::DatabaseBusy
                    || e.code == rusqlite::ErrorCode::DatabaseLocked
        );
        Self::Database {
            operation,
            message: err.to_string(),
            transient,
        }
    }

    /// True when the underlying failure is a UNIQUE constraint violation
    /// (used to detect lost `get_or_create_node` races).
    pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
        matches!(
            err,
            rusqlite::Error::SqliteFailure(e, _)
                if e.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}

static SECRET_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"sk-[A-Za-z0-9_-]{20,}").expect("valid secret pattern"));

/// Replace API-key-shaped tokens with `[REDACTED]`.
///
/// Applied to every user-facing error rendering and to log lines that may
/// contain upstream error text.
pub fn redact_secrets(message: &str) -> String {
    SECRET_RE.replace_all(message, "[REDACTED]").into_owned()
}
