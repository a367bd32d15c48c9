//! Mnema — a local-first, multi-tenant memory engine for AI agents,
//! served over [MCP](https://modelcontextprotocol.io/).
//!
//! Free-form text goes in; vector embeddings and knowledge-graph fragments
//! come out, queryable by hybrid semantic search plus multi-hop traversal.
//! Everything is scoped to a tenant.
//!
//! # Architecture
//!
//! - **Graph store**: SQLite (`nodes`, `edges`, `memory_events`) with
//!   recursive CTEs for traversal and savepoint-nested transactions
//! - **Vector store**: a second SQLite database with a
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) table — an
//!   independent backend, kept consistent with the graph at runtime by
//!   compensating rollbacks
//! - **Embeddings**: local ONNX (all-MiniLM-L6-v2, 384 dims), remote HTTP
//!   (1536 dims), or an explicitly configured mock, behind a two-tier
//!   (memory + disk) cache
//! - **Resilience**: a circuit breaker per external dependency, a
//!   fire-and-forget background pipeline, and a recovery sweep for anchors
//!   the pipeline abandoned
//! - **Transport**: MCP over stdio (primary) or Streamable HTTP
//!
//! # Modules
//!
//! - [`config`] — TOML + environment configuration
//! - [`db`] — graph database initialization and schema
//! - [`graph`] — node/edge persistence and the traversal engine
//! - [`vector`] — the vector backend
//! - [`embedding`] — providers and the two-tier cache
//! - [`extract`] — LLM entity extraction and summarization contracts
//! - [`txn`] — nested transactions, compensations, and sagas
//! - [`breaker`] — the circuit breaker
//! - [`memory`] — the orchestrator (ingest and retrieval)
//! - [`recovery`] — the PENDING-node recovery sweep
//! - [`ratelimit`] — per-tenant fixed-window rate limiting
//! - [`tools`] / [`server`] — the MCP surface

pub mod breaker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod graph;
pub mod memory;
pub mod ratelimit;
pub mod recovery;
pub mod server;
pub mod tools;
pub mod txn;
pub mod validate;
pub mod vector;
