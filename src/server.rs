//! MCP server initialization for stdio and Streamable-HTTP transports.
//!
//! [`serve_stdio`] and [`serve_http`] wire the stores, embedding pipeline,
//! extraction client, recovery worker, and rate limiter into a running
//! server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rmcp::ServiceExt;

use crate::breaker::BreakerConfig;
use crate::config::MnemaConfig;
use crate::embedding::cache::EmbeddingCache;
use crate::embedding::{self, EmbeddingProvider};
use crate::extract::{DisabledExtractor, EntityExtractor, LlmClient, Summarizer};
use crate::graph::GraphStore;
use crate::memory::{ManagerSettings, MemoryManager};
use crate::ratelimit::{RateLimiter, RateLimiterConfig};
use crate::recovery::RecoveryWorker;
use crate::tools::MnemaTools;
use crate::db;
use crate::vector::VectorStore;

/// Shared setup: open both stores, build the embedding pipeline and the
/// extraction client, start the recovery worker. Returns the orchestrator
/// and rate limiter for the tool layer.
fn setup_shared_state(config: &MnemaConfig) -> Result<(Arc<MemoryManager>, Arc<RateLimiter>)> {
    let graph = GraphStore::new(db::open_database(config.resolved_db_path())?);

    let provider: Arc<dyn EmbeddingProvider> =
        Arc::from(embedding::create_provider(&config.embedding)?);
    tracing::info!(
        provider = provider.name(),
        dimensions = provider.dimensions(),
        "embedding provider ready"
    );

    let vectors = VectorStore::open(config.resolved_vector_dir(), provider.dimensions())?;

    let cache = Arc::new(EmbeddingCache::new(
        config.resolved_cache_dir(),
        config.embedding.cache_capacity,
        Duration::from_secs(config.embedding.cache_ttl_hours * 3600),
    ));

    let (extractor, summarizer): (Arc<dyn EntityExtractor>, Option<Arc<dyn Summarizer>>) =
        if config.extraction.enabled {
            let client = Arc::new(LlmClient::new(&config.extraction)?);
            tracing::info!(model = %config.extraction.model, "LLM extraction enabled");
            let extractor: Arc<dyn EntityExtractor> = client.clone();
            let summarizer: Arc<dyn Summarizer> = client;
            (extractor, Some(summarizer))
        } else {
            tracing::info!("LLM extraction disabled, memories are stored without graph fragments");
            (Arc::new(DisabledExtractor), None)
        };

    let manager = MemoryManager::new(
        graph.clone(),
        vectors,
        provider,
        cache,
        extractor,
        summarizer,
        ManagerSettings {
            breaker: BreakerConfig {
                failure_threshold: config.breaker.failure_threshold,
                reset_timeout: Duration::from_millis(config.breaker.reset_timeout_ms),
            },
            search_k: config.search.default_k,
            context_depth: config.search.context_depth,
        },
    );

    if config.recovery.enabled {
        let worker = RecoveryWorker::new(
            graph,
            Duration::from_secs(config.recovery.interval_secs),
            Duration::from_secs(config.recovery.stale_after_secs),
        );
        worker.spawn();
        tracing::info!(
            interval_secs = config.recovery.interval_secs,
            "recovery worker started"
        );
    }

    let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
        max_requests: config.rate_limit.max_requests,
        window: Duration::from_secs(config.rate_limit.window_secs),
    }));

    Ok((manager, limiter))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: MnemaConfig) -> Result<()> {
    tracing::info!("starting Mnema MCP server on stdio");

    let (manager, limiter) = setup_shared_state(&config)?;

    let tools = MnemaTools::new(manager, limiter);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running — waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP transport.
pub async fn serve_http(config: MnemaConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!(addr = %bind_addr, "starting Mnema MCP server on HTTP");

    let (manager, limiter) = setup_shared_state(&config)?;

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(MnemaTools::new(manager.clone(), limiter.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    Ok(())
}
