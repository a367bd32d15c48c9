pub mod add_memory;
pub mod hybrid_search;
pub mod read_graph;
pub mod search_memory;
pub mod search_nodes;

use std::future::Future;
use std::sync::Arc;

use add_memory::AddMemoryParams;
use hybrid_search::HybridSearchParams;
use read_graph::ReadGraphParams;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::tool::Parameters;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use search_memory::SearchMemoryParams;
use search_nodes::SearchNodesParams;

use crate::error::MemoryError;
use crate::memory::MemoryManager;
use crate::ratelimit::{RateLimitResult, RateLimiter};

/// Maximum length of `text` on `add_memory`.
const TEXT_MAX: usize = 50_000;
/// Maximum length of search queries.
const QUERY_MAX: usize = 1_000;
/// Valid range for `read_graph` page sizes.
const LIMIT_RANGE: std::ops::RangeInclusive<usize> = 1..=500;
/// Valid range for `hybrid_search` depth.
const DEPTH_RANGE: std::ops::RangeInclusive<u32> = 1..=3;

/// The Mnema MCP tool handler. Holds the orchestrator and the per-tenant
/// rate limiter; exposes the five memory tools via `#[tool_router]`.
#[derive(Clone)]
pub struct MnemaTools {
    tool_router: ToolRouter<Self>,
    manager: Arc<MemoryManager>,
    limiter: Arc<RateLimiter>,
}

fn render_err(err: MemoryError) -> String {
    err.to_user_friendly()
}

fn check_len(value: &str, max: usize, field: &'static str) -> Result<(), String> {
    if value.len() > max {
        return Err(MemoryError::Validation {
            field,
            message: format!("exceeds {max} characters"),
        }
        .to_user_friendly());
    }
    Ok(())
}

#[tool_router]
impl MnemaTools {
    pub fn new(manager: Arc<MemoryManager>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            manager,
            limiter,
        }
    }

    fn check_rate(&self, tenant: &str) -> Result<(), String> {
        match self.limiter.check(tenant) {
            RateLimitResult::Allowed { .. } => Ok(()),
            RateLimitResult::Limited { retry_after } => Err(format!(
                "RATE_LIMITED: tenant '{tenant}' exceeded its request budget. \
                 Retry in {} ms.",
                retry_after.as_millis()
            )),
        }
    }

    /// Store a new memory for a tenant.
    #[tool(description = "Store a memory. Returns the generated node name immediately; embedding and graph enrichment happen in the background.")]
    async fn add_memory(
        &self,
        Parameters(params): Parameters<AddMemoryParams>,
    ) -> Result<String, String> {
        self.check_rate(&params.tenant)?;
        check_len(&params.text, TEXT_MAX, "text")?;

        let metadata = match params.metadata_json.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(serde_json::from_str(raw).map_err(|e| {
                render_err(MemoryError::Validation {
                    field: "metadata_json",
                    message: format!("not valid JSON: {e}"),
                })
            })?),
        };

        tracing::info!(
            tenant = %params.tenant,
            text_len = params.text.len(),
            "add_memory called"
        );

        let name = self
            .manager
            .add_memory(&params.text, &params.tenant, metadata)
            .await
            .map_err(render_err)?;

        serde_json::to_string(&serde_json::json!({
            "name": name,
            "status": "PENDING",
        }))
        .map_err(|e| format!("serialization failed: {e}"))
    }

    /// Semantic search over a tenant's memories.
    #[tool(description = "Search memories by natural-language query. Returns ranked hits with 1-hop graph context.")]
    async fn search_memory(
        &self,
        Parameters(params): Parameters<SearchMemoryParams>,
    ) -> Result<String, String> {
        self.check_rate(&params.tenant)?;
        check_len(&params.query, QUERY_MAX, "query")?;

        let hits = self
            .manager
            .search(&params.query, &params.tenant)
            .await
            .map_err(render_err)?;

        serde_json::to_string(&hits).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Paged read of a tenant's knowledge graph.
    #[tool(description = "Read a tenant's knowledge graph as a page of nodes plus the edges among them.")]
    async fn read_graph(
        &self,
        Parameters(params): Parameters<ReadGraphParams>,
    ) -> Result<String, String> {
        self.check_rate(&params.tenant)?;

        let limit = params.limit.unwrap_or(100);
        if !LIMIT_RANGE.contains(&limit) {
            return Err(render_err(MemoryError::Validation {
                field: "limit",
                message: format!("must be between 1 and 500, got {limit}"),
            }));
        }

        let graph = self
            .manager
            .read_graph(&params.tenant, limit, params.offset.unwrap_or(0))
            .await
            .map_err(render_err)?;

        serde_json::to_string(&graph).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Keyword scan over node names, content, and types.
    #[tool(description = "Find nodes by substring match over name, content, and type. Capped at 50 hits.")]
    async fn search_nodes(
        &self,
        Parameters(params): Parameters<SearchNodesParams>,
    ) -> Result<String, String> {
        self.check_rate(&params.tenant)?;
        check_len(&params.query, QUERY_MAX, "query")?;

        let graph = self
            .manager
            .search_nodes(&params.query, &params.tenant)
            .await
            .map_err(render_err)?;

        serde_json::to_string(&graph).map_err(|e| format!("serialization failed: {e}"))
    }

    /// Vector search plus multi-hop graph expansion, with an optional
    /// LLM-synthesized summary.
    #[tool(description = "Hybrid search: semantic nearest neighbors expanded with multi-hop graph context and an optional summary.")]
    async fn hybrid_search(
        &self,
        Parameters(params): Parameters<HybridSearchParams>,
    ) -> Result<String, String> {
        self.check_rate(&params.tenant)?;
        check_len(&params.query, QUERY_MAX, "query")?;

        let depth = params.depth.unwrap_or(1);
        if !DEPTH_RANGE.contains(&depth) {
            return Err(render_err(MemoryError::Validation {
                field: "depth",
                message: format!("must be between 1 and 3, got {depth}"),
            }));
        }

        let response = self
            .manager
            .hybrid_search(&params.query, &params.tenant, depth)
            .await
            .map_err(render_err)?;

        serde_json::to_string(&response).map_err(|e| format!("serialization failed: {e}"))
    }
}

#[tool_handler]
impl ServerHandler for MnemaTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Mnema is a multi-tenant memory engine. Use add_memory to store text, \
                 search_memory or hybrid_search to retrieve it, and read_graph or \
                 search_nodes to inspect the knowledge graph. Every call is scoped \
                 to a tenant."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
