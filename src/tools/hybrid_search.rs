//! MCP `hybrid_search` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `hybrid_search` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HybridSearchParams {
    /// Natural-language query.
    #[schemars(description = "Natural-language query (max 1,000 chars)")]
    pub query: String,

    /// Tenant to search in.
    #[schemars(description = "Tenant to search in")]
    pub tenant: String,

    /// Graph expansion depth around each hit, between 1 and 3. Defaults to 1.
    #[schemars(description = "Graph expansion depth around each hit, between 1 and 3. Defaults to 1.")]
    pub depth: Option<u32>,
}
