//! MCP `search_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchMemoryParams {
    /// Natural-language query.
    #[schemars(description = "Natural-language query (max 1,000 chars)")]
    pub query: String,

    /// Tenant to search in.
    #[schemars(description = "Tenant to search in")]
    pub tenant: String,
}
