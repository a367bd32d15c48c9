//! MCP `search_nodes` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `search_nodes` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SearchNodesParams {
    /// Substring to look for in node names, content, and types.
    #[schemars(description = "Substring to look for in node names, content, and types")]
    pub query: String,

    /// Tenant to search in.
    #[schemars(description = "Tenant to search in")]
    pub tenant: String,
}
