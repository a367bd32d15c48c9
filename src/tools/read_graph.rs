//! MCP `read_graph` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `read_graph` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ReadGraphParams {
    /// Tenant whose graph to read.
    #[schemars(description = "Tenant whose graph to read")]
    pub tenant: String,

    /// Page size. Defaults to 100, max 500.
    #[schemars(description = "Page size, between 1 and 500. Defaults to 100.")]
    pub limit: Option<usize>,

    /// Page offset. Defaults to 0.
    #[schemars(description = "Page offset. Defaults to 0.")]
    pub offset: Option<usize>,
}
