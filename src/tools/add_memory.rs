//! MCP `add_memory` tool parameter definition.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `add_memory` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AddMemoryParams {
    /// The free-form text to remember.
    #[schemars(description = "The free-form text to remember (max 50,000 chars)")]
    pub text: String,

    /// Tenant that owns this memory.
    #[schemars(description = "Tenant that owns this memory. All reads and writes are scoped to it.")]
    pub tenant: String,

    /// Optional JSON object with caller metadata, serialized as a string.
    #[schemars(description = "Optional JSON object with caller metadata, serialized as a string")]
    pub metadata_json: Option<String>,
}
