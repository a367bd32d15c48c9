//! Graph data types matching the `nodes` / `edges` / `memory_events` schema.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a node.
///
/// Memory anchors start `PENDING` (fast path done, background AI work not),
/// move to `READY` when the pipeline promotes them, and to `FAILED` when the
/// recovery sweep gives up on them. Entity and concept nodes are created
/// `READY` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "READY")]
    Ready,
    #[serde(rename = "FAILED")]
    Failed,
}

impl NodeStatus {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ready => "READY",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "READY" => Ok(Self::Ready),
            "FAILED" => Ok(Self::Failed),
            _ => Err(format!("unknown node status: {s}")),
        }
    }
}

/// A vertex in the knowledge graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Store-assigned monotone integer id.
    pub id: i64,
    /// Whitelisted identifier, unique per tenant.
    pub name: String,
    /// Free-form tag (`memory`, `person`, `concept`, ...).
    #[serde(rename = "type")]
    pub node_type: String,
    /// Original text for memory anchors; usually absent for entities.
    pub content: Option<String>,
    pub tenant: String,
    /// Handle into the vector store, when the node has an embedding.
    pub embedding_id: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub status: NodeStatus,
    /// Epoch seconds.
    pub created_at: i64,
    /// Epoch seconds.
    pub updated_at: i64,
}

/// A directed relationship between two nodes of the same tenant.
/// Immutable once created; removed only by cascade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    pub id: i64,
    pub source_id: i64,
    pub target_id: i64,
    /// Lowercased verb, e.g. `mentions`, `works_at`.
    #[serde(rename = "type")]
    pub edge_type: String,
    pub weight: f64,
    pub tenant: String,
    pub metadata: Option<serde_json::Value>,
    /// Epoch seconds.
    pub created_at: i64,
}

/// A set of nodes plus the edges whose endpoints both lie in the set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Subgraph {
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
}

impl Subgraph {
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty()
    }
}

/// One shortest-path answer: the ` -> `-joined names and the hop count.
#[derive(Debug, Clone, Serialize)]
pub struct PathResult {
    pub path: String,
    pub depth: u32,
}
