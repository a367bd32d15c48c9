#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mnema::db;
use mnema::embedding::cache::EmbeddingCache;
use mnema::embedding::EmbeddingProvider;
use mnema::error::MemoryError;
use mnema::extract::{EntityExtractor, Extraction};
use mnema::graph::store::get_node_by_name;
use mnema::graph::types::{Node, NodeStatus};
use mnema::graph::GraphStore;
use mnema::memory::{ManagerSettings, MemoryManager};
use mnema::vector::VectorStore;
use tempfile::TempDir;

/// Small dimension keeps test vectors readable.
pub const DIM: usize = 16;

/// Deterministic embedder: a unit spike at a position derived from the text.
/// Equal texts embed identically; different texts usually land on different
/// axes.
pub struct SpikeEmbedder;

#[async_trait]
impl EmbeddingProvider for SpikeEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let mut v = vec![0.0f32; DIM];
        let spike = text.bytes().map(|b| b as usize).sum::<usize>() % DIM;
        v[spike] = 1.0;
        Ok(v)
    }

    fn dimensions(&self) -> usize {
        DIM
    }

    fn name(&self) -> &'static str {
        "spike"
    }
}

/// Extractor that always returns the same fragments.
pub struct StaticExtractor(pub Extraction);

#[async_trait]
impl EntityExtractor for StaticExtractor {
    async fn extract(&self, _text: &str) -> Result<Extraction, MemoryError> {
        Ok(self.0.clone())
    }
}

/// The extraction an LLM would produce for "Alice uses TypeScript."
pub fn alice_extraction() -> Extraction {
    serde_json::from_str(
        r#"{
            "entities": [
                {"name": "Alice", "type": "person"},
                {"name": "TypeScript", "type": "language"}
            ],
            "relationships": [
                {"from": "Alice", "to": "TypeScript", "type": "USES"}
            ]
        }"#,
    )
    .unwrap()
}

/// Build a fully in-memory engine with a deterministic embedder.
pub fn build_manager(
    cache_dir: &TempDir,
    extractor: Arc<dyn EntityExtractor>,
) -> Arc<MemoryManager> {
    let graph = GraphStore::new(db::open_in_memory().unwrap());
    let vectors = VectorStore::open_in_memory(DIM).unwrap();
    let cache = Arc::new(EmbeddingCache::new(
        cache_dir.path(),
        1_000,
        Duration::from_secs(3600),
    ));
    MemoryManager::new(
        graph,
        vectors,
        Arc::new(SpikeEmbedder),
        cache,
        extractor,
        None,
        ManagerSettings::default(),
    )
}

/// Fetch a node through the manager's graph handle.
pub async fn fetch_node(manager: &MemoryManager, name: &str, tenant: &str) -> Option<Node> {
    let graph = manager.graph();
    let name = name.to_string();
    let tenant = tenant.to_string();
    tokio::task::spawn_blocking(move || {
        graph.with_conn(|conn| get_node_by_name(conn, &name, &tenant))
    })
    .await
    .unwrap()
    .unwrap()
}

/// Poll until the background pipeline promotes a node to READY.
pub async fn wait_until_ready(manager: &MemoryManager, name: &str, tenant: &str) {
    for _ in 0..150 {
        if let Some(node) = fetch_node(manager, name, tenant).await {
            if node.status == NodeStatus::Ready {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("node {name} never became READY");
}
