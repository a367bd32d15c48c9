//! End-to-end ingest: fast path, background promotion, graph enrichment, and
//! tenant isolation.

mod helpers;

use std::sync::Arc;

use helpers::{alice_extraction, build_manager, fetch_node, wait_until_ready, StaticExtractor};
use mnema::extract::DisabledExtractor;
use mnema::graph::types::NodeStatus;
use tempfile::TempDir;

#[tokio::test]
async fn ingest_then_read_builds_the_expected_graph() {
    let dir = TempDir::new().unwrap();
    let manager = build_manager(&dir, Arc::new(StaticExtractor(alice_extraction())));

    let name = manager
        .add_memory("Alice uses TypeScript.", "u1", None)
        .await
        .unwrap();

    // Name shape: mem-<8 hex chars>
    assert!(name.starts_with("mem-"));
    assert_eq!(name.len(), 12);
    assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit()));

    // The fast path leaves the anchor PENDING before promotion.
    let node = fetch_node(&manager, &name, "u1").await.unwrap();
    assert!(node.embedding_id.is_some());

    wait_until_ready(&manager, &name, "u1").await;

    let graph = manager.read_graph("u1", 100, 0).await.unwrap();
    let names: Vec<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
    assert!(names.contains(&name.as_str()));
    assert!(names.contains(&"Alice"));
    assert!(names.contains(&"TypeScript"));

    // memory→Alice and memory→TypeScript mentions edges exist.
    let anchor_id = graph.nodes.iter().find(|n| n.name == name).unwrap().id;
    let mentions: Vec<_> = graph
        .edges
        .iter()
        .filter(|e| e.edge_type == "mentions" && e.source_id == anchor_id)
        .collect();
    assert_eq!(mentions.len(), 2);

    // Plus the extracted relationship, lowercased.
    assert!(graph.edges.iter().any(|e| e.edge_type == "uses"));
}

#[tokio::test]
async fn ready_nodes_point_at_live_vectors_in_the_same_tenant() {
    let dir = TempDir::new().unwrap();
    let manager = build_manager(&dir, Arc::new(DisabledExtractor));

    let name = manager
        .add_memory("A fact worth keeping.", "u1", None)
        .await
        .unwrap();
    wait_until_ready(&manager, &name, "u1").await;

    let node = fetch_node(&manager, &name, "u1").await.unwrap();
    assert_eq!(node.status, NodeStatus::Ready);

    // search returns it with the vector hit pointing back at the node.
    let hits = manager.search("A fact worth keeping.", "u1").await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].memory.id, node.embedding_id.unwrap());
    assert_eq!(hits[0].memory.node_name, name);
    assert_eq!(hits[0].memory.tenant, "u1");
}

#[tokio::test]
async fn tenant_isolation_is_complete() {
    let dir = TempDir::new().unwrap();
    let manager = build_manager(&dir, Arc::new(StaticExtractor(alice_extraction())));

    let name = manager
        .add_memory("Alice uses TypeScript.", "u1", None)
        .await
        .unwrap();
    wait_until_ready(&manager, &name, "u1").await;

    // A different tenant sees an empty graph and empty search results.
    let graph = manager.read_graph("u2", 100, 0).await.unwrap();
    assert!(graph.nodes.is_empty());
    assert!(graph.edges.is_empty());

    let hits = manager.search("Alice uses TypeScript.", "u2").await.unwrap();
    assert!(hits.is_empty());

    let found = manager.search_nodes("Alice", "u2").await.unwrap();
    assert!(found.nodes.is_empty());
}

#[tokio::test]
async fn metadata_rides_along_the_anchor() {
    let dir = TempDir::new().unwrap();
    let manager = build_manager(&dir, Arc::new(DisabledExtractor));

    let name = manager
        .add_memory(
            "Tagged memory.",
            "u1",
            Some(serde_json::json!({"source": "cli"})),
        )
        .await
        .unwrap();
    wait_until_ready(&manager, &name, "u1").await;

    let node = fetch_node(&manager, &name, "u1").await.unwrap();
    assert_eq!(node.metadata.unwrap()["source"], "cli");
}

#[tokio::test]
async fn concurrent_ingests_get_distinct_names() {
    let dir = TempDir::new().unwrap();
    let manager = build_manager(&dir, Arc::new(DisabledExtractor));

    let mut handles = Vec::new();
    for i in 0..8 {
        let manager = Arc::clone(&manager);
        handles.push(tokio::spawn(async move {
            manager
                .add_memory(&format!("memory number {i}"), "u1", None)
                .await
                .unwrap()
        }));
    }

    let mut names = Vec::new();
    for handle in handles {
        names.push(handle.await.unwrap());
    }
    for name in &names {
        wait_until_ready(&manager, name, "u1").await;
    }

    names.sort();
    names.dedup();
    assert_eq!(names.len(), 8, "every ingest must get a unique name");
}
