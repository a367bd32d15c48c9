//! The memory orchestrator.
//!
//! Ingest runs in two halves. The fast path synchronously writes a `PENDING`
//! anchor node whose `embedding_id` forward-references a vector that does not
//! exist yet, then returns the generated name. The slow path runs in a
//! spawned task: embedding (cache + breaker), vector upsert (breaker), entity
//! extraction (breaker, failure tolerated), and one outer SQL transaction
//! that enriches the graph and promotes the anchor to `READY`. A
//! compensating vector-delete is registered before the SQL phase, so a
//! graph-side abort removes the orphaned vector — that keeps the invariant
//! that `READY` nodes always point at live vectors.
//!
//! Retrieval embeds the query, runs tenant-filtered k-NN, hydrates each hit
//! to its graph node through `embedding_id`, and expands a bounded subgraph
//! of context per hit.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::breaker::{BreakerConfig, CircuitBreaker};
use crate::embedding::cache::EmbeddingCache;
use crate::embedding::EmbeddingProvider;
use crate::error::{redact_secrets, MemoryError};
use crate::extract::{EntityExtractor, Extraction, Summarizer};
use crate::graph::types::{NodeStatus, Subgraph};
use crate::graph::{query, store, GraphStore};
use crate::txn::{FnStep, Saga, SagaState, StepFuture, TransactionManager};
use crate::validate::{normalize_entity_name, validate_tenant};
use crate::vector::{VectorHit, VectorRecord, VectorStore};

/// Knobs the orchestrator takes from the application config.
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub breaker: BreakerConfig,
    /// k for vector nearest-neighbor search.
    pub search_k: usize,
    /// Subgraph depth used to hydrate context around each hit.
    pub context_depth: u32,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            breaker: BreakerConfig::default(),
            search_k: 5,
            context_depth: 1,
        }
    }
}

/// One retrieval result: the vector record, its similarity, and the
/// surrounding graph fragment. `context` is `None` when the background
/// pipeline has not yet promoted (or has failed to promote) the anchor.
#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub memory: VectorHit,
    pub similarity: f64,
    pub context: Option<Subgraph>,
}

/// Response of a hybrid query: hits with depth-bounded context plus an
/// optional LLM synthesis over the fragment set.
#[derive(Debug, Serialize)]
pub struct HybridResponse {
    pub hits: Vec<SearchHit>,
    pub summary: Option<String>,
}

pub struct MemoryManager {
    graph: GraphStore,
    vectors: VectorStore,
    txn: Arc<TransactionManager>,
    embedder: Arc<dyn EmbeddingProvider>,
    cache: Arc<EmbeddingCache>,
    extractor: Arc<dyn EntityExtractor>,
    summarizer: Option<Arc<dyn Summarizer>>,
    embed_breaker: CircuitBreaker,
    vector_breaker: CircuitBreaker,
    extract_breaker: CircuitBreaker,
    /// `recent:<tenant>` → last ingested content.
    sessions: moka::sync::Cache<String, String>,
    settings: ManagerSettings,
}

fn task_err(e: tokio::task::JoinError) -> MemoryError {
    MemoryError::Database {
        operation: "blocking_task",
        message: format!("task failed: {e}"),
        transient: false,
    }
}

impl MemoryManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        graph: GraphStore,
        vectors: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
        cache: Arc<EmbeddingCache>,
        extractor: Arc<dyn EntityExtractor>,
        summarizer: Option<Arc<dyn Summarizer>>,
        settings: ManagerSettings,
    ) -> Arc<Self> {
        let txn = Arc::new(TransactionManager::new(graph.connection()));
        let breaker = settings.breaker.clone();
        Arc::new(Self {
            graph,
            vectors,
            txn,
            embedder,
            cache,
            extractor,
            summarizer,
            embed_breaker: CircuitBreaker::new("embedding", breaker.clone()),
            vector_breaker: CircuitBreaker::new("vector_store", breaker.clone()),
            extract_breaker: CircuitBreaker::new("extraction", breaker),
            sessions: moka::sync::Cache::builder()
                .max_capacity(1_000)
                .time_to_live(Duration::from_secs(3600))
                .build(),
            settings,
        })
    }

    /// The graph handle, shared with the recovery worker.
    pub fn graph(&self) -> GraphStore {
        self.graph.clone()
    }

    /// The transaction manager (singleton per engine instance).
    pub fn transactions(&self) -> Arc<TransactionManager> {
        Arc::clone(&self.txn)
    }

    /// Last content ingested for a tenant, if still in the session window.
    pub fn recent(&self, tenant: &str) -> Option<String> {
        self.sessions.get(&format!("recent:{tenant}"))
    }

    // ── Ingest ────────────────────────────────────────────────────────────

    /// Store a memory. Returns the generated node name (`mem-<hex8>`)
    /// immediately; embedding, vector upsert, and graph enrichment run in a
    /// background task whose failure never reaches this caller.
    pub async fn add_memory(
        self: &Arc<Self>,
        content: &str,
        tenant: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<String, MemoryError> {
        let tenant = validate_tenant(tenant)?;
        if content.trim().is_empty() {
            return Err(MemoryError::Validation {
                field: "content",
                message: "content must not be empty".into(),
            });
        }

        let vector_id = uuid::Uuid::new_v4().to_string();
        let node_name = format!("mem-{}", &vector_id[..8]);

        // Fast path: PENDING node plus audit event, synchronous.
        {
            let graph = self.graph.clone();
            let name = node_name.clone();
            let content = content.to_string();
            let tenant = tenant.clone();
            let vector_id = vector_id.clone();
            let metadata = metadata.clone();
            tokio::task::spawn_blocking(move || {
                graph.with_conn(|conn| {
                    store::insert_pending_node(
                        conn,
                        &name,
                        &content,
                        &tenant,
                        &vector_id,
                        metadata.as_ref(),
                    )?;
                    store::record_event(
                        conn,
                        "MEMORY_ADDED_FAST",
                        &format!("stored memory {name}"),
                        None,
                        &tenant,
                    )
                })
            })
            .await
            .map_err(task_err)??;
        }

        self.sessions
            .insert(format!("recent:{tenant}"), content.to_string());

        tracing::info!(tenant = %tenant, node = %node_name, "memory stored, background processing queued");

        // Slow path: fire and forget. A crash here leaves the node PENDING
        // for the recovery sweep.
        let manager = Arc::clone(self);
        let content = content.to_string();
        let spawn_name = node_name.clone();
        tokio::spawn(async move {
            if let Err(err) = manager
                .process_memory(&spawn_name, &vector_id, &content, &tenant, metadata)
                .await
            {
                tracing::warn!(
                    tenant = %tenant,
                    node = %spawn_name,
                    error = %redact_secrets(&err.to_string()),
                    "background memory processing failed"
                );
                let graph = manager.graph.clone();
                let details = err.details();
                let _ = tokio::task::spawn_blocking(move || {
                    graph.with_conn(|conn| {
                        store::record_event(
                            conn,
                            "MEMORY_PIPELINE_FAILED",
                            &format!("background processing failed for {spawn_name}"),
                            Some(&details),
                            &tenant,
                        )
                    })
                })
                .await;
            }
        });

        Ok(node_name)
    }

    /// The background half of ingest. Embeds, upserts the vector, extracts
    /// entities, then promotes the anchor inside one outer transaction.
    async fn process_memory(
        &self,
        node_name: &str,
        vector_id: &str,
        content: &str,
        tenant: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), MemoryError> {
        // a. Embedding through cache and breaker.
        let vector = self.embed_text(content).await?;

        let saga_id = self.txn.begin_saga();

        // b. Vector upsert through its breaker. Committed before the SQL
        // side proceeds; the compensation below undoes it on SQL failure.
        let record = VectorRecord {
            id: vector_id.to_string(),
            vector: (*vector).clone(),
            text: content.to_string(),
            tenant: tenant.to_string(),
            timestamp: store::now_epoch(),
            node_name: node_name.to_string(),
            metadata,
        };
        let upsert_result = {
            let vectors = self.vectors.clone();
            self.vector_breaker
                .call(|| async move {
                    tokio::task::spawn_blocking(move || vectors.upsert(&record))
                        .await
                        .map_err(task_err)?
                })
                .await
        };
        if let Err(err) = upsert_result {
            self.txn.complete_saga(&saga_id, SagaState::RolledBack);
            return Err(err);
        }
        self.txn.saga_add_vector(&saga_id, vector_id);

        // c. Extraction through its breaker. Any failure degrades to an
        // empty extraction; the memory stays usable without graph context.
        let extraction = {
            let extractor = Arc::clone(&self.extractor);
            let text = content.to_string();
            match self
                .extract_breaker
                .call(|| async move { extractor.extract(&text).await })
                .await
            {
                Ok(extraction) => extraction,
                Err(err) => {
                    tracing::warn!(
                        node = %node_name,
                        error = %redact_secrets(&err.to_string()),
                        "entity extraction failed, continuing without graph fragments"
                    );
                    Extraction::default()
                }
            }
        };

        // d. One outer transaction: enrich the graph and promote the anchor.
        let result = {
            let vectors = self.vectors.clone();
            let vector_id = vector_id.to_string();
            let node_name = node_name.to_string();
            let tenant = tenant.to_string();
            self.txn
                .execute("promote_memory", move |ctx| {
                    ctx.register_compensation(
                        format!("delete vector {vector_id}"),
                        Box::new(move || vectors.delete_ids(&[vector_id]).map(|_| ())),
                    );

                    let conn = ctx.conn();
                    let anchor = store::get_node_by_name(conn, &node_name, &tenant)?
                        .ok_or_else(|| MemoryError::NotFound {
                            kind: "node",
                            name: node_name.clone(),
                        })?;

                    let mut entities = 0usize;
                    let mut edges = 0usize;

                    for entity in &extraction.entities {
                        let Some(name) = normalize_entity_name(&entity.name) else {
                            tracing::debug!(raw = %entity.name, "skipping unusable entity name");
                            continue;
                        };
                        ctx.nested(|inner| {
                            let entity_id = store::get_or_create_node(
                                inner.conn(),
                                &name,
                                &entity.entity_type,
                                &tenant,
                            )?;
                            if entity_id != anchor.id {
                                store::insert_edge(
                                    inner.conn(),
                                    anchor.id,
                                    entity_id,
                                    "mentions",
                                    1.0,
                                    &tenant,
                                    None,
                                )?;
                            }
                            Ok(())
                        })?;
                        entities += 1;
                        edges += 1;
                    }

                    for rel in &extraction.relationships {
                        let (Some(from), Some(to)) = (
                            normalize_entity_name(&rel.from),
                            normalize_entity_name(&rel.to),
                        ) else {
                            continue;
                        };
                        if from == to {
                            // No self-loops.
                            continue;
                        }
                        ctx.nested(|inner| {
                            let from_id =
                                store::get_or_create_node(inner.conn(), &from, "concept", &tenant)?;
                            let to_id =
                                store::get_or_create_node(inner.conn(), &to, "concept", &tenant)?;
                            store::insert_edge(
                                inner.conn(),
                                from_id,
                                to_id,
                                &rel.rel_type.to_lowercase(),
                                1.0,
                                &tenant,
                                None,
                            )?;
                            Ok(())
                        })?;
                        edges += 1;
                    }

                    store::set_node_status(conn, anchor.id, NodeStatus::Ready)?;
                    store::record_event(
                        conn,
                        "MEMORY_READY",
                        &format!("memory {node_name} processed"),
                        Some(&serde_json::json!({"entities": entities, "edges": edges})),
                        &tenant,
                    )?;
                    Ok(())
                })
                .await
        };

        match result {
            Ok(()) => {
                self.txn.complete_saga(&saga_id, SagaState::Committed);
                tracing::debug!(node = %node_name, "memory promoted to READY");
                Ok(())
            }
            Err(err) => {
                // The compensation already removed the vector.
                self.txn.complete_saga(&saga_id, SagaState::RolledBack);
                Err(err)
            }
        }
    }

    /// Embed text through the two-tier cache and the embedding breaker.
    /// Idempotent per input: repeat calls serve the cached vector.
    pub async fn embed_text(&self, text: &str) -> Result<Arc<Vec<f32>>, MemoryError> {
        let key = EmbeddingCache::key(text);
        if let Some(vector) = self.cache.get(&key) {
            return Ok(vector);
        }

        let embedder = Arc::clone(&self.embedder);
        let text = text.to_string();
        let vector = self
            .embed_breaker
            .call(|| async move { embedder.embed(&text).await })
            .await?;

        if vector.len() != self.vectors.dimensions() {
            return Err(MemoryError::ExternalService {
                service: "embedding",
                operation: "embed",
                message: format!(
                    "provider returned {} dims, vector store expects {}",
                    vector.len(),
                    self.vectors.dimensions()
                ),
            });
        }

        Ok(self.cache.put(&key, vector))
    }

    // ── Retrieval ─────────────────────────────────────────────────────────

    /// Semantic search: k-NN hits hydrated with 1-hop graph context.
    pub async fn search(&self, query: &str, tenant: &str) -> Result<Vec<SearchHit>, MemoryError> {
        self.search_with_depth(query, tenant, self.settings.context_depth, false)
            .await
    }

    /// Hybrid search: k-NN plus depth-bounded bidirectional graph expansion
    /// per hit, with an optional LLM summary of the fragments.
    pub async fn hybrid_search(
        &self,
        query: &str,
        tenant: &str,
        depth: u32,
    ) -> Result<HybridResponse, MemoryError> {
        let hits = self.search_with_depth(query, tenant, depth, true).await?;

        let summary = match &self.summarizer {
            Some(summarizer) if !hits.is_empty() => {
                let fragments: Vec<String> =
                    hits.iter().map(|h| h.memory.text.clone()).collect();
                match summarizer.summarize(query, &fragments).await {
                    Ok(text) => Some(text),
                    Err(err) => {
                        tracing::warn!(
                            error = %redact_secrets(&err.to_string()),
                            "summary synthesis failed, returning fragments only"
                        );
                        None
                    }
                }
            }
            _ => None,
        };

        Ok(HybridResponse { hits, summary })
    }

    async fn search_with_depth(
        &self,
        query: &str,
        tenant: &str,
        depth: u32,
        bidirectional: bool,
    ) -> Result<Vec<SearchHit>, MemoryError> {
        let tenant = validate_tenant(tenant)?;
        if query.trim().is_empty() {
            return Err(MemoryError::Validation {
                field: "query",
                message: "query must not be empty".into(),
            });
        }

        let vector = self.embed_text(query).await?;

        let hits = {
            let vectors = self.vectors.clone();
            let tenant = tenant.clone();
            let k = self.settings.search_k;
            let vector = (*vector).clone();
            tokio::task::spawn_blocking(move || vectors.search(&vector, &tenant, k, None))
                .await
                .map_err(task_err)??
        };

        let graph = self.graph.clone();
        tokio::task::spawn_blocking(move || {
            graph.with_conn(|conn| {
                hits.into_iter()
                    .map(|hit| {
                        let node = store::get_node_by_embedding(conn, &hit.id, &tenant)?;
                        let context = match &node {
                            Some(node) => Some(if bidirectional {
                                query::deep_context(conn, &node.name, &tenant, depth)?
                            } else {
                                query::subgraph(conn, &node.name, &tenant, depth)?
                            }),
                            // Background processing not finished (or failed):
                            // the memory is returned without graph context.
                            None => None,
                        };
                        Ok(SearchHit {
                            similarity: hit.similarity,
                            memory: hit,
                            context,
                        })
                    })
                    .collect::<Result<Vec<_>, MemoryError>>()
            })
        })
        .await
        .map_err(task_err)?
    }

    /// Paged read of a tenant's graph.
    pub async fn read_graph(
        &self,
        tenant: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Subgraph, MemoryError> {
        let tenant = validate_tenant(tenant)?;
        let graph = self.graph.clone();
        tokio::task::spawn_blocking(move || {
            graph.with_conn(|conn| query::read_graph(conn, &tenant, limit, offset))
        })
        .await
        .map_err(task_err)?
    }

    /// Keyword scan over node names, content, and types.
    pub async fn search_nodes(&self, text: &str, tenant: &str) -> Result<Subgraph, MemoryError> {
        let tenant = validate_tenant(tenant)?;
        let text = text.to_string();
        let graph = self.graph.clone();
        tokio::task::spawn_blocking(move || {
            graph.with_conn(|conn| query::search_nodes(conn, &text, &tenant))
        })
        .await
        .map_err(task_err)?
    }

    // ── Purge ─────────────────────────────────────────────────────────────

    /// Tenant-scoped purge as an explicit saga: vectors go first (with a
    /// restore compensation), then the graph side deletes nodes (edges by
    /// cascade) inside a transaction. Returns the number of nodes removed.
    pub async fn delete_tenant(&self, tenant: &str) -> Result<usize, MemoryError> {
        let tenant = validate_tenant(tenant)?;

        let records = {
            let vectors = self.vectors.clone();
            let tenant = tenant.clone();
            tokio::task::spawn_blocking(move || vectors.collect_tenant(&tenant))
                .await
                .map_err(task_err)??
        };
        let records = Arc::new(records);
        let removed_nodes = Arc::new(AtomicUsize::new(0));

        let delete_vectors = {
            let vectors = self.vectors.clone();
            let records = Arc::clone(&records);
            let restore_vectors = self.vectors.clone();
            let restore_records = Arc::clone(&records);
            FnStep::new(
                "delete_vectors",
                move || -> StepFuture {
                    let vectors = vectors.clone();
                    let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
                    Box::pin(async move {
                        tokio::task::spawn_blocking(move || vectors.delete_ids(&ids).map(|_| ()))
                            .await
                            .map_err(task_err)?
                    })
                },
                move || -> StepFuture {
                    let vectors = restore_vectors.clone();
                    let records = Arc::clone(&restore_records);
                    Box::pin(async move {
                        tokio::task::spawn_blocking(move || {
                            for record in records.iter() {
                                vectors.upsert(record)?;
                            }
                            Ok(())
                        })
                        .await
                        .map_err(task_err)?
                    })
                },
            )
        };

        let purge_graph = {
            let txn = Arc::clone(&self.txn);
            let tenant = tenant.clone();
            let removed = Arc::clone(&removed_nodes);
            FnStep::new(
                "purge_graph",
                move || -> StepFuture {
                    let txn = Arc::clone(&txn);
                    let tenant = tenant.clone();
                    let removed = Arc::clone(&removed);
                    Box::pin(async move {
                        txn.execute("purge_tenant", move |ctx| {
                            let count = store::purge_tenant_nodes(ctx.conn(), &tenant)?;
                            store::record_event(
                                ctx.conn(),
                                "TENANT_PURGED",
                                &format!("removed {count} nodes"),
                                None,
                                &tenant,
                            )?;
                            removed.store(count, Ordering::SeqCst);
                            Ok(())
                        })
                        .await
                    })
                },
                // SQL side rolls back on its own; nothing to undo here.
                || -> StepFuture { Box::pin(async { Ok(()) }) },
            )
        };

        Saga::new("delete_tenant")
            .step(Box::new(delete_vectors))
            .step(Box::new(purge_graph))
            .run()
            .await?;

        Ok(removed_nodes.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::extract::DisabledExtractor;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const DIM: usize = 16;

    /// Deterministic embedder: a unit spike at a position derived from the
    /// text, so equal texts collide and different texts (usually) do not.
    struct SpikeEmbedder;

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

    /// Extractor with a fixed answer, for pipeline tests.
    struct StaticExtractor(Extraction);

    #[async_trait]
    impl EntityExtractor for StaticExtractor {
        async fn extract(&self, _text: &str) -> Result<Extraction, MemoryError> {
            Ok(self.0.clone())
        }
    }

    fn build_manager(
        cache_dir: &TempDir,
        extractor: Arc<dyn EntityExtractor>,
    ) -> Arc<MemoryManager> {
        let graph = GraphStore::new(db::open_in_memory().unwrap());
        let vectors = VectorStore::open_in_memory(DIM).unwrap();
        let cache = Arc::new(EmbeddingCache::new(
            cache_dir.path(),
            1000,
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

    async fn wait_until_ready(manager: &MemoryManager, name: &str, tenant: &str) {
        for _ in 0..100 {
            let status = {
                let graph = manager.graph();
                let name = name.to_string();
                let tenant = tenant.to_string();
                tokio::task::spawn_blocking(move || {
                    graph.with_conn(|conn| {
                        Ok(store::get_node_by_name(conn, &name, &tenant)?.map(|n| n.status))
                    })
                })
                .await
                .unwrap()
                .unwrap()
            };
            if status == Some(NodeStatus::Ready) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("node {name} never became READY");
    }

    #[tokio::test]
    async fn add_memory_returns_name_and_promotes_in_background() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, Arc::new(DisabledExtractor));

        let name = manager
            .add_memory("Rust ships fearless concurrency.", "u1", None)
            .await
            .unwrap();
        assert!(name.starts_with("mem-"));
        assert_eq!(name.len(), 12);
        assert!(name[4..].chars().all(|c| c.is_ascii_hexdigit()));

        wait_until_ready(&manager, &name, "u1").await;

        // The READY node points at a live vector in the same tenant.
        let node = {
            let graph = manager.graph();
            let name = name.clone();
            tokio::task::spawn_blocking(move || {
                graph.with_conn(|conn| Ok(store::get_node_by_name(conn, &name, "u1")?.unwrap()))
            })
            .await
            .unwrap()
            .unwrap()
        };
        let embedding_id = node.embedding_id.unwrap();
        let record = manager.vectors.get(&embedding_id).unwrap().unwrap();
        assert_eq!(record.tenant, "u1");
        assert_eq!(record.node_name, name);

        // Session LRU remembers the last content.
        assert_eq!(
            manager.recent("u1").as_deref(),
            Some("Rust ships fearless concurrency.")
        );
    }

    #[tokio::test]
    async fn extraction_enriches_graph_with_entities_and_relationships() {
        let dir = TempDir::new().unwrap();
        let extraction: Extraction = serde_json::from_str(
            r#"{
                "entities": [
                    {"name": "Alice", "type": "person"},
                    {"name": "TypeScript", "type": "language"}
                ],
                "relationships": [
                    {"from": "Alice", "to": "TypeScript", "type": "USES"},
                    {"from": "Alice", "to": "Alice", "type": "is"}
                ]
            }"#,
        )
        .unwrap();
        let manager = build_manager(&dir, Arc::new(StaticExtractor(extraction)));

        let name = manager
            .add_memory("Alice uses TypeScript.", "u1", None)
            .await
            .unwrap();
        wait_until_ready(&manager, &name, "u1").await;

        let graph = manager.read_graph("u1", 100, 0).await.unwrap();
        let names: Vec<&str> = graph.nodes.iter().map(|n| n.name.as_str()).collect();
        assert!(names.contains(&name.as_str()));
        assert!(names.contains(&"Alice"));
        assert!(names.contains(&"TypeScript"));

        // mentions edges from the anchor plus the uses relationship;
        // the Alice->Alice self-loop was skipped.
        let mentions = graph
            .edges
            .iter()
            .filter(|e| e.edge_type == "mentions")
            .count();
        assert_eq!(mentions, 2);
        assert!(graph.edges.iter().any(|e| e.edge_type == "uses"));
        assert_eq!(graph.edges.len(), 3);
    }

    #[tokio::test]
    async fn search_hydrates_context_and_respects_tenancy() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, Arc::new(DisabledExtractor));

        let name = manager
            .add_memory("The deploy pipeline runs nightly.", "u1", None)
            .await
            .unwrap();
        wait_until_ready(&manager, &name, "u1").await;

        let hits = manager
            .search("The deploy pipeline runs nightly.", "u1")
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].similarity > 0.99);
        let context = hits[0].context.as_ref().unwrap();
        assert!(context.nodes.iter().any(|n| n.name == name));

        // Other tenants see nothing.
        let other = manager
            .search("The deploy pipeline runs nightly.", "u2")
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn hybrid_search_without_summarizer_has_no_summary() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, Arc::new(DisabledExtractor));

        let name = manager
            .add_memory("Graphs connect memories.", "u1", None)
            .await
            .unwrap();
        wait_until_ready(&manager, &name, "u1").await;

        let response = manager
            .hybrid_search("Graphs connect memories.", "u1", 2)
            .await
            .unwrap();
        assert_eq!(response.hits.len(), 1);
        assert!(response.summary.is_none());
    }

    #[tokio::test]
    async fn embed_text_is_idempotent_via_cache() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, Arc::new(DisabledExtractor));

        let a = manager.embed_text("same input").await.unwrap();
        let b = manager.embed_text("same input").await.unwrap();
        assert_eq!(*a, *b);
        assert_eq!(manager.cache.stats().l1_hits, 1);
    }

    #[tokio::test]
    async fn delete_tenant_purges_both_stores() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, Arc::new(DisabledExtractor));

        let name = manager
            .add_memory("to be purged", "u1", None)
            .await
            .unwrap();
        wait_until_ready(&manager, &name, "u1").await;
        let other = manager
            .add_memory("survives elsewhere", "u2", None)
            .await
            .unwrap();
        wait_until_ready(&manager, &other, "u2").await;

        let removed = manager.delete_tenant("u1").await.unwrap();
        assert_eq!(removed, 1);

        assert!(manager.read_graph("u1", 100, 0).await.unwrap().is_empty());
        assert_eq!(manager.vectors.count_tenant("u1").unwrap(), 0);

        // The other tenant is untouched.
        assert_eq!(manager.read_graph("u2", 100, 0).await.unwrap().nodes.len(), 1);
        assert_eq!(manager.vectors.count_tenant("u2").unwrap(), 1);
    }

    #[tokio::test]
    async fn validation_failures_are_synchronous() {
        let dir = TempDir::new().unwrap();
        let manager = build_manager(&dir, Arc::new(DisabledExtractor));

        assert!(manager.add_memory("", "u1", None).await.is_err());
        assert!(manager.add_memory("ok", "   ", None).await.is_err());
        assert!(manager.search("", "u1").await.is_err());
    }
}
