//! The vector backend — a typed vector table with per-tenant filtering and
//! delete-by-id.
//!
//! Lives in its own SQLite database file (one per vector directory) with a
//! `vec0` virtual table for the embeddings and a plain side-table for record
//! fields. Being a separate database is deliberate: its writes cannot join
//! the graph store's transactions, so cross-store consistency is enforced at
//! runtime by the transaction manager's compensations, not by the engine.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::db::load_sqlite_vec;
use crate::error::MemoryError;

/// A full record as stored: embedding plus audit fields.
#[derive(Debug, Clone, Serialize)]
pub struct VectorRecord {
    /// UUID handle; graph nodes reference it through `embedding_id`.
    pub id: String,
    pub vector: Vec<f32>,
    pub text: String,
    pub tenant: String,
    /// Epoch seconds.
    pub timestamp: i64,
    /// Back-reference to the graph node, for audit.
    pub node_name: String,
    pub metadata: Option<serde_json::Value>,
}

/// One k-NN result. `similarity` is derived from L2 distance over normalized
/// vectors (`1 - d²/2`), so 1.0 is identical and 0.0 orthogonal.
#[derive(Debug, Clone, Serialize)]
pub struct VectorHit {
    pub id: String,
    pub distance: f64,
    pub similarity: f64,
    pub text: String,
    pub tenant: String,
    pub timestamp: i64,
    pub node_name: String,
    pub metadata: Option<serde_json::Value>,
}

/// Shared handle to the vector database.
#[derive(Clone)]
pub struct VectorStore {
    conn: Arc<Mutex<Connection>>,
    dimensions: usize,
}

/// k-NN over-fetch factor: candidates are pulled before the tenant
/// post-filter runs, so fetch generously.
const KNN_OVERFETCH: usize = 8;
const KNN_CANDIDATE_CAP: usize = 256;

impl VectorStore {
    /// Open (or create) the vector database under `dir`, with a vec0 table of
    /// the given dimension.
    pub fn open(dir: impl AsRef<Path>, dimensions: usize) -> Result<Self, MemoryError> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| MemoryError::ExternalService {
            service: "vector_store",
            operation: "open",
            message: format!("failed to create {}: {e}", dir.display()),
        })?;

        load_sqlite_vec();
        let conn = Connection::open(dir.join("vectors.db")).map_err(|e| {
            MemoryError::ExternalService {
                service: "vector_store",
                operation: "open",
                message: e.to_string(),
            }
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Self::err("open", e))?;

        Self::init(conn, dimensions)
    }

    /// In-memory variant for tests.
    pub fn open_in_memory(dimensions: usize) -> Result<Self, MemoryError> {
        load_sqlite_vec();
        let conn = Connection::open_in_memory().map_err(|e| Self::err("open", e))?;
        Self::init(conn, dimensions)
    }

    fn init(conn: Connection, dimensions: usize) -> Result<Self, MemoryError> {
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vectors USING vec0( \
                 id TEXT PRIMARY KEY, \
                 embedding FLOAT[{dimensions}] \
             ); \
             CREATE TABLE IF NOT EXISTS vector_meta ( \
                 id TEXT PRIMARY KEY, \
                 text TEXT NOT NULL, \
                 tenant TEXT NOT NULL, \
                 timestamp INTEGER NOT NULL, \
                 node_name TEXT NOT NULL, \
                 metadata TEXT \
             ); \
             CREATE INDEX IF NOT EXISTS idx_vector_meta_tenant ON vector_meta(tenant);"
        ))
        .map_err(|e| Self::err("init", e))?;

        tracing::debug!(dimensions, "vector store ready");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn err(operation: &'static str, e: rusqlite::Error) -> MemoryError {
        MemoryError::ExternalService {
            service: "vector_store",
            operation,
            message: e.to_string(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, MemoryError> {
        self.conn.lock().map_err(|e| MemoryError::ExternalService {
            service: "vector_store",
            operation: "lock",
            message: format!("vector connection lock poisoned: {e}"),
        })
    }

    /// Insert or replace a record. vec0 has no native upsert, so the id is
    /// deleted first; both statements run inside one transaction on this
    /// connection (the graph store never participates in it).
    pub fn upsert(&self, record: &VectorRecord) -> Result<(), MemoryError> {
        if record.vector.len() != self.dimensions {
            return Err(MemoryError::ExternalService {
                service: "vector_store",
                operation: "upsert",
                message: format!(
                    "dimension mismatch: got {}, table is {}",
                    record.vector.len(),
                    self.dimensions
                ),
            });
        }

        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(|e| Self::err("upsert", e))?;

        tx.execute("DELETE FROM vectors WHERE id = ?1", params![record.id])
            .map_err(|e| Self::err("upsert", e))?;
        tx.execute("DELETE FROM vector_meta WHERE id = ?1", params![record.id])
            .map_err(|e| Self::err("upsert", e))?;

        tx.execute(
            "INSERT INTO vectors (id, embedding) VALUES (?1, ?2)",
            params![record.id, vector_to_bytes(&record.vector)],
        )
        .map_err(|e| Self::err("upsert", e))?;
        tx.execute(
            "INSERT INTO vector_meta (id, text, tenant, timestamp, node_name, metadata) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.id,
                record.text,
                record.tenant,
                record.timestamp,
                record.node_name,
                record.metadata.as_ref().map(|m| m.to_string()),
            ],
        )
        .map_err(|e| Self::err("upsert", e))?;

        tx.commit().map_err(|e| Self::err("upsert", e))
    }

    /// k-NN search with a tenant post-filter and optional timestamp range.
    /// Distance metric is the store's default (L2; cosine-compatible since
    /// all stored vectors are normalized).
    pub fn search(
        &self,
        vector: &[f32],
        tenant: &str,
        k: usize,
        time_range: Option<(i64, i64)>,
    ) -> Result<Vec<VectorHit>, MemoryError> {
        let candidates = (k * KNN_OVERFETCH).clamp(k, KNN_CANDIDATE_CAP);
        let (since, until) = time_range.unwrap_or((0, i64::MAX));

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT c.id, c.distance, m.text, m.tenant, m.timestamp, m.node_name, m.metadata \
                 FROM (SELECT id, distance FROM vectors \
                       WHERE embedding MATCH ?1 ORDER BY distance LIMIT ?2) c \
                 JOIN vector_meta m ON m.id = c.id \
                 WHERE m.tenant = ?3 AND m.timestamp BETWEEN ?4 AND ?5 \
                 ORDER BY c.distance LIMIT ?6",
            )
            .map_err(|e| Self::err("search", e))?;

        let hits = stmt
            .query_map(
                params![
                    vector_to_bytes(vector),
                    candidates as i64,
                    tenant,
                    since,
                    until,
                    k as i64
                ],
                |row| {
                    let distance: f64 = row.get(1)?;
                    let metadata_str: Option<String> = row.get(6)?;
                    Ok(VectorHit {
                        id: row.get(0)?,
                        distance,
                        similarity: l2_to_similarity(distance),
                        text: row.get(2)?,
                        tenant: row.get(3)?,
                        timestamp: row.get(4)?,
                        node_name: row.get(5)?,
                        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
                    })
                },
            )
            .map_err(|e| Self::err("search", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| Self::err("search", e))?;
        Ok(hits)
    }

    /// Fetch a single record by id.
    pub fn get(&self, id: &str) -> Result<Option<VectorRecord>, MemoryError> {
        let conn = self.lock()?;
        let meta = conn
            .query_row(
                "SELECT text, tenant, timestamp, node_name, metadata \
                 FROM vector_meta WHERE id = ?1",
                params![id],
                |row| {
                    let metadata_str: Option<String> = row.get(4)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                        metadata_str,
                    ))
                },
            )
            .optional()
            .map_err(|e| Self::err("get", e))?;

        let Some((text, tenant, timestamp, node_name, metadata_str)) = meta else {
            return Ok(None);
        };

        let bytes: Vec<u8> = conn
            .query_row(
                "SELECT embedding FROM vectors WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .map_err(|e| Self::err("get", e))?;

        Ok(Some(VectorRecord {
            id: id.to_string(),
            vector: bytes_to_vector(&bytes),
            text,
            tenant,
            timestamp,
            node_name,
            metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        }))
    }

    /// Delete a set of records by id. Returns how many existed.
    pub fn delete_ids(&self, ids: &[String]) -> Result<usize, MemoryError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(|e| Self::err("delete_ids", e))?;
        let mut removed = 0;
        for id in ids {
            removed += tx
                .execute("DELETE FROM vector_meta WHERE id = ?1", params![id])
                .map_err(|e| Self::err("delete_ids", e))?;
            tx.execute("DELETE FROM vectors WHERE id = ?1", params![id])
                .map_err(|e| Self::err("delete_ids", e))?;
        }
        tx.commit().map_err(|e| Self::err("delete_ids", e))?;
        Ok(removed)
    }

    /// Collect every record in a tenant (used by the purge saga so a failed
    /// graph-side delete can restore them).
    pub fn collect_tenant(&self, tenant: &str) -> Result<Vec<VectorRecord>, MemoryError> {
        let ids: Vec<String> = {
            let conn = self.lock()?;
            let mut stmt = conn
                .prepare("SELECT id FROM vector_meta WHERE tenant = ?1")
                .map_err(|e| Self::err("collect_tenant", e))?;
            let rows = stmt
                .query_map(params![tenant], |row| row.get(0))
                .map_err(|e| Self::err("collect_tenant", e))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| Self::err("collect_tenant", e))?;
            rows
        };

        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.get(&id)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Number of records in a tenant.
    pub fn count_tenant(&self, tenant: &str) -> Result<i64, MemoryError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT COUNT(*) FROM vector_meta WHERE tenant = ?1",
            params![tenant],
            |row| row.get(0),
        )
        .map_err(|e| Self::err("count_tenant", e))
    }
}

/// Convert an f32 embedding slice to raw bytes for sqlite-vec.
pub fn vector_to_bytes(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`vector_to_bytes`].
pub fn bytes_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// For L2-normalized vectors: `L2² = 2·(1 − cos)`, so `cos = 1 − d²/2`.
fn l2_to_similarity(distance: f64) -> f64 {
    (1.0 - (distance * distance) / 2.0).clamp(-1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIM: usize = 8;

    fn unit(axis: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DIM];
        v[axis] = 1.0;
        v
    }

    fn record(id: &str, tenant: &str, axis: usize) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            vector: unit(axis),
            text: format!("text for {id}"),
            tenant: tenant.into(),
            timestamp: 1_700_000_000,
            node_name: format!("mem-{id}"),
            metadata: None,
        }
    }

    #[test]
    fn upsert_and_get_round_trip() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.upsert(&record("v1", "u1", 0)).unwrap();

        let got = store.get("v1").unwrap().unwrap();
        assert_eq!(got.vector, unit(0));
        assert_eq!(got.tenant, "u1");
        assert_eq!(got.node_name, "mem-v1");

        // Upsert replaces
        let mut updated = record("v1", "u1", 1);
        updated.text = "replaced".into();
        store.upsert(&updated).unwrap();
        let got = store.get("v1").unwrap().unwrap();
        assert_eq!(got.vector, unit(1));
        assert_eq!(got.text, "replaced");
    }

    #[test]
    fn search_filters_by_tenant() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.upsert(&record("v1", "u1", 0)).unwrap();
        store.upsert(&record("v2", "u2", 0)).unwrap();

        let hits = store.search(&unit(0), "u1", 5, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "v1");
        assert!(hits[0].similarity > 0.999);

        let hits = store.search(&unit(0), "u3", 5, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn search_orders_by_distance() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.upsert(&record("near", "u1", 0)).unwrap();
        store.upsert(&record("far", "u1", 4)).unwrap();

        let mut query = unit(0);
        query[1] = 0.1;
        let norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        query.iter_mut().for_each(|x| *x /= norm);

        let hits = store.search(&query, "u1", 5, None).unwrap();
        assert_eq!(hits[0].id, "near");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn search_respects_time_range() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        let mut old = record("old", "u1", 0);
        old.timestamp = 100;
        store.upsert(&old).unwrap();
        store.upsert(&record("new", "u1", 1)).unwrap();

        let hits = store.search(&unit(0), "u1", 5, Some((0, 200))).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "old");
    }

    #[test]
    fn delete_ids_removes_both_tables() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.upsert(&record("v1", "u1", 0)).unwrap();
        store.upsert(&record("v2", "u1", 1)).unwrap();

        let removed = store.delete_ids(&["v1".into(), "missing".into()]).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("v1").unwrap().is_none());
        assert!(store.get("v2").unwrap().is_some());
        assert_eq!(store.count_tenant("u1").unwrap(), 1);
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        let mut bad = record("v1", "u1", 0);
        bad.vector = vec![1.0; DIM + 1];
        let err = store.upsert(&bad).unwrap_err();
        assert_eq!(err.code(), "EXTERNAL_SERVICE_ERROR");
    }

    #[test]
    fn collect_tenant_returns_full_records() {
        let store = VectorStore::open_in_memory(DIM).unwrap();
        store.upsert(&record("v1", "u1", 0)).unwrap();
        store.upsert(&record("v2", "u1", 1)).unwrap();
        store.upsert(&record("v3", "u2", 2)).unwrap();

        let records = store.collect_tenant("u1").unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.tenant == "u1"));
    }

    #[test]
    fn bytes_round_trip() {
        let v = vec![0.25f32, -1.5, 3.75];
        assert_eq!(bytes_to_vector(&vector_to_bytes(&v)), v);
    }
}
