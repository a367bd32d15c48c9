//! Recovery worker — periodic sweep transitioning abandoned `PENDING` nodes
//! to `FAILED`.
//!
//! The background ingest pipeline is fire-and-forget: a crash between the
//! fast path and promotion would leave an anchor pending forever. The sweep
//! marks such rows for manual replay without re-running AI work. One sweep
//! runs at a time (`is_running` guard); the first tick fires immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rusqlite::{params, Connection};

use crate::error::MemoryError;
use crate::graph::store::now_epoch;
use crate::graph::GraphStore;

pub struct RecoveryWorker {
    graph: GraphStore,
    interval: Duration,
    stale_after: Duration,
    is_running: Arc<AtomicBool>,
}

impl RecoveryWorker {
    pub fn new(graph: GraphStore, interval: Duration, stale_after: Duration) -> Self {
        Self {
            graph,
            interval,
            stale_after,
            is_running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the periodic sweep loop. The handle can be aborted on shutdown;
    /// a sweep missed that way is picked up by the next process start.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                ticker.tick().await;

                if self.is_running.swap(true, Ordering::SeqCst) {
                    tracing::debug!("recovery sweep already running, skipping tick");
                    continue;
                }

                let graph = self.graph.clone();
                let stale_secs = self.stale_after.as_secs() as i64;
                let result = tokio::task::spawn_blocking(move || {
                    graph.with_conn(|conn| sweep(conn, stale_secs, now_epoch()))
                })
                .await;

                match result {
                    Ok(Ok(0)) => {}
                    Ok(Ok(recovered)) => {
                        tracing::info!(recovered, "recovery sweep marked stale memories FAILED");
                    }
                    Ok(Err(err)) => {
                        tracing::error!(error = %err, "recovery sweep failed");
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "recovery sweep task panicked");
                    }
                }

                self.is_running.store(false, Ordering::SeqCst);
            }
        })
    }
}

/// One sweep: every `PENDING` node with `updated_at < now - stale_after`
/// moves to `FAILED`, gets `updated_at` touched, and a `recovery_note` in its
/// metadata. Returns how many rows were transitioned.
pub fn sweep(conn: &Connection, stale_after_secs: i64, now: i64) -> Result<usize, MemoryError> {
    let cutoff = now - stale_after_secs;

    let stale: Vec<(i64, String, Option<String>)> = {
        let mut stmt = conn
            .prepare(
                "SELECT id, tenant, metadata FROM nodes \
                 WHERE status = 'PENDING' AND updated_at < ?1",
            )
            .map_err(|e| MemoryError::db("recovery_sweep", e))?;
        let rows = stmt
            .query_map(params![cutoff], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })
            .map_err(|e| MemoryError::db("recovery_sweep", e))?
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| MemoryError::db("recovery_sweep", e))?;
        rows
    };

    for (id, tenant, metadata_str) in &stale {
        let mut metadata: serde_json::Value = metadata_str
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_else(|| serde_json::json!({}));
        if let Some(object) = metadata.as_object_mut() {
            object.insert(
                "recovery_note".into(),
                serde_json::Value::String(format!(
                    "stuck in PENDING, marked FAILED by recovery sweep at {now}"
                )),
            );
        }

        conn.execute(
            "UPDATE nodes SET status = 'FAILED', metadata = ?1, updated_at = ?2 WHERE id = ?3",
            params![metadata.to_string(), now, id],
        )
        .map_err(|e| MemoryError::db("recovery_sweep", e))?;

        tracing::warn!(node_id = id, tenant = %tenant, "stale PENDING node marked FAILED");
    }

    Ok(stale.len())
}
