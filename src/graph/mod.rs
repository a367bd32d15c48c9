//! Relational persistence of the knowledge graph — nodes, edges, and the
//! append-only audit trail, plus the traversal engine.
//!
//! Write operations live in [`store`], traversal in [`query`], row types in
//! [`types`]. All of them take a plain connection so they compose with the
//! transaction manager's savepoints. [`GraphStore`] is the shared handle the
//! orchestrator threads through async code.

pub mod query;
pub mod store;
pub mod types;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::error::MemoryError;

/// Shared, internally synchronized handle to the graph database.
///
/// SQL work is synchronous; async callers run closures through
/// [`GraphStore::with_conn`] inside `tokio::task::spawn_blocking`.
#[derive(Clone)]
pub struct GraphStore {
    conn: Arc<Mutex<Connection>>,
}

impl GraphStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// The underlying connection handle, for wiring the transaction manager
    /// onto the same database.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run a closure against the locked connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, MemoryError>,
    ) -> Result<T, MemoryError> {
        let conn = self.conn.lock().map_err(|e| MemoryError::Database {
            operation: "lock",
            message: format!("graph connection lock poisoned: {e}"),
            transient: false,
        })?;
        f(&conn)
    }
}
