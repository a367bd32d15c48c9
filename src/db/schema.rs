//! SQL DDL for the graph store.
//!
//! Defines the `nodes`, `edges`, `memory_events`, and `schema_meta` tables.
//! All DDL uses `IF NOT EXISTS` for idempotent initialization. The vector
//! store lives in its own database file (see [`crate::vector`]).

use rusqlite::Connection;

/// All schema DDL statements for the graph store.
const SCHEMA_SQL: &str = r#"
-- Knowledge graph vertices: memory anchors, entities, and concepts
CREATE TABLE IF NOT EXISTS nodes (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'concept',
    content TEXT,
    tenant TEXT NOT NULL,
    embedding_id TEXT,
    metadata TEXT,
    status TEXT NOT NULL DEFAULT 'PENDING' CHECK(status IN ('PENDING','READY','FAILED')),
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(name, tenant)
);

CREATE INDEX IF NOT EXISTS idx_nodes_tenant ON nodes(tenant);
CREATE INDEX IF NOT EXISTS idx_nodes_status ON nodes(status, updated_at);
CREATE INDEX IF NOT EXISTS idx_nodes_embedding ON nodes(embedding_id);

-- Directed relationships; endpoints always share the edge's tenant
CREATE TABLE IF NOT EXISTS edges (
    id INTEGER PRIMARY KEY,
    source_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    target_id INTEGER NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type TEXT NOT NULL DEFAULT 'related_to',
    weight REAL NOT NULL DEFAULT 1.0,
    tenant TEXT NOT NULL,
    metadata TEXT,
    created_at INTEGER NOT NULL,
    CHECK(source_id <> target_id)
);

CREATE INDEX IF NOT EXISTS idx_edges_source ON edges(source_id);
CREATE INDEX IF NOT EXISTS idx_edges_target ON edges(target_id);
CREATE INDEX IF NOT EXISTS idx_edges_tenant ON edges(tenant);

-- Append-only audit trail
CREATE TABLE IF NOT EXISTS memory_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    type TEXT NOT NULL,
    description TEXT NOT NULL,
    metadata TEXT,
    tenant TEXT NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_tenant ON memory_events(tenant);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
