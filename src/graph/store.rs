//! Write path for the graph store — node and edge persistence, audit events,
//! and tenant purge.
//!
//! All functions take a plain [`Connection`] so they compose with the
//! transaction manager: the same call works standalone (autocommit) or inside
//! an outer transaction / savepoint.

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::MemoryError;
use crate::graph::types::{Node, NodeStatus};

/// Current time as epoch seconds.
pub fn now_epoch() -> i64 {
    chrono::Utc::now().timestamp()
}

fn metadata_to_sql(metadata: Option<&serde_json::Value>) -> Option<String> {
    metadata.map(|m| m.to_string())
}

pub(crate) fn node_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Node> {
    let metadata_str: Option<String> = row.get(6)?;
    let status_str: String = row.get(7)?;
    Ok(Node {
        id: row.get(0)?,
        name: row.get(1)?,
        node_type: row.get(2)?,
        content: row.get(3)?,
        tenant: row.get(4)?,
        embedding_id: row.get(5)?,
        metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
        status: status_str.parse().unwrap_or(NodeStatus::Failed),
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub(crate) const NODE_COLUMNS: &str =
    "id, name, type, content, tenant, embedding_id, metadata, status, created_at, updated_at";

/// Insert a memory-anchor node in `PENDING` state, with `embedding_id` set as
/// a forward reference to a vector that does not exist yet.
/// Returns the new node id.
pub fn insert_pending_node(
    conn: &Connection,
    name: &str,
    content: &str,
    tenant: &str,
    embedding_id: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<i64, MemoryError> {
    let now = now_epoch();
    conn.execute(
        "INSERT INTO nodes (name, type, content, tenant, embedding_id, metadata, status, created_at, updated_at) \
         VALUES (?1, 'memory', ?2, ?3, ?4, ?5, 'PENDING', ?6, ?6)",
        params![name, content, tenant, embedding_id, metadata_to_sql(metadata), now],
    )
    .map_err(|e| MemoryError::db("insert_pending_node", e))?;
    Ok(conn.last_insert_rowid())
}

/// Look up a node by `(name, tenant)`.
pub fn get_node_by_name(
    conn: &Connection,
    name: &str,
    tenant: &str,
) -> Result<Option<Node>, MemoryError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE name = ?1 AND tenant = ?2"),
        params![name, tenant],
        node_from_row,
    )
    .optional()
    .map_err(|e| MemoryError::db("get_node_by_name", e))
}

/// Look up a node by the vector-store handle it points at.
pub fn get_node_by_embedding(
    conn: &Connection,
    embedding_id: &str,
    tenant: &str,
) -> Result<Option<Node>, MemoryError> {
    conn.query_row(
        &format!("SELECT {NODE_COLUMNS} FROM nodes WHERE embedding_id = ?1 AND tenant = ?2"),
        params![embedding_id, tenant],
        node_from_row,
    )
    .optional()
    .map_err(|e| MemoryError::db("get_node_by_embedding", e))
}

/// Get the id of an existing node, or create a `READY` node with the given
/// type. Concurrent creators of the same `(name, tenant)` race on the unique
/// index; the loser retries once with a read.
pub fn get_or_create_node(
    conn: &Connection,
    name: &str,
    node_type: &str,
    tenant: &str,
) -> Result<i64, MemoryError> {
    if let Some(node) = get_node_by_name(conn, name, tenant)? {
        return Ok(node.id);
    }

    let now = now_epoch();
    let inserted = conn.execute(
        "INSERT INTO nodes (name, type, tenant, status, created_at, updated_at) \
         VALUES (?1, ?2, ?3, 'READY', ?4, ?4)",
        params![name, node_type, tenant, now],
    );

    match inserted {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(e) if MemoryError::is_unique_violation(&e) => {
            // Another task won the race; the row must exist now.
            get_node_by_name(conn, name, tenant)?.map(|n| n.id).ok_or_else(|| {
                MemoryError::Database {
                    operation: "get_or_create_node",
                    message: format!("unique race on '{name}' but row absent on re-read"),
                    transient: true,
                }
            })
        }
        Err(e) => Err(MemoryError::db("get_or_create_node", e)),
    }
}

/// Insert a directed edge. Both endpoints must exist and belong to `tenant`;
/// self-loops are rejected.
pub fn insert_edge(
    conn: &Connection,
    source_id: i64,
    target_id: i64,
    edge_type: &str,
    weight: f64,
    tenant: &str,
    metadata: Option<&serde_json::Value>,
) -> Result<i64, MemoryError> {
    if source_id == target_id {
        return Err(MemoryError::Validation {
            field: "edge",
            message: format!("self-loop rejected for node {source_id}"),
        });
    }

    let endpoints: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM nodes WHERE id IN (?1, ?2) AND tenant = ?3",
            params![source_id, target_id, tenant],
            |row| row.get(0),
        )
        .map_err(|e| MemoryError::db("insert_edge", e))?;
    if endpoints != 2 {
        return Err(MemoryError::Validation {
            field: "edge",
            message: format!(
                "edge {source_id}->{target_id} endpoints must both exist in tenant '{tenant}'"
            ),
        });
    }

    conn.execute(
        "INSERT INTO edges (source_id, target_id, type, weight, tenant, metadata, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            source_id,
            target_id,
            edge_type.to_lowercase(),
            weight,
            tenant,
            metadata_to_sql(metadata),
            now_epoch()
        ],
    )
    .map_err(|e| MemoryError::db("insert_edge", e))?;
    Ok(conn.last_insert_rowid())
}

/// Promote or demote a node's lifecycle status, touching `updated_at`.
pub fn set_node_status(
    conn: &Connection,
    node_id: i64,
    status: NodeStatus,
) -> Result<(), MemoryError> {
    let rows = conn
        .execute(
            "UPDATE nodes SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![status.as_str(), now_epoch(), node_id],
        )
        .map_err(|e| MemoryError::db("set_node_status", e))?;
    if rows == 0 {
        return Err(MemoryError::NotFound {
            kind: "node",
            name: node_id.to_string(),
        });
    }
    Ok(())
}

/// Append an audit entry. Events are never updated or deleted.
pub fn record_event(
    conn: &Connection,
    event_type: &str,
    description: &str,
    metadata: Option<&serde_json::Value>,
    tenant: &str,
) -> Result<(), MemoryError> {
    conn.execute(
        "INSERT INTO memory_events (type, description, metadata, tenant, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event_type,
            description,
            metadata_to_sql(metadata),
            tenant,
            now_epoch()
        ],
    )
    .map_err(|e| MemoryError::db("record_event", e))?;
    Ok(())
}

/// Delete every node in a tenant. Edges go by cascade. Returns the number of
/// nodes removed.
pub fn purge_tenant_nodes(conn: &Connection, tenant: &str) -> Result<usize, MemoryError> {
    conn.execute("DELETE FROM nodes WHERE tenant = ?1", params![tenant])
        .map_err(|e| MemoryError::db("purge_tenant_nodes", e))
}

/// Collect the vector-store handles referenced by a tenant's nodes.
pub fn tenant_embedding_ids(conn: &Connection, tenant: &str) -> Result<Vec<String>, MemoryError> {
    let mut stmt = conn
        .prepare("SELECT embedding_id FROM nodes WHERE tenant = ?1 AND embedding_id IS NOT NULL")
        .map_err(|e| MemoryError::db("tenant_embedding_ids", e))?;
    let ids = stmt
        .query_map(params![tenant], |row| row.get::<_, String>(0))
        .map_err(|e| MemoryError::db("tenant_embedding_ids", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MemoryError::db("tenant_embedding_ids", e))?;
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_conn() -> Connection {
        db::open_in_memory().unwrap()
    }

    #[test]
    fn pending_node_carries_forward_reference() {
        let conn = test_conn();
        let id = insert_pending_node(&conn, "mem-0a1b2c3d", "hello", "u1", "vec-123", None)
            .unwrap();

        let node = get_node_by_name(&conn, "mem-0a1b2c3d", "u1").unwrap().unwrap();
        assert_eq!(node.id, id);
        assert_eq!(node.status, NodeStatus::Pending);
        assert_eq!(node.embedding_id.as_deref(), Some("vec-123"));
        assert_eq!(node.node_type, "memory");
        assert_eq!(node.content.as_deref(), Some("hello"));
    }

    #[test]
    fn node_lookup_is_tenant_scoped() {
        let conn = test_conn();
        insert_pending_node(&conn, "mem-0a1b2c3d", "hello", "u1", "vec-123", None).unwrap();

        assert!(get_node_by_name(&conn, "mem-0a1b2c3d", "u2").unwrap().is_none());
        assert!(get_node_by_embedding(&conn, "vec-123", "u2").unwrap().is_none());
        assert!(get_node_by_embedding(&conn, "vec-123", "u1").unwrap().is_some());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let conn = test_conn();
        let first = get_or_create_node(&conn, "Alice", "person", "u1").unwrap();
        let second = get_or_create_node(&conn, "Alice", "person", "u1").unwrap();
        assert_eq!(first, second);

        // Same name in another tenant creates a distinct node
        let other = get_or_create_node(&conn, "Alice", "person", "u2").unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn edges_reject_self_loops_and_cross_tenant_endpoints() {
        let conn = test_conn();
        let a = get_or_create_node(&conn, "a", "concept", "u1").unwrap();
        let b = get_or_create_node(&conn, "b", "concept", "u1").unwrap();
        let foreign = get_or_create_node(&conn, "c", "concept", "u2").unwrap();

        assert!(insert_edge(&conn, a, a, "related_to", 1.0, "u1", None).is_err());
        assert!(insert_edge(&conn, a, foreign, "related_to", 1.0, "u1", None).is_err());

        let edge_id = insert_edge(&conn, a, b, "MENTIONS", 1.0, "u1", None).unwrap();
        let edge_type: String = conn
            .query_row(
                "SELECT type FROM edges WHERE id = ?1",
                params![edge_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(edge_type, "mentions"); // lowercased on insert
    }

    #[test]
    fn status_promotion_touches_updated_at() {
        let conn = test_conn();
        let id = insert_pending_node(&conn, "mem-aaaa0000", "x", "u1", "v1", None).unwrap();
        conn.execute("UPDATE nodes SET updated_at = 0 WHERE id = ?1", params![id])
            .unwrap();

        set_node_status(&conn, id, NodeStatus::Ready).unwrap();

        let node = get_node_by_name(&conn, "mem-aaaa0000", "u1").unwrap().unwrap();
        assert_eq!(node.status, NodeStatus::Ready);
        assert!(node.updated_at > 0);
    }

    #[test]
    fn set_status_on_missing_node_is_not_found() {
        let conn = test_conn();
        let err = set_node_status(&conn, 9999, NodeStatus::Failed).unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[test]
    fn purge_cascades_edges_and_spares_other_tenants() {
        let conn = test_conn();
        let a = get_or_create_node(&conn, "a", "concept", "u1").unwrap();
        let b = get_or_create_node(&conn, "b", "concept", "u1").unwrap();
        insert_edge(&conn, a, b, "related_to", 1.0, "u1", None).unwrap();
        get_or_create_node(&conn, "other", "concept", "u2").unwrap();

        let removed = purge_tenant_nodes(&conn, "u1").unwrap();
        assert_eq!(removed, 2);

        let edges: i64 = conn
            .query_row("SELECT COUNT(*) FROM edges", [], |row| row.get(0))
            .unwrap();
        assert_eq!(edges, 0);

        assert!(get_node_by_name(&conn, "other", "u2").unwrap().is_some());
    }

    #[test]
    fn events_are_append_only_rows() {
        let conn = test_conn();
        record_event(&conn, "MEMORY_ADDED_FAST", "added mem-1", None, "u1").unwrap();
        record_event(
            &conn,
            "MEMORY_READY",
            "promoted mem-1",
            Some(&serde_json::json!({"entities": 2})),
            "u1",
        )
        .unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM memory_events WHERE tenant = 'u1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
