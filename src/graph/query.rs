//! Read path for the graph store — bounded recursive traversal, shortest
//! path, bidirectional deep context, keyword scan, and paged reads.
//!
//! Every operation requires a tenant and scopes all reads to it. The
//! recursive CTEs track visited ids as a comma-framed string (`,id,`): a
//! candidate is admitted only when its framed id is absent from the path.
//! The framing matters — raw concatenation would falsely reject id `11`
//! after visiting id `1`.

use std::collections::HashSet;

use rusqlite::{params, Connection};

use crate::error::MemoryError;
use crate::graph::store::{node_from_row, NODE_COLUMNS};
use crate::graph::types::{Edge, Node, PathResult, Subgraph};
use crate::validate::validate_name;

/// Keyword scans return at most this many nodes.
pub const SEARCH_NODES_CAP: usize = 50;

/// Bounded breadth-first expansion over outgoing edges rooted at
/// `start_name`. Depth 0 is the anchor. Returns the deduplicated node set
/// plus all edges whose endpoints are both in the set.
pub fn subgraph(
    conn: &Connection,
    start_name: &str,
    tenant: &str,
    max_depth: u32,
) -> Result<Subgraph, MemoryError> {
    validate_name(start_name)?;

    let mut stmt = conn
        .prepare(
            "WITH RECURSIVE walk(id, depth, path) AS ( \
                 SELECT id, 0, ',' || id || ',' \
                 FROM nodes WHERE name = ?1 AND tenant = ?2 \
                 UNION ALL \
                 SELECT e.target_id, w.depth + 1, w.path || e.target_id || ',' \
                 FROM walk w \
                 JOIN edges e ON e.source_id = w.id \
                 WHERE e.tenant = ?2 \
                   AND w.depth < ?3 \
                   AND instr(w.path, ',' || e.target_id || ',') = 0 \
             ) \
             SELECT DISTINCT id FROM walk",
        )
        .map_err(|e| MemoryError::db("subgraph", e))?;

    let ids = collect_ids(&mut stmt, params![start_name, tenant, max_depth as i64])?;
    hydrate(conn, tenant, &ids, "subgraph")
}

/// Bidirectional variant of [`subgraph`]: edges are followed regardless of
/// direction, for when both inbound and outbound context matters.
pub fn deep_context(
    conn: &Connection,
    start_name: &str,
    tenant: &str,
    max_depth: u32,
) -> Result<Subgraph, MemoryError> {
    validate_name(start_name)?;

    let mut stmt = conn
        .prepare(
            "WITH RECURSIVE walk(id, depth, path) AS ( \
                 SELECT id, 0, ',' || id || ',' \
                 FROM nodes WHERE name = ?1 AND tenant = ?2 \
                 UNION ALL \
                 SELECT CASE WHEN e.source_id = w.id THEN e.target_id ELSE e.source_id END, \
                        w.depth + 1, \
                        w.path || CASE WHEN e.source_id = w.id THEN e.target_id ELSE e.source_id END || ',' \
                 FROM walk w \
                 JOIN edges e ON e.source_id = w.id OR e.target_id = w.id \
                 WHERE e.tenant = ?2 \
                   AND w.depth < ?3 \
                   AND instr(w.path, ',' || CASE WHEN e.source_id = w.id THEN e.target_id ELSE e.source_id END || ',') = 0 \
             ) \
             SELECT DISTINCT id FROM walk",
        )
        .map_err(|e| MemoryError::db("deep_context", e))?;

    let ids = collect_ids(&mut stmt, params![start_name, tenant, max_depth as i64])?;
    hydrate(conn, tenant, &ids, "deep_context")
}

/// Breadth-first shortest path over outgoing edges, by node name.
///
/// Returns the first (shallowest) ` -> `-joined path reaching `end`, or
/// `None`. Same-name start/end returns a depth-0 path.
///
/// Known limitation: cycle avoidance checks whether a candidate's *name* is a
/// substring of the current path, so a node whose name is contained in an
/// already-visited name is skipped too. Acceptable for the short paths this
/// runs on.
pub fn find_path(
    conn: &Connection,
    start_name: &str,
    end_name: &str,
    tenant: &str,
    max_depth: u32,
) -> Result<Option<PathResult>, MemoryError> {
    validate_name(start_name)?;
    validate_name(end_name)?;

    use rusqlite::OptionalExtension;
    conn.query_row(
        "WITH RECURSIVE walk(id, name, depth, path) AS ( \
             SELECT id, name, 0, name \
             FROM nodes WHERE name = ?1 AND tenant = ?2 \
             UNION ALL \
             SELECT n.id, n.name, w.depth + 1, w.path || ' -> ' || n.name \
             FROM walk w \
             JOIN edges e ON e.source_id = w.id \
             JOIN nodes n ON n.id = e.target_id \
             WHERE e.tenant = ?2 \
               AND w.depth < ?4 \
               AND instr(w.path, n.name) = 0 \
         ) \
         SELECT path, depth FROM walk WHERE name = ?3 ORDER BY depth LIMIT 1",
        params![start_name, tenant, end_name, max_depth as i64],
        |row| {
            Ok(PathResult {
                path: row.get(0)?,
                depth: row.get::<_, i64>(1)? as u32,
            })
        },
    )
    .optional()
    .map_err(|e| MemoryError::db("find_path", e))
}

/// Substring scan over `name`, `content`, and `type`, capped at
/// [`SEARCH_NODES_CAP`] hits, returned with connecting edges.
pub fn search_nodes(
    conn: &Connection,
    query: &str,
    tenant: &str,
) -> Result<Subgraph, MemoryError> {
    let pattern = format!("%{}%", escape_like(query));

    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes \
             WHERE tenant = ?1 \
               AND (name LIKE ?2 ESCAPE '\\' \
                    OR content LIKE ?2 ESCAPE '\\' \
                    OR type LIKE ?2 ESCAPE '\\') \
             ORDER BY id LIMIT ?3"
        ))
        .map_err(|e| MemoryError::db("search_nodes", e))?;

    let nodes = stmt
        .query_map(params![tenant, pattern, SEARCH_NODES_CAP as i64], node_from_row)
        .map_err(|e| MemoryError::db("search_nodes", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MemoryError::db("search_nodes", e))?;

    let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
    let edges = edges_within(conn, tenant, &ids, "search_nodes")?;
    Ok(Subgraph { nodes, edges })
}

/// Paged read of a tenant's nodes, with edges restricted to the page.
pub fn read_graph(
    conn: &Connection,
    tenant: &str,
    limit: usize,
    offset: usize,
) -> Result<Subgraph, MemoryError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE tenant = ?1 \
             ORDER BY id LIMIT ?2 OFFSET ?3"
        ))
        .map_err(|e| MemoryError::db("read_graph", e))?;

    let nodes = stmt
        .query_map(params![tenant, limit as i64, offset as i64], node_from_row)
        .map_err(|e| MemoryError::db("read_graph", e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MemoryError::db("read_graph", e))?;

    let ids: Vec<i64> = nodes.iter().map(|n| n.id).collect();
    let edges = edges_within(conn, tenant, &ids, "read_graph")?;
    Ok(Subgraph { nodes, edges })
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn collect_ids(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<i64>, MemoryError> {
    let ids = stmt
        .query_map(params, |row| row.get::<_, i64>(0))
        .map_err(|e| MemoryError::db("traverse", e))?
        .collect::<Result<HashSet<_>, _>>()
        .map_err(|e| MemoryError::db("traverse", e))?;
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    Ok(ids)
}

/// Fetch full node rows plus connecting edges for a traversal result. The id
/// list comes from our own queries, so interpolating it is interpolating
/// integers only.
fn hydrate(
    conn: &Connection,
    tenant: &str,
    ids: &[i64],
    operation: &'static str,
) -> Result<Subgraph, MemoryError> {
    if ids.is_empty() {
        return Ok(Subgraph::default());
    }

    let id_list = join_ids(ids);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {NODE_COLUMNS} FROM nodes WHERE id IN ({id_list}) ORDER BY id"
        ))
        .map_err(|e| MemoryError::db(operation, e))?;
    let nodes: Vec<Node> = stmt
        .query_map([], node_from_row)
        .map_err(|e| MemoryError::db(operation, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MemoryError::db(operation, e))?;

    let edges = edges_within(conn, tenant, ids, operation)?;
    Ok(Subgraph { nodes, edges })
}

/// All edges of a tenant whose endpoints both lie in `ids`.
fn edges_within(
    conn: &Connection,
    tenant: &str,
    ids: &[i64],
    operation: &'static str,
) -> Result<Vec<Edge>, MemoryError> {
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let id_list = join_ids(ids);
    let mut stmt = conn
        .prepare(&format!(
            "SELECT id, source_id, target_id, type, weight, tenant, metadata, created_at \
             FROM edges WHERE tenant = ?1 \
               AND source_id IN ({id_list}) AND target_id IN ({id_list}) \
             ORDER BY id"
        ))
        .map_err(|e| MemoryError::db(operation, e))?;

    let edges = stmt
        .query_map(params![tenant], |row| {
            let metadata_str: Option<String> = row.get(6)?;
            Ok(Edge {
                id: row.get(0)?,
                source_id: row.get(1)?,
                target_id: row.get(2)?,
                edge_type: row.get(3)?,
                weight: row.get(4)?,
                tenant: row.get(5)?,
                metadata: metadata_str.and_then(|s| serde_json::from_str(&s).ok()),
                created_at: row.get(7)?,
            })
        })
        .map_err(|e| MemoryError::db(operation, e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| MemoryError::db(operation, e))?;
    Ok(edges)
}

fn join_ids(ids: &[i64]) -> String {
    ids.iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escape LIKE metacharacters so user text matches literally.
fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::graph::store::{get_or_create_node, insert_edge};

    fn test_conn() -> Connection {
        db::open_in_memory().unwrap()
    }

    /// Build a small graph: a -> b -> c, a -> c, plus an unrelated tenant.
    fn seed(conn: &Connection) -> (i64, i64, i64) {
        let a = get_or_create_node(conn, "a", "concept", "u1").unwrap();
        let b = get_or_create_node(conn, "b", "concept", "u1").unwrap();
        let c = get_or_create_node(conn, "c", "concept", "u1").unwrap();
        insert_edge(conn, a, b, "related_to", 1.0, "u1", None).unwrap();
        insert_edge(conn, b, c, "related_to", 1.0, "u1", None).unwrap();
        insert_edge(conn, a, c, "related_to", 1.0, "u1", None).unwrap();

        let x = get_or_create_node(conn, "a", "concept", "u2").unwrap();
        let y = get_or_create_node(conn, "z", "concept", "u2").unwrap();
        insert_edge(conn, x, y, "related_to", 1.0, "u2", None).unwrap();
        (a, b, c)
    }

    #[test]
    fn subgraph_respects_depth_bound() {
        let conn = test_conn();
        seed(&conn);

        let depth0 = subgraph(&conn, "a", "u1", 0).unwrap();
        assert_eq!(depth0.nodes.len(), 1);
        assert!(depth0.edges.is_empty());

        let depth1 = subgraph(&conn, "a", "u1", 1).unwrap();
        let names: Vec<&str> = depth1.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
        // a->b and a->c are in the set, and so is b->c (both endpoints present)
        assert_eq!(depth1.edges.len(), 3);
    }

    #[test]
    fn subgraph_is_tenant_scoped() {
        let conn = test_conn();
        seed(&conn);

        let g = subgraph(&conn, "a", "u2", 3).unwrap();
        let names: Vec<&str> = g.nodes.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a", "z"]);
    }

    #[test]
    fn subgraph_missing_anchor_is_empty() {
        let conn = test_conn();
        seed(&conn);
        let g = subgraph(&conn, "nope", "u1", 2).unwrap();
        assert!(g.is_empty());
    }

    #[test]
    fn subgraph_terminates_on_cycles() {
        let conn = test_conn();
        let a = get_or_create_node(&conn, "a", "concept", "u1").unwrap();
        let b = get_or_create_node(&conn, "b", "concept", "u1").unwrap();
        insert_edge(&conn, a, b, "related_to", 1.0, "u1", None).unwrap();
        insert_edge(&conn, b, a, "related_to", 1.0, "u1", None).unwrap();

        let g = subgraph(&conn, "a", "u1", 10).unwrap();
        assert_eq!(g.nodes.len(), 2);
        assert_eq!(g.edges.len(), 2);
    }

    #[test]
    fn cycle_detection_admits_id_11_when_1_is_visited() {
        // Regression guard: the visited-path check must frame ids with commas.
        // Create nodes until one gets id 11, then chain node 1 -> node 11.
        let conn = test_conn();
        let first = get_or_create_node(&conn, "n1", "concept", "u1").unwrap();
        assert_eq!(first, 1);
        let mut eleventh = first;
        for i in 2..=11 {
            eleventh = get_or_create_node(&conn, &format!("n{i}"), "concept", "u1").unwrap();
        }
        assert_eq!(eleventh, 11);

        insert_edge(&conn, first, eleventh, "related_to", 1.0, "u1", None).unwrap();

        let g = subgraph(&conn, "n1", "u1", 2).unwrap();
        let ids: Vec<i64> = g.nodes.iter().map(|n| n.id).collect();
        assert!(ids.contains(&11), "id 11 must not be shadowed by visited id 1");
        assert_eq!(g.edges.len(), 1);
    }

    #[test]
    fn deep_context_follows_inbound_edges() {
        let conn = test_conn();
        let (a, _b, _c) = seed(&conn);
        let d = get_or_create_node(&conn, "d", "concept", "u1").unwrap();
        // d -> a: invisible to outgoing-only traversal from a
        insert_edge(&conn, d, a, "related_to", 1.0, "u1", None).unwrap();

        let out_only = subgraph(&conn, "a", "u1", 1).unwrap();
        assert!(!out_only.nodes.iter().any(|n| n.name == "d"));

        let both = deep_context(&conn, "a", "u1", 1).unwrap();
        assert!(both.nodes.iter().any(|n| n.name == "d"));
    }

    #[test]
    fn find_path_returns_shallowest() {
        let conn = test_conn();
        seed(&conn);

        // a -> c exists directly, so depth must be 1 even though a -> b -> c
        // also reaches it.
        let path = find_path(&conn, "a", "c", "u1", 4).unwrap().unwrap();
        assert_eq!(path.path, "a -> c");
        assert_eq!(path.depth, 1);
    }

    #[test]
    fn find_path_same_name_is_depth_zero() {
        let conn = test_conn();
        seed(&conn);
        let path = find_path(&conn, "a", "a", "u1", 3).unwrap().unwrap();
        assert_eq!(path.path, "a");
        assert_eq!(path.depth, 0);
    }

    #[test]
    fn find_path_absent_is_none() {
        let conn = test_conn();
        seed(&conn);
        // c has no outgoing edges
        assert!(find_path(&conn, "c", "a", "u1", 5).unwrap().is_none());
    }

    #[test]
    fn search_nodes_matches_name_content_and_type() {
        let conn = test_conn();
        let id = get_or_create_node(&conn, "TypeScript", "language", "u1").unwrap();
        conn.execute(
            "UPDATE nodes SET content = 'a typed superset of JavaScript' WHERE id = ?1",
            params![id],
        )
        .unwrap();
        get_or_create_node(&conn, "Rust", "language", "u1").unwrap();

        let by_name = search_nodes(&conn, "TypeScr", "u1").unwrap();
        assert_eq!(by_name.nodes.len(), 1);

        let by_content = search_nodes(&conn, "JavaScript", "u1").unwrap();
        assert_eq!(by_content.nodes.len(), 1);

        let by_type = search_nodes(&conn, "language", "u1").unwrap();
        assert_eq!(by_type.nodes.len(), 2);

        let other_tenant = search_nodes(&conn, "language", "u2").unwrap();
        assert!(other_tenant.nodes.is_empty());
    }

    #[test]
    fn search_nodes_is_capped() {
        let conn = test_conn();
        for i in 0..60 {
            get_or_create_node(&conn, &format!("item-{i}"), "concept", "u1").unwrap();
        }
        let g = search_nodes(&conn, "item", "u1").unwrap();
        assert_eq!(g.nodes.len(), SEARCH_NODES_CAP);
    }

    #[test]
    fn search_nodes_treats_like_metacharacters_literally() {
        let conn = test_conn();
        get_or_create_node(&conn, "plain", "concept", "u1").unwrap();
        // '%' would match everything if passed through unescaped
        let g = search_nodes(&conn, "%", "u1").unwrap();
        assert!(g.nodes.is_empty());
    }

    #[test]
    fn read_graph_pages_nodes_and_edges() {
        let conn = test_conn();
        let (a, b, _c) = seed(&conn);

        let page = read_graph(&conn, "u1", 2, 0).unwrap();
        assert_eq!(page.nodes.len(), 2);
        let ids: Vec<i64> = page.nodes.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![a, b]);
        // Only a->b lies fully inside the page
        assert_eq!(page.edges.len(), 1);

        let rest = read_graph(&conn, "u1", 10, 2).unwrap();
        assert_eq!(rest.nodes.len(), 1);
        assert!(rest.edges.is_empty());

        let empty_tenant = read_graph(&conn, "u3", 10, 0).unwrap();
        assert!(empty_tenant.is_empty());
    }
}
