//! [`Graph`]: the public entry point. Owns the storage connection and ties together the item
//! model, the pattern compiler/fetch engine, and the change journal.

use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::Context;
use rusqlite::Connection;
use tracing::{debug, instrument};

use crate::edge::Edge;
use crate::error::Result;
use crate::node::Node;
use crate::pattern::{self, FetchParams, FetchResult};
use crate::storage::{self, GraphStats};

/// How to open a [`Graph`]: an in-memory database, or a file-backed one. Mirrors the original
/// `Graph(path=':memory:')` constructor, generalized into a small typed options struct.
#[derive(Debug, Clone)]
pub enum GraphOptions {
    Memory,
    File(PathBuf),
}

impl GraphOptions {
    pub fn memory() -> Self {
        GraphOptions::Memory
    }

    pub fn file(path: impl AsRef<Path>) -> Self {
        GraphOptions::File(path.as_ref().to_path_buf())
    }
}

/// The graph handle. Cheap to clone -- clones share the same underlying connection via `Rc`, as
/// intended for the single-writer, single-thread model this crate targets (`Connection` isn't
/// `Sync`, so `Graph` isn't either; see the crate-level concurrency notes).
#[derive(Clone)]
pub struct Graph {
    conn: Rc<Connection>,
}

impl Graph {
    /// Open (and, if the core tables don't exist yet, initialize) a graph.
    #[instrument(skip_all)]
    pub fn open(options: GraphOptions) -> Result<Self> {
        let conn = match options {
            GraphOptions::Memory => Connection::open_in_memory()?,
            GraphOptions::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    if !parent.is_dir() {
                        return Err(anyhow::anyhow!("parent directory `{}` does not exist", parent.display()).into());
                    }
                }
                Connection::open(&path).with_context(|| format!("opening graph database at `{}`", path.display()))?
            }
        };
        let graph = Graph { conn: Rc::new(conn) };
        if !graph.schema_exists()? {
            debug!("no existing schema found, initializing");
            graph.reset()?;
        }
        Ok(graph)
    }

    fn schema_exists(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'nodes'",
                [],
                |r| r.get(0),
            )?;
            Ok(n > 0)
        })
    }

    /// Run `f` against the owned connection.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        f(&self.conn)
    }

    /// Drop and recreate the five core tables. *All data is lost.*
    pub fn reset(&self) -> Result<()> {
        self.with_conn(storage::reset)
    }

    /// Drop and recreate the optional FTS5 virtual tables, indexing `node_fields`/`edge_fields`
    /// respectively. Passing `None` for a side leaves that side without full-text search.
    pub fn reset_fts(&self, node_fields: Option<&[String]>, edge_fields: Option<&[String]>) -> Result<()> {
        self.with_conn(|conn| storage::reset_fts(conn, node_fields, edge_fields))
    }

    /// Construct a new, unsaved node of the given kind.
    pub fn node(&self, kind: impl Into<String>) -> Result<Node> {
        Node::new(self.clone(), kind)
    }

    /// Construct a new, unsaved edge from `start` to `end`. Neither endpoint needs to already be
    /// saved; the check happens at the edge's own `save` time.
    pub fn edge(&self, kind: impl Into<String>, start: &Node, end: &Node) -> Result<Edge> {
        self.edge_between(kind, start.uid(), end.uid())
    }

    /// Like [`Graph::edge`], but taking endpoint uids directly rather than live `Node`s.
    pub fn edge_between(&self, kind: impl Into<String>, startuid: impl Into<String>, enduid: impl Into<String>) -> Result<Edge> {
        Edge::new(self.clone(), kind, startuid, enduid)
    }

    /// Load a node by uid, if one is persisted.
    pub fn get_node(&self, uid: &str) -> Result<Option<Node>> {
        let row = self.with_conn(|conn| storage::load_node(conn, uid))?;
        Ok(row.map(|r| Node::from_row(r, self.clone())))
    }

    /// Load an edge by uid, if one is persisted.
    pub fn get_edge(&self, uid: &str) -> Result<Option<Edge>> {
        let row = self.with_conn(|conn| storage::load_edge(conn, uid))?;
        Ok(row.map(|r| Edge::from_row(r, self.clone())))
    }

    /// Compile and run a chain pattern against this graph.
    #[instrument(skip(self, params), fields(chain = %chain))]
    pub fn fetch(&self, chain: &str, params: FetchParams) -> Result<FetchResult> {
        pattern::run(self, chain, params)
    }

    /// Undo the most recent change (or batch of changes); see [`crate::journal::undo`].
    pub fn undo(&self) -> Result<Vec<(char, String)>> {
        crate::journal::undo(self)
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.with_conn(|conn| storage::get_setting(conn, key))
    }

    pub fn set_setting(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.with_conn(|conn| storage::save_setting(conn, key, value))
    }

    pub fn get_cached(&self, key: &str) -> Result<Option<serde_json::Value>> {
        self.with_conn(|conn| storage::get_cached(conn, key))
    }

    pub fn set_cached(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.with_conn(|conn| storage::set_cached(conn, key, value))
    }

    pub fn stats(&self) -> Result<GraphStats> {
        self.with_conn(storage::stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::GraphItem;

    #[test]
    fn open_memory_initializes_schema() {
        let g = Graph::open(GraphOptions::memory()).unwrap();
        let stats = g.stats().unwrap();
        assert_eq!(stats.total_nodes, 0);
    }

    #[test]
    fn clone_shares_the_same_connection() {
        let g = Graph::open(GraphOptions::memory()).unwrap();
        let g2 = g.clone();
        let mut n = g.node("Person").unwrap();
        n.set("name", "Anne");
        n.save(false, None, true).unwrap();
        assert!(g2.get_node(n.uid()).unwrap().is_some());
    }

    #[test]
    fn open_file_rejects_missing_parent_directory() {
        let path = std::path::Path::new("/no/such/directory/graph.db");
        let err = Graph::open(GraphOptions::file(path)).unwrap_err();
        assert!(matches!(err, crate::error::GraphyDbError::Other(_)));
    }
}
