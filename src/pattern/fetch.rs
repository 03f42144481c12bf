//! Executes a compiled chain-pattern query against a [`crate::graph::Graph`] and materializes
//! the result rows into node or edge sets.

use rusqlite::Connection;
use tracing::trace;

use crate::edge::{Edge, EdgeSet};
use crate::error::Result;
use crate::graph::Graph;
use crate::node::{Node, NodeSet};
use crate::pattern::compiler::{compile, CompiledQuery, FetchParams};
use crate::pattern::lexer::LinkKind;
use crate::storage::Row;
use crate::value::{json_to_attrmap, AttrValue};

pub use crate::pattern::compiler::FetchParams as Params;

/// The outcome of a [`crate::graph::Graph::fetch`] call: either a materialized set (preserving
/// query order) or, when `COUNT`/`DEBUG` was requested, the scalar/diagnostic alternative.
pub enum FetchResult {
    Nodes(NodeSet),
    Edges(EdgeSet),
    Count(i64),
    Debug { sql: String, params: Vec<(String, AttrValue)> },
}

impl FetchResult {
    pub fn into_nodes(self) -> Option<NodeSet> {
        match self {
            FetchResult::Nodes(n) => Some(n),
            _ => None,
        }
    }

    pub fn into_edges(self) -> Option<EdgeSet> {
        match self {
            FetchResult::Edges(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_count(self) -> Option<i64> {
        match self {
            FetchResult::Count(c) => Some(c),
            _ => None,
        }
    }
}

pub fn fetch(graph: &Graph, chain: &str, params: FetchParams) -> Result<FetchResult> {
    let debug = params.debug;
    let count = params.count;
    let compiled = compile(chain, params)?;

    if debug {
        return Ok(FetchResult::Debug { sql: compiled.sql, params: compiled.bound });
    }

    trace!(sql = %compiled.sql, "executing fetch");

    graph.with_conn(|conn| {
        if count {
            return Ok(FetchResult::Count(execute_count(conn, &compiled)?));
        }
        match compiled.collect_kind {
            LinkKind::Node => Ok(FetchResult::Nodes(execute_nodes(conn, &compiled, graph)?)),
            LinkKind::EdgeRight | LinkKind::EdgeLeft => Ok(FetchResult::Edges(execute_edges(conn, &compiled, graph)?)),
        }
    })
}

/// `rusqlite`'s named-parameter binding matches on the parameter text exactly as it appears in
/// the SQL (including the leading `:`), but `CompiledQuery::bound` stores bare names -- prefix
/// them here rather than threading the colon through the compiler's string building.
fn bind(compiled: &CompiledQuery) -> Vec<(String, &dyn rusqlite::ToSql)> {
    compiled.bound.iter().map(|(k, v)| (format!(":{k}"), v as &dyn rusqlite::ToSql)).collect()
}

fn execute_count(conn: &Connection, compiled: &CompiledQuery) -> Result<i64> {
    let named = bind(compiled);
    let refs: Vec<(&str, &dyn rusqlite::ToSql)> = named.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let mut stmt = conn.prepare(&compiled.sql)?;
    let n: i64 = stmt.query_row(refs.as_slice(), |r| r.get(0))?;
    Ok(n)
}

/// Decode one result row into a [`Row`], given the fixed structural-column layout the compiler
/// produced (`uid, kind, ctime, mtime[, startuid, enduid], data, proj1, proj2, ...`).
fn decode_row(row: &rusqlite::Row<'_>, compiled: &CompiledQuery, is_edge: bool) -> rusqlite::Result<Row> {
    let uid: String = row.get(0)?;
    let kind: String = row.get(1)?;
    let ctime: f64 = row.get(2)?;
    let mtime: f64 = row.get(3)?;
    let (startuid, enduid) = if is_edge {
        (Some(row.get::<_, String>(4)?), Some(row.get::<_, String>(5)?))
    } else {
        (None, None)
    };
    let data: String = row.get(compiled.data_col_index)?;
    let json: serde_json::Value = serde_json::from_str(&data).unwrap_or(serde_json::Value::Null);
    let mut attrs = json_to_attrmap(json);
    for (i, name) in compiled.projection_names.iter().enumerate() {
        let value: AttrValue = row.get_ref(compiled.data_col_index + 1 + i)?.into();
        attrs.insert(format!("_{name}"), value);
    }
    Ok(Row { uid, kind, ctime, mtime, attrs, startuid, enduid })
}

fn execute_nodes(conn: &Connection, compiled: &CompiledQuery, graph: &Graph) -> Result<NodeSet> {
    let named = bind(compiled);
    let refs: Vec<(&str, &dyn rusqlite::ToSql)> = named.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let mut stmt = conn.prepare(&compiled.sql)?;
    let rows = stmt.query_map(refs.as_slice(), |r| decode_row(r, compiled, false))?;
    let mut set = NodeSet::new();
    for row in rows {
        set.add(Node::from_row(row?, graph.clone()));
    }
    Ok(set)
}

fn execute_edges(conn: &Connection, compiled: &CompiledQuery, graph: &Graph) -> Result<EdgeSet> {
    let named = bind(compiled);
    let refs: Vec<(&str, &dyn rusqlite::ToSql)> = named.iter().map(|(k, v)| (k.as_str(), *v)).collect();
    let mut stmt = conn.prepare(&compiled.sql)?;
    let rows = stmt.query_map(refs.as_slice(), |r| decode_row(r, compiled, true))?;
    let mut set = EdgeSet::new();
    for row in rows {
        set.add(Edge::from_row(row?, graph.clone()));
    }
    Ok(set)
}
