//! An embedded, directed-multigraph database on top of SQLite.
//!
//! A [`Graph`] owns a single `rusqlite::Connection` and exposes [`Node`]s and [`Edge`]s as typed,
//! attribute-bearing records, a small chain-pattern query language for walking the graph (see
//! [`pattern`]), neighborhood traversal sugar (see [`traversal`]), and a reversible change journal
//! with batch-grouped undo (see [`journal`]).
//!
//! This crate is single-threaded by design: `Graph` wraps its connection in an `Rc`, so it is
//! `Clone` but not `Send`/`Sync`. Fan the same graph out to other threads by opening a second
//! connection to the same file instead.

pub mod edge;
pub mod error;
pub mod graph;
mod indexed_set;
mod item;
mod journal;
pub mod node;
pub mod pattern;
mod storage;
pub mod traversal;
mod uid;
pub mod value;

pub use edge::{Edge, EdgeSet, EdgeSetBatch};
pub use error::{GraphyDbError, Result};
pub use graph::{Graph, GraphOptions};
pub use indexed_set::{IndexedSet, Keyed};
pub use item::GraphItem;
pub use node::{Node, NodeSet, NodeSetBatch};
pub use pattern::{FetchParams, FetchResult};
pub use storage::GraphStats;
pub use traversal::NodeSetTraversal;
pub use value::{AttrMap, AttrValue};
