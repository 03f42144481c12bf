//! [`Edge`]: a directed, possibly self-looping arc between two nodes.

use rusqlite::params;

use crate::error::{GraphyDbError, Result};
use crate::graph::Graph;
use crate::indexed_set::IndexedSet;
use crate::item::{GraphItem, ItemCore};
use crate::journal;
use crate::node::Node;
use crate::storage::{self, Row};
use crate::uid;
use crate::value::{AttrMap, AttrValue};

/// An order-preserving, uid-keyed collection of edges.
pub type EdgeSet = IndexedSet<Edge>;

/// An arc: `kind`, `startuid`/`enduid`, timestamps, and an attribute map, persisted in the
/// `edges` table. Multiple edges may connect the same pair of nodes in either direction, and an
/// edge may start and end at the same node (a self-loop).
#[derive(Debug, Clone)]
pub struct Edge {
    pub(crate) core: ItemCore,
    pub(crate) startuid: String,
    pub(crate) enduid: String,
    pub(crate) graph: Graph,
}

impl Edge {
    pub(crate) fn new(graph: Graph, kind: impl Into<String>, startuid: impl Into<String>, enduid: impl Into<String>) -> Result<Self> {
        let kind = kind.into();
        if kind.is_empty() {
            return Err(GraphyDbError::InvalidKind);
        }
        Ok(Edge { core: ItemCore::new(kind, uid::generate()), startuid: startuid.into(), enduid: enduid.into(), graph })
    }

    pub(crate) fn from_row(row: Row, graph: Graph) -> Self {
        Edge {
            core: ItemCore::from_persisted(row.uid, row.kind, row.ctime, row.mtime, row.attrs),
            startuid: row.startuid.expect("an edge row always carries startuid"),
            enduid: row.enduid.expect("an edge row always carries enduid"),
            graph,
        }
    }

    pub fn startuid(&self) -> &str {
        &self.startuid
    }

    pub fn enduid(&self) -> &str {
        &self.enduid
    }

    /// The node this edge starts at.
    pub fn start(&self) -> Result<Node> {
        self.graph.get_node(&self.startuid)?.ok_or_else(|| GraphyDbError::MissingNodeRef { uid: self.startuid.clone() })
    }

    /// The node this edge ends at.
    pub fn end(&self) -> Result<Node> {
        self.graph.get_node(&self.enduid)?.ok_or_else(|| GraphyDbError::MissingNodeRef { uid: self.enduid.clone() })
    }

    /// The full snapshot used for a pure-add/pure-delete change record and for undo
    /// reconstruction: the shared `ItemCore` snapshot plus the two endpoint uids, whose presence
    /// is what lets undo tell an edge record apart from a node record.
    fn full_snapshot(&self) -> AttrMap {
        let mut snapshot = self.core.full_snapshot();
        snapshot.insert("startuid".to_string(), AttrValue::Text(self.startuid.clone()));
        snapshot.insert("enduid".to_string(), AttrValue::Text(self.enduid.clone()));
        snapshot
    }

    /// Persist this edge. Fails with [`GraphyDbError::MissingNodeRef`] if either endpoint uid
    /// does not resolve to a live node. Otherwise behaves like [`crate::node::Node::save`].
    pub fn save(&mut self, force: bool, batch: Option<String>, setchange: bool) -> Result<()> {
        if !force && !self.core.changed() {
            return Ok(());
        }
        let uid = self.core.uid().to_string();
        let data = crate::value::attrmap_to_json(&self.core.persistable_attrs()).to_string();
        let snapshot = self.full_snapshot();
        let (startuid, enduid) = (self.startuid.clone(), self.enduid.clone());
        self.graph.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            if !storage::node_exists(&tx, &startuid)? {
                return Err(GraphyDbError::MissingNodeRef { uid: startuid.clone() });
            }
            if !storage::node_exists(&tx, &enduid)? {
                return Err(GraphyDbError::MissingNodeRef { uid: enduid.clone() });
            }
            let prior = storage::load_edge(&tx, &uid)?;
            tx.execute(
                "INSERT INTO edges(uid, kind, startuid, enduid, ctime, mtime, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(uid) DO UPDATE SET kind = excluded.kind, startuid = excluded.startuid,
                     enduid = excluded.enduid, ctime = excluded.ctime, mtime = excluded.mtime,
                     data = excluded.data",
                params![uid, self.core.kind(), startuid, enduid, self.core.ctime(), self.core.mtime(), data],
            )?;
            if setchange {
                match prior {
                    None => journal::record_add(&tx, &uid, &snapshot, batch.as_deref())?,
                    Some(row) => {
                        if let Some((added, removed)) = self.core.dirty_diff(&row.attrs, row.mtime) {
                            journal::record_modify(&tx, &uid, &added, &removed, batch.as_deref())?;
                        }
                    }
                }
            }
            tx.commit()?;
            Ok(())
        })?;
        self.core.clear_dirty();
        Ok(())
    }

    /// Delete this edge. Edges carry no connectivity constraint of their own, so this never
    /// fails on account of other data -- only storage errors propagate.
    pub fn delete(&mut self, batch: Option<String>, setchange: bool) -> Result<()> {
        let uid = self.core.uid().to_string();
        let snapshot = self.full_snapshot();
        self.graph.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute("DELETE FROM edges WHERE uid = ?1", params![uid])?;
            storage::delete_fts(&tx, "edgefts", &uid)?;
            if setchange {
                journal::record_delete(&tx, &uid, &snapshot, batch.as_deref())?;
            }
            tx.commit()?;
            Ok(())
        })
    }

    pub fn renew(&mut self) -> Result<()> {
        let uid = self.core.uid().to_string();
        let row = self
            .graph
            .with_conn(|conn| storage::load_edge(conn, &uid))?
            .ok_or_else(|| GraphyDbError::KeyNotFound(uid.clone()))?;
        self.startuid = row.startuid.clone().expect("an edge row always carries startuid");
        self.enduid = row.enduid.clone().expect("an edge row always carries enduid");
        self.core.renew_from(row.attrs, row.ctime, row.mtime);
        Ok(())
    }

    pub fn copy(&self, new_uid: Option<String>) -> Edge {
        Edge {
            core: self.core.duplicate(new_uid.unwrap_or_else(uid::generate)),
            startuid: self.startuid.clone(),
            enduid: self.enduid.clone(),
            graph: self.graph.clone(),
        }
    }

    /// Equivalent to [`Edge::copy`]; see the note on [`crate::node::Node::deep_copy`].
    pub fn deep_copy(&self, new_uid: Option<String>) -> Edge {
        self.copy(new_uid)
    }

    pub fn update_fts<I, K, V>(&self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let map = fields.into_iter().map(|(k, v)| (k.into(), v.into())).collect();
        let uid = self.core.uid().to_string();
        self.graph.with_conn(|conn| storage::update_fts(conn, "edgefts", &uid, &map))
    }

    pub fn delete_fts(&self) -> Result<()> {
        let uid = self.core.uid().to_string();
        self.graph.with_conn(|conn| storage::delete_fts(conn, "edgefts", &uid))
    }

    pub fn attrs(&self) -> &AttrMap {
        self.core.attrs()
    }
}

/// Batch operations over a whole [`EdgeSet`] at once, sharing one change-journal batch uid across
/// every item touched (allocated fresh unless the caller supplies one).
pub trait EdgeSetBatch {
    fn save(&mut self, force: bool, batch: Option<String>, setchange: bool) -> Result<()>;
    fn delete(&mut self, batch: Option<String>, setchange: bool) -> Result<()>;
    fn delete_fts(&self) -> Result<()>;
}

impl EdgeSetBatch for EdgeSet {
    fn save(&mut self, force: bool, batch: Option<String>, setchange: bool) -> Result<()> {
        let batch = batch.unwrap_or_else(uid::generate);
        let mut updated = EdgeSet::new();
        for mut edge in std::mem::take(self).into_iter() {
            edge.save(force, Some(batch.clone()), setchange)?;
            updated.add(edge);
        }
        *self = updated;
        Ok(())
    }

    fn delete(&mut self, batch: Option<String>, setchange: bool) -> Result<()> {
        let batch = batch.unwrap_or_else(uid::generate);
        for mut edge in std::mem::take(self).into_iter() {
            edge.delete(Some(batch.clone()), setchange)?;
        }
        Ok(())
    }

    fn delete_fts(&self) -> Result<()> {
        for edge in self.iter() {
            edge.delete_fts()?;
        }
        Ok(())
    }
}

impl GraphItem for Edge {
    fn core(&self) -> &ItemCore {
        &self.core
    }
    fn core_mut(&mut self) -> &mut ItemCore {
        &mut self.core
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.core.uid() == other.core.uid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Graph, GraphOptions};

    fn graph() -> Graph {
        Graph::open(GraphOptions::memory()).unwrap()
    }

    #[test]
    fn save_fails_when_endpoint_missing() {
        let g = graph();
        let a = Node::new(g.clone(), "Person").unwrap();
        // `a` was never saved, so its uid does not resolve yet.
        let b_uid = uid::generate();
        let mut e = Edge::new(g, "Likes", a.uid(), b_uid).unwrap();
        let err = e.save(false, None, true).unwrap_err();
        assert!(matches!(err, GraphyDbError::MissingNodeRef { .. }));
    }

    #[test]
    fn save_succeeds_once_both_endpoints_exist() {
        let g = graph();
        let mut a = Node::new(g.clone(), "Person").unwrap();
        a.save(false, None, true).unwrap();
        let mut b = Node::new(g.clone(), "Person").unwrap();
        b.save(false, None, true).unwrap();

        let mut e = Edge::new(g.clone(), "Likes", a.uid(), b.uid()).unwrap();
        e.save(false, None, true).unwrap();

        assert_eq!(e.start().unwrap().uid(), a.uid());
        assert_eq!(e.end().unwrap().uid(), b.uid());
    }

    #[test]
    fn self_loop_is_allowed() {
        let g = graph();
        let mut a = Node::new(g.clone(), "Person").unwrap();
        a.save(false, None, true).unwrap();
        let mut e = Edge::new(g, "Knows", a.uid(), a.uid()).unwrap();
        e.save(false, None, true).unwrap();
        assert_eq!(e.startuid(), e.enduid());
    }

    #[test]
    fn copy_gets_a_fresh_uid_and_keeps_the_same_endpoints() {
        let g = graph();
        let mut a = Node::new(g.clone(), "Person").unwrap();
        a.save(false, None, true).unwrap();
        let mut b = Node::new(g.clone(), "Person").unwrap();
        b.save(false, None, true).unwrap();

        let mut e = Edge::new(g.clone(), "Likes", a.uid(), b.uid()).unwrap();
        e.set("weight", 1);
        e.save(false, None, true).unwrap();

        let copy = e.deep_copy(None);
        assert_ne!(copy.uid(), e.uid());
        assert_eq!(copy.startuid(), e.startuid());
        assert_eq!(copy.enduid(), e.enduid());
        assert_eq!(copy.get("weight"), Some(&AttrValue::Int(1)));
        assert!(copy.changed());
    }

    #[test]
    fn batch_save_and_delete_share_one_journal_batch() {
        let g = graph();
        let mut a = Node::new(g.clone(), "Person").unwrap();
        a.save(false, None, true).unwrap();
        let mut b = Node::new(g.clone(), "Person").unwrap();
        b.save(false, None, true).unwrap();

        let e1 = Edge::new(g.clone(), "Likes", a.uid(), b.uid()).unwrap();
        let e2 = Edge::new(g.clone(), "Likes", b.uid(), a.uid()).unwrap();
        let mut set: EdgeSet = vec![e1, e2].into_iter().collect();
        set.save(false, None, true).unwrap();

        let uids: Vec<String> = set.iter().map(|e| e.uid().to_string()).collect();
        for uid in &uids {
            assert!(g.get_edge(uid).unwrap().is_some());
        }

        set.delete(None, true).unwrap();
        for uid in &uids {
            assert!(g.get_edge(uid).unwrap().is_none());
        }
    }
}
