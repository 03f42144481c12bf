//! The change journal: reversible records of every mutation, with batch-grouped undo.
//!
//! Every record is `{"uid", "+"?, "-"?, "time", "rev", "batch"?}`, stored as the JSON `change`
//! column of the `changes` table (see [`crate::storage`]). `+`/`-` hold the added/prior
//! (non-ephemeral) attribute maps for a modify, or the full attribute snapshot for a pure
//! add/delete. Keeping this as loosely-typed `serde_json::Value` rather than a rigid struct
//! means a future field addition to the record shape isn't a breaking change to the on-disk
//! format.

use rusqlite::Connection;
use serde_json::{Map, Value as Json};
use tracing::{debug, trace};

use crate::edge::Edge;
use crate::error::{GraphyDbError, Result};
use crate::graph::Graph;
use crate::item::{now_secs, GraphItem};
use crate::node::Node;
use crate::storage;
use crate::value::{attrmap_to_json, json_to_attrmap, AttrMap};

fn base_record(uid: &str, batch: Option<&str>) -> Map<String, Json> {
    let mut obj = Map::new();
    obj.insert("uid".to_string(), Json::String(uid.to_string()));
    obj.insert("time".to_string(), serde_json::json!(now_secs()));
    obj.insert("rev".to_string(), Json::String(crate::uid::generate()));
    if let Some(b) = batch {
        obj.insert("batch".to_string(), Json::String(b.to_string()));
    }
    obj
}

/// Append a pure-add record: `snapshot` is the full persistable attribute map (plus
/// `kind`/`ctime`/`mtime`, and for edges `startuid`/`enduid`) of the item as it was just saved.
pub fn record_add(conn: &Connection, uid: &str, snapshot: &AttrMap, batch: Option<&str>) -> Result<()> {
    let mut obj = base_record(uid, batch);
    obj.insert("+".to_string(), attrmap_to_json(snapshot));
    trace!(uid, "journaling add");
    storage::insert_change(conn, &Json::Object(obj))
}

/// Append a pure-delete record: `snapshot` is the full prior attribute map of the item as it
/// existed immediately before deletion.
pub fn record_delete(conn: &Connection, uid: &str, snapshot: &AttrMap, batch: Option<&str>) -> Result<()> {
    let mut obj = base_record(uid, batch);
    obj.insert("-".to_string(), attrmap_to_json(snapshot));
    trace!(uid, "journaling delete");
    storage::insert_change(conn, &Json::Object(obj))
}

/// Append a modify record: `added`/`removed` are the dirty-key diff produced by
/// [`crate::item::ItemCore::dirty_diff`]. Callers are expected to have already checked the diff
/// is non-empty -- an empty modify (the degenerate "only mtime changed" case) is never recorded.
pub fn record_modify(conn: &Connection, uid: &str, added: &AttrMap, removed: &AttrMap, batch: Option<&str>) -> Result<()> {
    let mut obj = base_record(uid, batch);
    obj.insert("+".to_string(), attrmap_to_json(added));
    obj.insert("-".to_string(), attrmap_to_json(removed));
    trace!(uid, "journaling modify");
    storage::insert_change(conn, &Json::Object(obj))
}

/// Split a snapshot map (an add/delete record's `+`/`-` half, or the material undo reconstructs
/// an item from) into `(kind, ctime, mtime, startuid, enduid, remaining_attrs)`. Presence of
/// `startuid` is what tells a node snapshot apart from an edge snapshot.
fn split_snapshot(mut attrs: AttrMap) -> (String, f64, f64, Option<String>, Option<String>, AttrMap) {
    let kind = attrs.shift_remove("kind").and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default();
    let ctime = attrs.shift_remove("ctime").and_then(|v| v.as_f64()).unwrap_or(0.0);
    let mtime = attrs.shift_remove("mtime").and_then(|v| v.as_f64()).unwrap_or(ctime);
    let startuid = attrs.shift_remove("startuid").and_then(|v| v.as_str().map(str::to_owned));
    let enduid = attrs.shift_remove("enduid").and_then(|v| v.as_str().map(str::to_owned));
    (kind, ctime, mtime, startuid, enduid, attrs)
}

/// Undo the most recent change(s): the highest-`id` record, plus -- if it carries a `batch` --
/// every other record sharing that batch, replayed oldest-to-newest in reverse (i.e. the
/// highest id first). Each applied record is removed from the journal once its inverse
/// succeeds. Returns the `(action, uid)` pairs performed, in the order performed, where action
/// is `+` (the record's add was undone by deleting the item), `-` (the record's delete was
/// undone by recreating the item), or `*` (a modify was undone by patching attributes back).
pub fn undo(graph: &Graph) -> Result<Vec<(char, String)>> {
    let records = graph.with_conn(storage::last_changes)?;
    if records.is_empty() {
        debug!("undo called with an empty journal");
        return Ok(Vec::new());
    }

    let mut actions = Vec::new();
    for (id, change) in records.into_iter().rev() {
        let obj = change.as_object().ok_or(GraphyDbError::UnknownUndoAction)?;
        let uid = obj.get("uid").and_then(|v| v.as_str()).ok_or(GraphyDbError::UnknownUndoAction)?.to_string();
        let plus = obj.get("+").cloned();
        let minus = obj.get("-").cloned();

        let action = match (plus, minus) {
            (Some(added), None) => {
                undo_pure_add(graph, &uid, json_to_attrmap(added))?;
                '+'
            }
            (None, Some(removed)) => {
                undo_pure_delete(graph, &uid, json_to_attrmap(removed))?;
                '-'
            }
            (Some(added), Some(removed)) => {
                undo_modify(graph, &uid, json_to_attrmap(added), json_to_attrmap(removed))?;
                '*'
            }
            (None, None) => return Err(GraphyDbError::UnknownUndoAction),
        };

        graph.with_conn(|conn| storage::delete_change(conn, id))?;
        actions.push((action, uid));
    }

    Ok(actions)
}

/// Inverse of a pure add: delete the item. Node deletes cascade over any remaining incident
/// edges (the other halves of a multi-item batch are undone in the same pass, but order within
/// a batch isn't guaranteed to delete edges before their endpoints), and no new change record is
/// written for either the node or its cascaded edges.
fn undo_pure_add(graph: &Graph, uid: &str, _snapshot: AttrMap) -> Result<()> {
    if let Some(mut node) = graph.get_node(uid)? {
        node.delete(true, None, false)
    } else if let Some(mut edge) = graph.get_edge(uid)? {
        edge.delete(None, false)
    } else {
        Err(GraphyDbError::UnknownUndoAction)
    }
}

/// Inverse of a pure delete: recreate the item from its prior snapshot and save it with
/// `setchange = false`, restoring the stored `mtime` verbatim rather than re-touching it (see
/// the open-question resolution in `DESIGN.md`).
fn undo_pure_delete(graph: &Graph, uid: &str, snapshot: AttrMap) -> Result<()> {
    let (kind, ctime, mtime, startuid, enduid, attrs) = split_snapshot(snapshot);
    match (startuid, enduid) {
        (Some(startuid), Some(enduid)) => {
            let mut edge = Edge {
                core: crate::item::ItemCore::from_persisted(uid.to_string(), kind, ctime, mtime, attrs),
                startuid,
                enduid,
                graph: graph.clone(),
            };
            edge.save(true, None, false)
        }
        _ => {
            let mut node = Node {
                core: crate::item::ItemCore::from_persisted(uid.to_string(), kind, ctime, mtime, attrs),
                graph: graph.clone(),
            };
            node.save(true, None, false)
        }
    }
}

/// Inverse of a modify: patch the live item's attributes in reverse (delete what was added,
/// restore what was removed) and save with `force = true, setchange = false`.
fn undo_modify(graph: &Graph, uid: &str, added: AttrMap, mut removed: AttrMap) -> Result<()> {
    // `removed` (the record's `-` half) holds the pre-modify values, including the pre-modify
    // `mtime` -- that's the value the inverse restores.
    let restored_mtime = removed.shift_remove("mtime").and_then(|v| v.as_f64());

    if let Some(mut node) = graph.get_node(uid)? {
        apply_inverse(&mut node, &added, &removed, restored_mtime);
        node.save(true, None, false)
    } else if let Some(mut edge) = graph.get_edge(uid)? {
        apply_inverse(&mut edge, &added, &removed, restored_mtime);
        edge.save(true, None, false)
    } else {
        Err(GraphyDbError::UnknownUndoAction)
    }
}

fn apply_inverse<T: GraphItem>(item: &mut T, added: &AttrMap, removed: &AttrMap, restored_mtime: Option<f64>) {
    for key in added.keys() {
        if key != "mtime" {
            let _ = item.delete(key);
        }
    }
    for (key, value) in removed {
        item.set(key.clone(), value.clone());
    }
    if let Some(mtime) = restored_mtime {
        item.core_mut().mtime = mtime;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphOptions;
    use crate::value::AttrValue;

    fn graph() -> Graph {
        Graph::open(GraphOptions::memory()).unwrap()
    }

    #[test]
    fn undo_of_pure_add_deletes_the_node() {
        let g = graph();
        let mut n = Node::new(g.clone(), "Person").unwrap();
        n.set("name", "Anne");
        n.save(false, None, true).unwrap();
        let uid = n.uid().to_string();

        let actions = undo(&g).unwrap();
        assert_eq!(actions, vec![('+', uid.clone())]);
        assert!(g.get_node(&uid).unwrap().is_none());
    }

    #[test]
    fn undo_of_modify_restores_prior_value() {
        let g = graph();
        let mut n = Node::new(g.clone(), "Person").unwrap();
        n.set("name", "Anne");
        n.save(false, None, true).unwrap();
        let uid = n.uid().to_string();

        n.set("name", "Annie");
        n.save(false, None, true).unwrap();

        undo(&g).unwrap();
        let reloaded = g.get_node(&uid).unwrap().unwrap();
        assert_eq!(reloaded.get("name"), Some(&AttrValue::Text("Anne".into())));
    }

    #[test]
    fn undo_of_delete_with_disconnect_restores_node_and_edges_in_one_call() {
        let g = graph();
        let mut a = Node::new(g.clone(), "Person").unwrap();
        a.save(false, None, true).unwrap();
        let mut b = Node::new(g.clone(), "Person").unwrap();
        b.save(false, None, true).unwrap();
        let mut e = g.edge("Likes", &a, &b).unwrap();
        e.save(false, None, true).unwrap();

        let a_uid = a.uid().to_string();
        let e_uid = e.uid().to_string();
        a.delete(true, None, true).unwrap();
        assert!(g.get_node(&a_uid).unwrap().is_none());
        assert!(g.get_edge(&e_uid).unwrap().is_none());

        undo(&g).unwrap();
        assert!(g.get_node(&a_uid).unwrap().is_some());
        assert!(g.get_edge(&e_uid).unwrap().is_some());
    }

    #[test]
    fn full_undo_sequence_restores_initial_state() {
        // create -> modify -> delete; undoing everything must land back at "never existed",
        // which is the state before the create.
        let g = graph();
        let mut n = Node::new(g.clone(), "Person").unwrap();
        n.set("name", "Anne");
        n.save(false, None, true).unwrap();
        n.set("name", "Annie");
        n.save(false, None, true).unwrap();
        n.delete(false, None, true).unwrap();

        while g.with_conn(storage::count_changes).unwrap() > 0 {
            undo(&g).unwrap();
        }
        assert!(g.get_node(n.uid()).unwrap().is_none());
        assert_eq!(g.with_conn(storage::count_changes).unwrap(), 0);
    }
}
