//! Shared attribute-map machinery underlying both [`crate::node::Node`] and
//! [`crate::edge::Edge`].
//!
//! `ItemCore` owns the uid/kind/timestamps/attributes common to both element kinds along with
//! dirty-key tracking; `Node` and `Edge` each embed one and implement [`GraphItem`] to expose it
//! through a uniform surface while keeping their own `save`/`delete` (which differ in table name,
//! FTS alias, and structural constraints) out of this module.

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::value::{is_ephemeral, persistable, AttrMap, AttrValue};

pub(crate) fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs_f64()
}

/// The uid/kind/timestamps/attribute state shared by every node and edge.
#[derive(Debug, Clone)]
pub struct ItemCore {
    pub(crate) uid: String,
    pub(crate) kind: String,
    pub(crate) ctime: f64,
    pub(crate) mtime: f64,
    pub(crate) attrs: AttrMap,
    pub(crate) dirty: HashSet<String>,
    /// True until the first successful `save`. A fresh item is always "changed", even with zero
    /// attributes, so it persists on first save.
    pub(crate) fresh: bool,
}

impl ItemCore {
    pub fn new(kind: impl Into<String>, uid: String) -> Self {
        let now = now_secs();
        ItemCore {
            uid,
            kind: kind.into(),
            ctime: now,
            mtime: now,
            attrs: AttrMap::new(),
            dirty: HashSet::new(),
            fresh: true,
        }
    }

    /// Reconstruct from a persisted row. Not fresh and not dirty: the caller is stating that
    /// `attrs` already matches what's on disk.
    pub fn from_persisted(uid: String, kind: String, ctime: f64, mtime: f64, attrs: AttrMap) -> Self {
        ItemCore {
            uid,
            kind,
            ctime,
            mtime,
            attrs,
            dirty: HashSet::new(),
            fresh: false,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn ctime(&self) -> f64 {
        self.ctime
    }

    pub fn mtime(&self) -> f64 {
        self.mtime
    }

    pub fn attrs(&self) -> &AttrMap {
        &self.attrs
    }

    pub fn get(&self, key: &str) -> Option<&AttrValue> {
        match key {
            "uid" => None,
            _ => self.attrs.get(key),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: AttrValue) {
        let key = key.into();
        self.attrs.insert(key.clone(), value);
        if key != "mtime" {
            self.touch_mtime();
        }
        self.dirty.insert(key);
    }

    pub fn set_batch<I, K>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, AttrValue)>,
        K: Into<String>,
    {
        for (k, v) in pairs {
            self.set(k.into(), v);
        }
    }

    pub fn delete_key(&mut self, key: &str) -> Option<AttrValue> {
        let removed = self.attrs.shift_remove(key);
        if removed.is_some() {
            self.dirty.insert(key.to_owned());
            self.touch_mtime();
        }
        removed
    }

    fn touch_mtime(&mut self) {
        self.mtime = now_secs();
    }

    /// True if this item would write something new on `save`.
    pub fn changed(&self) -> bool {
        self.fresh || !self.dirty.is_empty()
    }

    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
        self.fresh = false;
    }

    /// Replace attribute state with a freshly persisted copy, preserving any ephemeral
    /// (`_`-prefixed) keys already held in memory, and clear dirty tracking.
    pub fn renew_from(&mut self, persisted_attrs: AttrMap, ctime: f64, mtime: f64) {
        let ephemeral: Vec<(String, AttrValue)> = self
            .attrs
            .iter()
            .filter(|(k, _)| is_ephemeral(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.attrs = persisted_attrs;
        for (k, v) in ephemeral {
            self.attrs.insert(k, v);
        }
        self.ctime = ctime;
        self.mtime = mtime;
        self.dirty.clear();
        self.fresh = false;
    }

    /// Diff between `prior_attrs`/`prior_mtime` (the row as persisted before this save) and the
    /// current in-memory state, restricted to dirty, non-ephemeral keys, for use as a change
    /// record's `+`/`-` halves. Only meaningful when the prior state is an actual previously
    /// persisted row -- a brand new item with no prior row is a pure add and should not go
    /// through this helper.
    ///
    /// `mtime` is not itself a dirty attribute key in this typed model (it's a struct field, not
    /// an `AttrMap` entry), so unlike the dict-based original there is no risk of it showing up
    /// as a spurious lone diff: the degenerate "only mtime changed" case simply can't arise here.
    /// When something real *did* change, `mtime`'s old/new values travel alongside it in the
    /// returned maps, exactly mirroring what the original's diff captured once other keys moved.
    ///
    /// Returns `None` if no dirty key actually differs from `prior_attrs`.
    pub fn dirty_diff(&self, prior_attrs: &AttrMap, prior_mtime: f64) -> Option<(AttrMap, AttrMap)> {
        let mut added = AttrMap::new();
        let mut removed = AttrMap::new();
        for key in &self.dirty {
            if is_ephemeral(key) {
                continue;
            }
            let old = prior_attrs.get(key);
            let new = self.attrs.get(key);
            match (old, new) {
                (Some(_), None) => {
                    removed.insert(key.clone(), old.cloned().unwrap());
                }
                (None, Some(v)) => {
                    added.insert(key.clone(), v.clone());
                }
                (Some(o), Some(n)) if o != n => {
                    removed.insert(key.clone(), o.clone());
                    added.insert(key.clone(), n.clone());
                }
                _ => {}
            }
        }
        if added.is_empty() && removed.is_empty() {
            return None;
        }
        added.insert("mtime".to_string(), AttrValue::Float(self.mtime));
        removed.insert("mtime".to_string(), AttrValue::Float(prior_mtime));
        Some((added, removed))
    }

    /// The full snapshot of this item -- persistable attributes plus `kind`/`ctime`/`mtime` --
    /// used as a pure-add or pure-delete change record's `+`/`-` half, and as the material undo
    /// uses to reconstruct a deleted item. `uid` is carried separately at the change record's
    /// top level, not duplicated in here.
    pub fn full_snapshot(&self) -> AttrMap {
        let mut snapshot = self.persistable_attrs();
        snapshot.insert("kind".to_string(), AttrValue::Text(self.kind.clone()));
        snapshot.insert("ctime".to_string(), AttrValue::Float(self.ctime));
        snapshot.insert("mtime".to_string(), AttrValue::Float(self.mtime));
        snapshot
    }

    /// The full persistable (non-ephemeral) attribute map, for a pure-add change record or for
    /// writing to the `data` column.
    pub fn persistable_attrs(&self) -> AttrMap {
        persistable(&self.attrs)
    }

    /// Produce a duplicated core sharing no mutable state with `self`: a fresh uid (or the one
    /// supplied), fresh timestamps, and every persistable key marked dirty so the duplicate
    /// persists in full on its first save.
    pub fn duplicate(&self, new_uid: String) -> ItemCore {
        let now = now_secs();
        let attrs = self.attrs.clone();
        let dirty = attrs.keys().cloned().collect();
        ItemCore {
            uid: new_uid,
            kind: self.kind.clone(),
            ctime: now,
            mtime: now,
            attrs,
            dirty,
            fresh: true,
        }
    }
}

/// Uniform attribute-level surface shared by [`crate::node::Node`] and [`crate::edge::Edge`].
///
/// `save`/`delete`/`copy`/`deep_copy` are deliberately not part of this trait: they differ enough
/// between nodes (FTS table `nodefts`, connectivity checks) and edges (FTS table `edgefts`,
/// endpoint resolution) that each type implements them directly, reusing `ItemCore` helpers.
pub trait GraphItem {
    fn core(&self) -> &ItemCore;
    fn core_mut(&mut self) -> &mut ItemCore;

    fn uid(&self) -> &str {
        self.core().uid()
    }

    fn kind(&self) -> &str {
        self.core().kind()
    }

    fn ctime(&self) -> f64 {
        self.core().ctime()
    }

    fn mtime(&self) -> f64 {
        self.core().mtime()
    }

    fn get(&self, key: &str) -> Option<&AttrValue> {
        self.core().get(key)
    }

    /// Like [`GraphItem::get`], but raises [`crate::error::GraphyDbError::KeyNotFound`] instead of
    /// returning `None`. Not part of the crate's ergonomic public surface (callers who want a
    /// default should use `get` plus `unwrap_or`/`or`); kept for call sites that genuinely need a
    /// missing attribute to be an error rather than a silent `None`.
    fn get_required(&self, key: &str) -> crate::error::Result<&AttrValue> {
        self.get(key).ok_or_else(|| crate::error::GraphyDbError::KeyNotFound(key.to_string()))
    }

    fn set(&mut self, key: impl Into<String>, value: impl Into<AttrValue>) {
        self.core_mut().set(key.into(), value.into());
    }

    fn delete(&mut self, key: &str) -> Option<AttrValue> {
        self.core_mut().delete_key(key)
    }

    fn set_batch<I, K, V>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<AttrValue>,
    {
        for (k, v) in pairs {
            self.set(k.into(), v.into());
        }
    }

    fn changed(&self) -> bool {
        self.core().changed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_core() -> ItemCore {
        ItemCore::new("person", "UID0000000000000000000001".to_string())
    }

    #[test]
    fn fresh_item_is_changed_with_no_attrs() {
        let core = fresh_core();
        assert!(core.changed());
    }

    #[test]
    fn set_marks_dirty_and_touches_mtime() {
        let mut core = fresh_core();
        core.clear_dirty();
        assert!(!core.changed());
        let before = core.mtime();
        std::thread::sleep(std::time::Duration::from_millis(2));
        core.set("name", AttrValue::Text("Anne".into()));
        assert!(core.changed());
        assert!(core.mtime() >= before);
        assert_eq!(core.get("name"), Some(&AttrValue::Text("Anne".into())));
    }

    #[test]
    fn setting_mtime_itself_does_not_recurse() {
        let mut core = fresh_core();
        core.clear_dirty();
        core.set("mtime", AttrValue::Int(42));
        assert_eq!(core.dirty.len(), 1);
        assert!(core.dirty.contains("mtime"));
    }

    #[test]
    fn dirty_diff_suppresses_mtime_only_change() {
        let mut core = fresh_core();
        core.clear_dirty();
        let prior_mtime = core.mtime;
        core.dirty.insert("mtime".to_string());
        let prior = AttrMap::new();
        assert!(core.dirty_diff(&prior, prior_mtime).is_none());
    }

    #[test]
    fn dirty_diff_reports_added_and_removed() {
        let mut core = fresh_core();
        core.set("name", AttrValue::Text("Anne".into()));
        core.clear_dirty();
        let prior_mtime = core.mtime;
        let mut prior = AttrMap::new();
        prior.insert("name".into(), AttrValue::Text("Anne".into()));
        prior.insert("age".into(), AttrValue::Int(30));

        core.set("name", AttrValue::Text("Annie".into()));
        core.delete_key("age");

        let (added, removed) = core.dirty_diff(&prior, prior_mtime).unwrap();
        assert_eq!(added.get("name"), Some(&AttrValue::Text("Annie".into())));
        assert_eq!(removed.get("age"), Some(&AttrValue::Int(30)));
    }

    #[test]
    fn renew_preserves_ephemeral_keys() {
        let mut core = fresh_core();
        core.set("_scratch", AttrValue::Bool(true));
        let mut persisted = AttrMap::new();
        persisted.insert("name".into(), AttrValue::Text("Anne".into()));
        let (ctime, mtime) = (core.ctime, core.mtime);
        core.renew_from(persisted, ctime, mtime);
        assert_eq!(core.get("_scratch"), Some(&AttrValue::Bool(true)));
        assert_eq!(core.get("name"), Some(&AttrValue::Text("Anne".into())));
        assert!(!core.changed());
    }

    #[test]
    fn duplicate_gets_new_uid_and_full_dirty_set() {
        let mut core = fresh_core();
        core.set("name", AttrValue::Text("Anne".into()));
        core.clear_dirty();
        let dup = core.duplicate("UID0000000000000000000002".to_string());
        assert_eq!(dup.uid(), "UID0000000000000000000002");
        assert!(dup.changed());
        assert_eq!(dup.get("name"), Some(&AttrValue::Text("Anne".into())));
    }
}
