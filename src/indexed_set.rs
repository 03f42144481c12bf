//! Order-preserving, uid-indexed collection of nodes or edges with set algebra.
//!
//! Backed by an [`indexmap::IndexMap`], which already gives O(1) uid lookup plus
//! insertion-order iteration -- exactly the list/set duality the original hand-rolled
//! `_index`+`_list` pair existed to provide, so there is no separate list to keep in sync here.

use std::cmp::Ordering;
use std::ops::{BitAnd, BitOr, BitXor, Sub};

use globset::Glob;
use indexmap::IndexMap;

use crate::error::{GraphyDbError, Result};
use crate::item::GraphItem;
use crate::value::AttrValue;

/// Anything that can be keyed by a stable uid -- implemented by [`crate::node::Node`] and
/// [`crate::edge::Edge`].
pub trait Keyed {
    fn uid(&self) -> &str;
}

impl<T: GraphItem> Keyed for T {
    fn uid(&self) -> &str {
        GraphItem::uid(self)
    }
}

/// An order-preserving set of items keyed by uid. See [`crate::node::NodeSet`] and
/// [`crate::edge::EdgeSet`] for the concrete aliases used throughout the crate.
#[derive(Debug, Clone)]
pub struct IndexedSet<T> {
    entries: IndexMap<String, T>,
}

impl<T: Keyed + Clone> IndexedSet<T> {
    pub fn new() -> Self {
        IndexedSet { entries: IndexMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_uid(&self, uid: &str) -> bool {
        self.entries.contains_key(uid)
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<&T> {
        self.entries.get(uid)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    pub fn into_vec(self) -> Vec<T> {
        self.entries.into_values().collect()
    }

    /// Index into list order, like `list[i]`.
    pub fn at(&self, index: usize) -> Option<&T> {
        self.entries.get_index(index).map(|(_, v)| v)
    }

    /// The first element in list order, or `None` on an empty set.
    pub fn one(&self) -> Option<&T> {
        self.at(0)
    }

    /// A new indexed set holding the slice `range` of the current order.
    pub fn slice(&self, range: std::ops::Range<usize>) -> IndexedSet<T> {
        let range = range.start.min(self.entries.len())..range.end.min(self.entries.len());
        IndexedSet::from_iter_keep_first(self.entries.values().skip(range.start).take(range.len()).cloned())
    }

    /// Builds a set from an iterable, tolerating duplicate uids by keeping the first occurrence.
    pub fn from_iter_keep_first<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut entries = IndexMap::new();
        for item in iter {
            let uid = item.uid().to_string();
            entries.entry(uid).or_insert(item);
        }
        IndexedSet { entries }
    }

    /// Sort in place by a caller-supplied key, optionally reversed. Returns `&mut self` so calls
    /// can be chained the way the original fluent API allowed.
    pub fn sort_by_key<K: Ord, F: Fn(&T) -> K>(&mut self, key: F, reverse: bool) -> &mut Self {
        self.entries.sort_by(|_, a, _, b| {
            let ord = key(a).cmp(&key(b));
            if reverse {
                ord.reverse()
            } else {
                ord
            }
        });
        self
    }

    pub fn reverse(&mut self) -> &mut Self {
        self.entries.reverse();
        self
    }

    /// Append `item`, moving it to the end if an item with the same uid is already present.
    pub fn append(&mut self, item: T) -> &mut Self {
        let uid = item.uid().to_string();
        self.entries.shift_remove(&uid);
        self.entries.insert(uid, item);
        self
    }

    /// Add `item`, overwriting in place (keeping position) if the uid is already present.
    pub fn add(&mut self, item: T) -> &mut Self {
        let uid = item.uid().to_string();
        self.entries.insert(uid, item);
        self
    }

    pub fn discard(&mut self, uid: &str) -> Option<T> {
        self.entries.shift_remove(uid)
    }

    /// Pop the last item in list order.
    pub fn pop(&mut self) -> Option<T> {
        self.entries.pop().map(|(_, v)| v)
    }

    pub fn delete_at(&mut self, index: usize) -> Option<T> {
        self.entries.shift_remove_index(index).map(|(_, v)| v)
    }

    pub fn delete_range(&mut self, range: std::ops::Range<usize>) {
        let range = range.start.min(self.entries.len())..range.end.min(self.entries.len());
        for i in range.rev() {
            self.entries.shift_remove_index(i);
        }
    }

    fn keyset(&self) -> std::collections::BTreeSet<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Left operand's order for elements it holds, then right-only elements in the right
    /// operand's own order -- the ordering contract every set-algebra operation below follows.
    pub fn union(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (uid, item) in other.entries.iter() {
            out.entries.entry(uid.clone()).or_insert_with(|| item.clone());
        }
        out
    }

    pub fn intersection(&self, other: &Self) -> Self {
        IndexedSet::from_iter_keep_first(self.entries.values().filter(|v| other.contains_uid(v.uid())).cloned())
    }

    pub fn difference(&self, other: &Self) -> Self {
        IndexedSet::from_iter_keep_first(self.entries.values().filter(|v| !other.contains_uid(v.uid())).cloned())
    }

    pub fn symmetric_difference(&self, other: &Self) -> Self {
        let left_only = self.entries.values().filter(|v| !other.contains_uid(v.uid())).cloned();
        let right_only = other.entries.values().filter(|v| !self.contains_uid(v.uid())).cloned();
        IndexedSet::from_iter_keep_first(left_only.chain(right_only))
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.keyset().is_subset(&other.keyset())
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        self.keyset().is_superset(&other.keyset())
    }

    /// `get(key)` across all elements, substituting `default` where an element lacks the key.
    pub fn get_attr(&self, key: &str, default: Option<&AttrValue>) -> Vec<Option<AttrValue>>
    where
        T: GraphItem,
    {
        self.entries
            .values()
            .map(|item| item.get(key).cloned().or_else(|| default.cloned()))
            .collect()
    }

    /// `get` for several keys at once: for each element, the values of `keys` in order,
    /// substituting `default` wherever an element lacks one.
    pub fn get_many(&self, keys: &[&str], default: Option<&AttrValue>) -> Vec<Vec<Option<AttrValue>>>
    where
        T: GraphItem,
    {
        self.entries
            .values()
            .map(|item| keys.iter().map(|k| item.get(k).cloned().or_else(|| default.cloned())).collect())
            .collect()
    }

    /// Broadcast `set` across every element in the set.
    pub fn set_attr(&mut self, key: &str, value: AttrValue)
    where
        T: GraphItem,
    {
        for item in self.entries.values_mut() {
            item.set(key.to_string(), value.clone());
        }
    }

    /// Items for which `predicate` returns `true`. Since [`GraphItem::get`] already returns
    /// `Option`, a predicate reading a missing key naturally contributes `false` rather than
    /// panicking -- there is no separate error-tolerance mechanism needed.
    pub fn filter<F: Fn(&T) -> bool>(&self, predicate: F) -> Self {
        IndexedSet::from_iter_keep_first(self.entries.values().filter(|item| predicate(item)).cloned())
    }

    /// Items matching every supplied `key=pattern` glob pair (AND-joined). An element missing a
    /// key, or whose value isn't text, fails that pair and is excluded.
    pub fn filter_glob<'a, I>(&self, pairs: I) -> Result<Self>
    where
        T: GraphItem,
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let compiled: Vec<(&str, globset::GlobMatcher)> = pairs
            .into_iter()
            .map(|(key, pattern)| {
                Glob::new(pattern)
                    .map(|g| (key, g.compile_matcher()))
                    .map_err(|e| GraphyDbError::Pattern(format!("invalid glob pattern `{pattern}`: {e}")))
            })
            .collect::<Result<_>>()?;
        Ok(self.filter(|item| {
            compiled.iter().all(|(key, glob)| item.get(key).and_then(|v| v.as_str()).map(|s| glob.is_match(s)).unwrap_or(false))
        }))
    }
}

impl<T: Keyed + Clone> Default for IndexedSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Keyed + Clone> FromIterator<T> for IndexedSet<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        IndexedSet::from_iter_keep_first(iter)
    }
}

impl<T: Keyed + Clone> IntoIterator for IndexedSet<T> {
    type Item = T;
    type IntoIter = indexmap::map::IntoValues<String, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_values()
    }
}

impl<'a, T: Keyed + Clone> IntoIterator for &'a IndexedSet<T> {
    type Item = &'a T;
    type IntoIter = indexmap::map::Values<'a, String, T>;
    fn into_iter(self) -> Self::IntoIter {
        self.entries.values()
    }
}

impl<T: Keyed + Clone> PartialEq for IndexedSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.keyset() == other.keyset()
    }
}

impl<T: Keyed + Clone> PartialOrd for IndexedSet<T> {
    /// Reflects the subset relation, not list order: `a <= b` iff `a`'s uids are a subset of
    /// `b`'s. Incomparable sets (neither a subset of the other) return `None`.
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        let (a, b) = (self.keyset(), other.keyset());
        if a == b {
            Some(Ordering::Equal)
        } else if a.is_subset(&b) {
            Some(Ordering::Less)
        } else if a.is_superset(&b) {
            Some(Ordering::Greater)
        } else {
            None
        }
    }
}

impl<T: Keyed + Clone> BitOr for &IndexedSet<T> {
    type Output = IndexedSet<T>;
    fn bitor(self, rhs: Self) -> IndexedSet<T> {
        self.union(rhs)
    }
}

impl<T: Keyed + Clone> BitAnd for &IndexedSet<T> {
    type Output = IndexedSet<T>;
    fn bitand(self, rhs: Self) -> IndexedSet<T> {
        self.intersection(rhs)
    }
}

impl<T: Keyed + Clone> Sub for &IndexedSet<T> {
    type Output = IndexedSet<T>;
    fn sub(self, rhs: Self) -> IndexedSet<T> {
        self.difference(rhs)
    }
}

impl<T: Keyed + Clone> BitXor for &IndexedSet<T> {
    type Output = IndexedSet<T>;
    fn bitxor(self, rhs: Self) -> IndexedSet<T> {
        self.symmetric_difference(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Thing(String, i32);

    impl Keyed for Thing {
        fn uid(&self) -> &str {
            &self.0
        }
    }

    #[test]
    fn duplicates_keep_first_occurrence() {
        let set = IndexedSet::from_iter_keep_first(vec![
            Thing("a".into(), 1),
            Thing("b".into(), 2),
            Thing("a".into(), 99),
        ]);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get_by_uid("a"), Some(&Thing("a".into(), 1)));
    }

    #[test]
    fn union_prefers_left_order_and_left_values() {
        let a = IndexedSet::from_iter_keep_first(vec![Thing("a".into(), 1), Thing("b".into(), 2)]);
        let b = IndexedSet::from_iter_keep_first(vec![Thing("b".into(), 99), Thing("c".into(), 3)]);
        let u = a.union(&b);
        let uids: Vec<&str> = u.iter().map(|t| t.uid()).collect();
        assert_eq!(uids, vec!["a", "b", "c"]);
        assert_eq!(u.get_by_uid("b"), Some(&Thing("b".into(), 2)));
    }

    #[test]
    fn difference_and_symmetric_difference() {
        let a = IndexedSet::from_iter_keep_first(vec![Thing("a".into(), 1), Thing("b".into(), 2)]);
        let b = IndexedSet::from_iter_keep_first(vec![Thing("b".into(), 2), Thing("c".into(), 3)]);
        assert_eq!((&a - &b).len(), 1);
        assert_eq!((&a ^ &b).len(), 2);
    }

    #[test]
    fn subset_ordering() {
        let a = IndexedSet::from_iter_keep_first(vec![Thing("a".into(), 1)]);
        let b = IndexedSet::from_iter_keep_first(vec![Thing("a".into(), 1), Thing("b".into(), 2)]);
        assert!(a < b);
        assert!(b > a);
    }

    #[test]
    fn one_returns_first_element_or_none() {
        let empty: IndexedSet<Thing> = IndexedSet::new();
        assert_eq!(empty.one(), None);

        let set = IndexedSet::from_iter_keep_first(vec![Thing("a".into(), 1), Thing("b".into(), 2)]);
        assert_eq!(set.one(), Some(&Thing("a".into(), 1)));
    }

    #[test]
    fn union_preserves_insertion_order_even_when_uids_sort_differently() {
        // Regression guard: uids are random, so union must not silently fall back to
        // lexicographic order just because it happens to agree with insertion order for
        // alphabetically-named test fixtures.
        let a = IndexedSet::from_iter_keep_first(vec![Thing("zeta".into(), 1), Thing("alpha".into(), 2)]);
        let b = IndexedSet::from_iter_keep_first(vec![Thing("alpha".into(), 99), Thing("mid".into(), 3)]);
        let u = a.union(&b);
        let uids: Vec<&str> = u.iter().map(|t| t.uid()).collect();
        assert_eq!(uids, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn symmetric_difference_preserves_left_then_right_order() {
        let a = IndexedSet::from_iter_keep_first(vec![Thing("zeta".into(), 1), Thing("alpha".into(), 2)]);
        let b = IndexedSet::from_iter_keep_first(vec![Thing("alpha".into(), 99), Thing("mid".into(), 3)]);
        let sd = a.symmetric_difference(&b);
        let uids: Vec<&str> = sd.iter().map(|t| t.uid()).collect();
        assert_eq!(uids, vec!["zeta", "mid"]);
    }

    #[test]
    fn append_moves_existing_item_to_end() {
        let mut set = IndexedSet::from_iter_keep_first(vec![Thing("a".into(), 1), Thing("b".into(), 2)]);
        set.append(Thing("a".into(), 42));
        let uids: Vec<&str> = set.iter().map(|t| t.uid()).collect();
        assert_eq!(uids, vec!["b", "a"]);
        assert_eq!(set.get_by_uid("a"), Some(&Thing("a".into(), 42)));
    }
}
