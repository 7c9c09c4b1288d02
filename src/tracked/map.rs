use std::fmt;

use indexmap::IndexMap;

use super::{impl_observed, Tracked};
use crate::Value;

/// A tracked associative map with insertion order.
///
/// Values returned by read operations carry every observer of this map.
#[derive(Clone)]
pub struct Map(pub(crate) Tracked<IndexMap<String, Value>>);

impl_observed!(Map);

impl Map {
    pub fn new() -> Self {
        Self::from_index_map(IndexMap::new())
    }
    pub fn from_index_map(entries: IndexMap<String, Value>) -> Self {
        Self(Tracked::new(entries))
    }

    fn snapshot(&self) -> IndexMap<String, Value> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, key: &str) -> Option<Value> {
        let value = self.0.borrow().get(key).cloned()?;
        Some(self.0.adopt(value))
    }
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }
    pub fn values(&self) -> Vec<Value> {
        self.entries().into_iter().map(|(_, v)| v).collect()
    }

    /// Iterates over entries, with tracked values.
    pub fn iter(&self) -> std::vec::IntoIter<(String, Value)> {
        self.entries().into_iter()
    }
    fn entries(&self) -> Vec<(String, Value)> {
        let bindings = self.0.bindings();
        self.snapshot()
            .into_iter()
            .map(|(k, v)| {
                v.inherit(&bindings);
                (k, v)
            })
            .collect()
    }

    /// Returns a map of the entries for which `f` returns `true`.
    pub fn select(&self, mut f: impl FnMut(&str, &Value) -> bool) -> Map {
        let entries = self
            .entries()
            .into_iter()
            .filter(|(k, v)| f(k, v))
            .collect();
        Map(self.0.derive(entries))
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let key = key.into();
        let value = value.into();
        self.0.mutate(|entries| entries.insert(key, value))
    }
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.mutate(|entries| entries.shift_remove(key))
    }
    pub fn clear(&self) {
        self.0.mutate(|entries| entries.clear());
    }

    /// Inserts every entry of `other`, overwriting existing keys.
    pub fn merge(&self, other: &Map) {
        self.extend(other.snapshot());
    }
    pub fn extend(&self, entries: impl IntoIterator<Item = (String, Value)>) {
        let entries: Vec<(String, Value)> = entries.into_iter().collect();
        self.0.mutate(|this| this.extend(entries));
    }
    pub fn retain(&self, mut f: impl FnMut(&str, &Value) -> bool) {
        let kept: IndexMap<String, Value> =
            self.snapshot().into_iter().filter(|(k, v)| f(k, v)).collect();
        self.0.mutate(|entries| *entries = kept);
    }
    pub fn sort_keys(&self) {
        self.0.mutate(|entries| entries.sort_keys());
    }
}
impl Default for Map {
    fn default() -> Self {
        Self::new()
    }
}
impl fmt::Debug for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(entries) => f.debug_map().entries(entries.iter()).finish(),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Map {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::from_index_map(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
