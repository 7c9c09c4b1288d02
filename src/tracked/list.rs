use std::{
    cmp::Ordering,
    fmt,
    ops::{Bound, RangeBounds},
};

use super::{impl_observed, Tracked};
use crate::Value;

/// A tracked sequence.
///
/// Read operations never notify. Elements and derived lists returned by read operations carry
/// every observer of this list, so mutating them marks the same variables dirty.
/// Every mutating operation notifies all observers once after the mutation is applied.
#[derive(Clone)]
pub struct List(pub(crate) Tracked<Vec<Value>>);

impl_observed!(List);

impl List {
    pub fn new() -> Self {
        Self::from_vec(Vec::new())
    }
    pub fn from_vec(items: Vec<Value>) -> Self {
        Self(Tracked::new(items))
    }

    fn derive(&self, items: Vec<Value>) -> Self {
        Self(self.0.derive(items))
    }
    fn snapshot(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    pub fn get(&self, index: usize) -> Option<Value> {
        let value = self.0.borrow().get(index).cloned()?;
        Some(self.0.adopt(value))
    }

    /// Like [`get`](Self::get), but negative indices count from the end.
    pub fn at(&self, index: i64) -> Option<Value> {
        let len = self.len() as i64;
        let index = if index < 0 { len + index } else { index };
        if index < 0 {
            return None;
        }
        self.get(index as usize)
    }
    pub fn first(&self) -> Option<Value> {
        self.get(0)
    }
    pub fn last(&self) -> Option<Value> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }
    pub fn contains(&self, value: &Value) -> bool {
        self.0.borrow().iter().any(|v| v == value)
    }
    pub fn position(&self, value: &Value) -> Option<usize> {
        self.0.borrow().iter().position(|v| v == value)
    }

    /// Iterates over tracked elements.
    pub fn iter(&self) -> std::vec::IntoIter<Value> {
        self.to_vec().into_iter()
    }
    pub fn to_vec(&self) -> Vec<Value> {
        let bindings = self.0.bindings();
        let items = self.snapshot();
        for item in &items {
            item.inherit(&bindings);
        }
        items
    }
    pub fn slice(&self, range: impl RangeBounds<usize>) -> List {
        let items = self.snapshot();
        let len = items.len();
        let start = match range.start_bound() {
            Bound::Included(&s) => s,
            Bound::Excluded(&s) => s + 1,
            Bound::Unbounded => 0,
        }
        .min(len);
        let end = match range.end_bound() {
            Bound::Included(&e) => e + 1,
            Bound::Excluded(&e) => e,
            Bound::Unbounded => len,
        }
        .clamp(start, len);
        self.derive(items[start..end].to_vec())
    }
    pub fn map(&self, f: impl FnMut(Value) -> Value) -> List {
        let items = self.to_vec().into_iter().map(f).collect();
        self.derive(items)
    }
    pub fn filter(&self, mut f: impl FnMut(&Value) -> bool) -> List {
        let items = self.to_vec().into_iter().filter(|v| f(v)).collect();
        self.derive(items)
    }
    pub fn find(&self, mut f: impl FnMut(&Value) -> bool) -> Option<Value> {
        self.to_vec().into_iter().find(|v| f(v))
    }
    /// Returns a reversed copy, leaving this list untouched.
    pub fn reversed(&self) -> List {
        let mut items = self.snapshot();
        items.reverse();
        self.derive(items)
    }
    /// Returns a sorted copy, leaving this list untouched.
    pub fn sorted(&self) -> List {
        let mut items = self.snapshot();
        items.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
        self.derive(items)
    }
    pub fn join(&self, separator: &str) -> String {
        let items = self.0.borrow();
        let texts: Vec<String> = items.iter().map(Value::to_text).collect();
        texts.join(separator)
    }

    pub fn push(&self, value: impl Into<Value>) {
        let value = value.into();
        self.0.mutate(|items| items.push(value));
    }
    pub fn pop(&self) -> Option<Value> {
        self.0.mutate(|items| items.pop())
    }
    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        let value = value.into();
        self.0.mutate(|items| {
            if index > items.len() {
                items.resize(index, Value::Nil);
            }
            items.insert(index, value);
        });
    }
    pub fn remove(&self, index: usize) -> Option<Value> {
        self.0
            .mutate(|items| (index < items.len()).then(|| items.remove(index)))
    }

    /// Assigns into `index`, padding with `nil` when `index` is past the end.
    pub fn set(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let value = value.into();
        self.0.mutate(|items| {
            if index >= items.len() {
                items.resize(index, Value::Nil);
                items.push(value);
                None
            } else {
                Some(std::mem::replace(&mut items[index], value))
            }
        })
    }
    pub fn clear(&self) {
        self.0.mutate(|items| items.clear());
    }
    pub fn truncate(&self, len: usize) {
        self.0.mutate(|items| items.truncate(len));
    }
    pub fn extend(&self, values: impl IntoIterator<Item = Value>) {
        let values: Vec<Value> = values.into_iter().collect();
        self.0.mutate(|items| items.extend(values));
    }
    pub fn concat(&self, other: &List) {
        self.extend(other.snapshot());
    }
    pub fn retain(&self, mut f: impl FnMut(&Value) -> bool) {
        let kept: Vec<Value> = self.snapshot().into_iter().filter(|v| f(v)).collect();
        self.0.mutate(|items| *items = kept);
    }
    pub fn sort(&self) {
        self.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
    }
    pub fn sort_by(&self, f: impl FnMut(&Value, &Value) -> Ordering) {
        let mut sorted = self.snapshot();
        sorted.sort_by(f);
        self.0.mutate(|items| *items = sorted);
    }
    pub fn reverse(&self) {
        self.0.mutate(|items| items.reverse());
    }
}
impl Default for List {
    fn default() -> Self {
        Self::new()
    }
}
impl fmt::Debug for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(items) => f.debug_list().entries(items.iter()).finish(),
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
impl<T: Into<Value>> FromIterator<T> for List {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::from_vec(iter.into_iter().map(Into::into).collect())
    }
}
