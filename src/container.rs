use std::{cell::RefCell, collections::BTreeSet, fmt, rc::Rc, sync::Arc};

use indexmap::IndexMap;

use crate::{tracked::Observer, Error, Result, Value};

#[cfg(test)]
mod tests;

/// Names marked dirty since the last reset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset(BTreeSet<String>);

impl Changeset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `name` was not already dirty.
    pub fn insert(&mut self, name: &str) -> bool {
        if self.0.contains(name) {
            return false;
        }
        self.0.insert(name.to_string())
    }
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn clear(&mut self) {
        self.0.clear();
    }
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.0.iter().map(|s| s.as_str())
    }
    pub fn union(&mut self, other: &Changeset) {
        self.0.extend(other.0.iter().cloned());
    }
    pub fn intersects<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().any(|name| self.0.contains(name))
    }
}
impl<'a> FromIterator<&'a str> for Changeset {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        Self(iter.into_iter().map(str::to_string).collect())
    }
}

/// The component a default factory computes a value for.
#[derive(Debug, Clone, Copy)]
pub struct Owner<'a> {
    pub id: &'a str,
    pub class: &'a str,
}

/// How a reactive variable obtains its value before the first assignment.
#[derive(Clone, Default)]
pub enum VarDefault {
    /// Starts as `nil`.
    #[default]
    Absent,
    /// A raw literal. Only scalars are accepted: a composite literal would be shared by every
    /// instance, so it fails with [`Error::InvalidDefaultFactory`].
    Literal(serde_json::Value),
    Factory(Arc<dyn Fn() -> Value + Send + Sync>),
    WithOwner(Arc<dyn Fn(Owner) -> Value + Send + Sync>),
}

impl VarDefault {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        VarDefault::Literal(value.into())
    }
    pub fn factory(f: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        VarDefault::Factory(Arc::new(f))
    }
    pub fn with_owner(f: impl Fn(Owner) -> Value + Send + Sync + 'static) -> Self {
        VarDefault::WithOwner(Arc::new(f))
    }

    fn compute(&self, name: &str, owner: Owner) -> Result<Value> {
        match self {
            VarDefault::Absent => Ok(Value::Nil),
            VarDefault::Literal(raw) if raw.is_array() || raw.is_object() => {
                Err(Error::InvalidDefaultFactory {
                    name: name.to_string(),
                })
            }
            VarDefault::Literal(raw) => Ok(Value::from_json(raw.clone())),
            VarDefault::Factory(f) => Ok(f()),
            VarDefault::WithOwner(f) => Ok(f(owner)),
        }
    }
}
impl fmt::Debug for VarDefault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VarDefault::Absent => write!(f, "Absent"),
            VarDefault::Literal(raw) => write!(f, "Literal({raw})"),
            VarDefault::Factory(_) => write!(f, "Factory(..)"),
            VarDefault::WithOwner(_) => write!(f, "WithOwner(..)"),
        }
    }
}

/// Reactive variables of one scope together with the names changed in the current cycle.
///
/// Each variable name has its own [`Observer`], attached to the composite value stored under it,
/// so mutating such a value through any handle marks the variable dirty here. Replacing a value
/// retires the name's observer, which silences every handle read out of the old value.
pub struct Container {
    values: IndexMap<String, Value>,
    changeset: Rc<RefCell<Changeset>>,
    observers: IndexMap<String, Observer>,
}

impl Container {
    pub fn new() -> Self {
        Self {
            values: IndexMap::new(),
            changeset: Rc::new(RefCell::new(Changeset::new())),
            observers: IndexMap::new(),
        }
    }

    /// Returns the observer currently issued for `name`, issuing one if needed.
    pub fn observer(&mut self, name: &str) -> Observer {
        let changeset = &self.changeset;
        self.observers
            .entry(name.to_string())
            .or_insert_with(|| Observer::new(changeset))
            .clone()
    }

    fn retire_observer(&mut self, name: &str) -> Option<Observer> {
        let observer = self.observers.shift_remove(name)?;
        observer.retire();
        Some(observer)
    }

    /// Returns the stored value, computing and caching `default` on first access.
    ///
    /// Computing a default does not mark the variable dirty.
    pub fn get(&mut self, name: &str, default: &VarDefault, owner: Owner) -> Result<Value> {
        if let Some(value) = self.values.get(name) {
            return Ok(value.clone());
        }
        let value = default.compute(name, owner)?;
        value.add_observer(&self.observer(name), name);
        self.values.insert(name.to_string(), value.clone());
        Ok(value)
    }

    /// Returns the stored value without computing a default.
    pub fn peek(&self, name: &str) -> Option<Value> {
        self.values.get(name).cloned()
    }
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.values.keys().map(|k| k.as_str())
    }

    /// Stores `value` under `name` and marks it dirty.
    ///
    /// A value that is already tracked keeps its other observers; this container's observer is
    /// merged in rather than wrapping it again.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let replaced = self.values.get(name).filter(|old| !old.ptr_eq(&value)).cloned();
        if let Some(old) = replaced {
            if let Some(observer) = self.retire_observer(name) {
                old.remove_binding(&observer, name);
            }
        }
        value.add_observer(&self.observer(name), name);
        self.values.insert(name.to_string(), value);
        self.mark_dirty([name]);
    }

    pub fn mark_dirty<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let mut changeset = self.changeset.borrow_mut();
        for name in names {
            changeset.insert(name);
        }
    }
    pub fn is_changed(&self) -> bool {
        !self.changeset.borrow().is_empty()
    }
    pub fn changeset(&self) -> Changeset {
        self.changeset.borrow().clone()
    }
    pub fn reset_changeset(&self) {
        self.changeset.borrow_mut().clear();
    }

    /// Detaches this container's observers from every stored value, then clears entries and the
    /// changeset.
    ///
    /// Observers of other containers watching the same values stay attached.
    pub fn cleanup(&mut self) {
        for value in self.values.values() {
            for observer in self.observers.values() {
                value.remove_observer(observer);
            }
        }
        for (_, observer) in self.observers.drain(..) {
            observer.retire();
        }
        self.values.clear();
        self.reset_changeset();
    }
}
impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}
impl Drop for Container {
    fn drop(&mut self) {
        if !self.values.is_empty() {
            self.cleanup();
        }
    }
}
impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("values", &self.values)
            .field("changeset", &*self.changeset.borrow())
            .finish()
    }
}
