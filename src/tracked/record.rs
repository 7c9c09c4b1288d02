use std::fmt;

use indexmap::IndexMap;

use super::{impl_observed, Tracked};
use crate::{tracked::Map, Error, Result, Value};

/// A tracked record with a fixed set of named fields.
#[derive(Clone)]
pub struct Record(pub(crate) Tracked<RecordData>);

pub(crate) struct RecordData {
    pub(crate) name: String,
    pub(crate) fields: IndexMap<String, Value>,
}

impl_observed!(Record);

impl Record {
    pub fn new<K, V>(name: impl Into<String>, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self(Tracked::new(RecordData {
            name: name.into(),
            fields: fields
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }))
    }

    pub fn type_name(&self) -> String {
        self.0.borrow().name.clone()
    }
    pub fn field_names(&self) -> Vec<String> {
        self.0.borrow().fields.keys().cloned().collect()
    }
    pub fn has_field(&self, field: &str) -> bool {
        self.0.borrow().fields.contains_key(field)
    }
    pub fn get(&self, field: &str) -> Option<Value> {
        let value = self.0.borrow().fields.get(field).cloned()?;
        Some(self.0.adopt(value))
    }

    /// Assigns a field and returns its previous value.
    ///
    /// Assigning a field the record does not have fails without notifying.
    pub fn set(&self, field: &str, value: impl Into<Value>) -> Result<Value> {
        if !self.has_field(field) {
            return Err(Error::UnknownField {
                record: self.type_name(),
                field: field.to_string(),
            });
        }
        let value = value.into();
        Ok(self.0.mutate(|data| {
            data.fields
                .get_mut(field)
                .map(|slot| std::mem::replace(slot, value))
                .unwrap_or_default()
        }))
    }

    /// Copies the fields into a map that carries this record's observers.
    pub fn to_map(&self) -> Map {
        let fields = self.0.borrow().fields.clone();
        Map(self.0.derive(fields))
    }
}
impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(data) => {
                let mut s = f.debug_struct(&data.name);
                for (k, v) in &data.fields {
                    s.field(k, v);
                }
                s.finish()
            }
            Err(_) => write!(f, "<borrowed>"),
        }
    }
}
