//! Change-tracked records.

use crate::{remote::Entity, Fields, Key};
use serde::Serialize;
use serde_json::Value;

/// One entity's fields plus the bookkeeping needed to detect changes.
///
/// The identity key and the last persisted snapshot are kept outside the
/// field map: they never show up in [`Record::fields`], in serialization,
/// or in equality.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Record {
    #[serde(skip)]
    key: Option<Key>,
    fields: Fields,
    #[serde(skip)]
    previous: Option<Fields>,
}

impl Record {
    /// A new record that has never been persisted.
    pub fn new(fields: Fields) -> Self {
        Self {
            key: None,
            fields,
            previous: None,
        }
    }

    /// A new record with a caller-chosen identity key.
    pub fn with_key(key: Key, fields: Fields) -> Self {
        Self {
            key: Some(key),
            fields,
            previous: None,
        }
    }

    /// A record as loaded from the remote store; its snapshot equals its fields.
    pub fn from_entity(entity: Entity) -> Self {
        let previous = entity.data.clone();
        Self::from_parts(Some(entity.key), entity.data, Some(previous))
    }

    /// Assemble a record from its raw parts.
    pub fn from_parts(key: Option<Key>, fields: Fields, previous: Option<Fields>) -> Self {
        Self {
            key,
            fields,
            previous,
        }
    }

    /// The identity key, if one has been assigned.
    pub fn key(&self) -> Option<&Key> {
        self.key.as_ref()
    }

    /// Plain field view.
    pub fn fields(&self) -> &Fields {
        &self.fields
    }

    /// Get a single field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Set a single field, returning the old value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Remove a field, returning the old value.
    pub fn remove(&mut self, name: &str) -> Option<Value> {
        self.fields.remove(name)
    }

    /// Merge every field of `partial` into this record.
    pub fn merge(&mut self, partial: Fields) {
        for (name, value) in partial {
            self.fields.insert(name, value);
        }
    }

    /// Consume the record, keeping only its fields.
    pub fn into_fields(self) -> Fields {
        self.fields
    }

    /// Whether the fields differ from the last persisted snapshot.
    ///
    /// Records that were never persisted always count as changed.
    pub fn changed(&self) -> bool {
        self.previous.as_ref() != Some(&self.fields)
    }

    /// The last persisted snapshot, if any.
    pub fn previous(&self) -> Option<&Fields> {
        self.previous.as_ref()
    }

    /// Record the key allocated by the remote store.
    ///
    /// An already assigned key is never replaced.
    pub(crate) fn assign_key(&mut self, key: Key) {
        if self.key.as_ref().map_or(true, |k| !k.is_complete()) {
            self.key = Some(key);
        }
    }

    /// Mark the current fields as persisted.
    pub(crate) fn commit(&mut self) {
        self.previous = Some(self.fields.clone());
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.fields == other.fields
    }
}

impl From<Fields> for Record {
    fn from(fields: Fields) -> Self {
        Record::new(fields)
    }
}

/// Build a [`Fields`] map from a JSON object literal.
///
/// Non-object values yield an empty map.
pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}
