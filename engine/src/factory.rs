//! Record factories: turning raw entities into records.

use crate::{error::Result, remote::Entity, Error, Fields, Record};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;

/// Capability to build a [`Record`] from a raw entity.
pub trait RecordFactory: Send + Sync {
    /// Kind this factory builds records for. `None` accepts any kind.
    fn kind(&self) -> Option<&str> {
        None
    }

    /// Build a record from an entity fetched from the remote store.
    fn build(&self, entity: Entity) -> Result<Record>;
}

/// Check that `factory` may build records for `kind`.
pub fn validate_factory(kind: &str, factory: &dyn RecordFactory) -> Result<()> {
    match factory.kind() {
        Some(declared) if declared != kind => Err(Error::Validation(format!(
            "factory builds records of kind '{}', not '{}'",
            declared, kind
        ))),
        _ => Ok(()),
    }
}

/// Wraps entities verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainFactory;

impl RecordFactory for PlainFactory {
    fn build(&self, entity: Entity) -> Result<Record> {
        Ok(Record::from_entity(entity))
    }
}

/// Normalises entity data through a typed model `T`.
///
/// Entities that do not deserialize into `T` are rejected, and fields
/// are rewritten to `T`'s serialized form (defaults filled in, unknown
/// fields dropped unless `T` keeps them).
pub struct TypedFactory<T> {
    kind: Option<String>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> TypedFactory<T> {
    /// A factory usable with any kind.
    pub fn new() -> Self {
        Self {
            kind: None,
            _marker: PhantomData,
        }
    }

    /// A factory bound to one kind.
    pub fn for_kind(kind: impl Into<String>) -> Self {
        Self {
            kind: Some(kind.into()),
            _marker: PhantomData,
        }
    }
}

impl<T> Default for TypedFactory<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordFactory for TypedFactory<T>
where
    T: Serialize + DeserializeOwned,
{
    fn kind(&self) -> Option<&str> {
        self.kind.as_deref()
    }

    fn build(&self, entity: Entity) -> Result<Record> {
        let malformed = |reason: String| Error::MalformedEntity {
            key: entity.key.to_string(),
            reason,
        };

        let model: T = serde_json::from_value(serde_json::Value::Object(entity.data.clone()))
            .map_err(|e| malformed(e.to_string()))?;
        let fields: Fields = match serde_json::to_value(&model) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => return Err(malformed("model does not serialize to an object".into())),
            Err(e) => return Err(malformed(e.to_string())),
        };

        Ok(Record::from_parts(
            Some(entity.key),
            fields.clone(),
            Some(fields),
        ))
    }
}
