//! The boundary to the remote document store.
//!
//! Everything network-shaped (connections, retries, pagination, wire
//! encoding) lives behind [`RemoteStore`]. The core only hands it
//! queries, bulk writes and keys.

use crate::{query::RemoteQuery, Fields, Key};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt;
use std::sync::Arc;

/// A raw entity as stored remotely.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub key: Key,
    pub data: Fields,
}

impl Entity {
    pub fn new(key: Key, data: Fields) -> Self {
        Self { key, data }
    }
}

/// Stream of entities produced by a remote query.
pub type EntityStream = BoxStream<'static, Result<Entity, RemoteError>>;

/// Shared handle to a remote store.
pub type RemoteHandle = Arc<dyn RemoteStore>;

/// A failure reported by the remote store.
#[derive(Debug)]
pub struct RemoteError {
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for RemoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Remote document store consumed by [`RecordStore`](crate::RecordStore).
///
/// Bulk writes receive entities whose keys may be incomplete; they return
/// the complete key of every entity, in input order. Implementations are
/// expected to make `upsert` and `delete` idempotent, since a failed
/// `save` resends the same candidates.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Open a fresh query. Each call must be independent of earlier ones.
    async fn run_query(&self, query: RemoteQuery) -> Result<EntityStream, RemoteError>;

    /// Insert new entities; fails if any key already exists.
    async fn insert(&self, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError>;

    /// Update existing entities; fails if any key is missing.
    async fn update(&self, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError>;

    /// Insert or replace entities.
    async fn upsert(&self, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError>;

    /// Delete entities by key. Missing keys are not an error.
    async fn delete(&self, keys: Vec<Key>) -> Result<(), RemoteError>;
}
