//! Error types for the shelf core.

use crate::{index::IndexKey, remote::RemoteError, store::WriteOp, Kind};
use thiserror::Error;

/// All possible errors from the shelf core.
#[derive(Debug, Error)]
pub enum Error {
    // Validation errors, raised before any remote call
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("malformed entity {key}: {reason}")]
    MalformedEntity { key: String, reason: String },

    // Remote errors
    #[error("remote {op} failed on batch {batch} ({size} items): {source}")]
    Remote {
        op: WriteOp,
        batch: usize,
        size: usize,
        #[source]
        source: RemoteError,
    },

    #[error("remote query on '{kind}' failed: {source}")]
    Query {
        kind: Kind,
        #[source]
        source: RemoteError,
    },

    // Index errors
    #[error("unique index '{index}' already maps key {key}")]
    KeyCollision { index: String, key: IndexKey },

    #[error("index not found: {0}")]
    IndexNotFound(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
