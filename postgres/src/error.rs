//! Unified error handling for the PostgreSQL store.

use crate::config::ConfigError;
use shelf_core::RemoteError;

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed key name: {0}")]
    MalformedKey(String),

    #[error("Entity not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for RemoteError {
    fn from(err: StoreError) -> Self {
        if let StoreError::Database(e) = &err {
            tracing::error!("Database error: {:?}", e);
        }
        RemoteError::with_source(err.to_string(), err)
    }
}

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
