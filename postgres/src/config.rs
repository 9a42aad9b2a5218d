//! Configuration management for the PostgreSQL store.

use shelf_core::{RecordStore, RemoteHandle, MAX_BATCH_SIZE};
use std::env;

/// Store configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection URL
    pub database_url: String,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// Entities per bulk call, capped at [`MAX_BATCH_SIZE`]
    pub batch_size: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let database_url = lookup("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let max_connections = lookup("SHELF_MAX_CONNECTIONS")
            .unwrap_or_else(|| "10".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidMaxConnections)?;

        let batch_size: usize = match lookup("SHELF_BATCH_SIZE") {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidBatchSize)?,
            None => MAX_BATCH_SIZE,
        };
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize);
        }

        Ok(Self {
            database_url,
            max_connections,
            batch_size: batch_size.min(MAX_BATCH_SIZE),
        })
    }

    /// A record store for `kind` using the configured batch size.
    pub fn record_store(&self, kind: &str, remote: RemoteHandle) -> RecordStore {
        RecordStore::new(kind, remote).with_batch_size(self.batch_size)
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid SHELF_MAX_CONNECTIONS value")]
    InvalidMaxConnections,

    #[error("Invalid SHELF_BATCH_SIZE value")]
    InvalidBatchSize,
}
