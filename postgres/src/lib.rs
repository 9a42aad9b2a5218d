//! PostgreSQL remote store for shelf.
//!
//! Entities of every kind live in one `entities` table as JSONB
//! documents. [`PgRemoteStore`] implements [`shelf_core::RemoteStore`], so
//! any [`shelf_core::RecordStore`] or [`shelf_core::IndexedCollection`]
//! can persist through it.
//!
//! ```no_run
//! use shelf_core::{IndexedCollection, UniqueIndex};
//! use shelf_postgres::{ensure_initialized, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let remote = ensure_initialized(&config).await?;
//! remote.migrate().await?;
//!
//! let mut users = IndexedCollection::new(
//!     config.record_store("users", remote),
//!     UniqueIndex::on(["email"]),
//! );
//! users.load().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod store;

pub use config::{Config, ConfigError};
pub use error::{Result, StoreError};
pub use store::{ensure_initialized, PgRemoteStore};
