//! # Shelf Core
//!
//! An in-memory data-management layer in front of a remote document store.
//!
//! The crate keeps a local, indexed copy of one kind of entity, tracks
//! which records changed since they were last persisted, and writes the
//! changes back as size-bounded bulk operations.
//!
//! ## Design Principles
//!
//! - **No IO of its own**: all remote access goes through the [`RemoteStore`] trait
//! - **Explicit bookkeeping**: identity keys and persisted snapshots live beside
//!   the fields, never inside them
//! - **Fail fast, retry safely**: validation happens before any remote call, and a
//!   failed save leaves its queues intact for the next attempt
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! A [`Record`] is a JSON field map plus an optional identity [`Key`] and the
//! snapshot of its fields as last persisted. [`Record::changed`] compares the two.
//!
//! ### Record stores
//!
//! A [`RecordStore`] is the CRUD facade over one kind:
//! - [`RecordStore::fetch`] / [`RecordStore::select`] - stream or collect records
//! - [`RecordStore::insert`], [`RecordStore::update`], [`RecordStore::upsert`] -
//!   batched writes, at most [`MAX_BATCH_SIZE`] entities per remote call
//! - [`RecordStore::delete`] - batched deletes of keyed records
//!
//! ### Indexed collections
//!
//! An [`IndexedCollection`] mirrors a record store in memory behind a main
//! [`UniqueIndex`] and any number of secondary [`Index`]es. Local edits are
//! queued and pushed by [`IndexedCollection::save`].
//!
//! ## Quick Start
//!
//! ```rust
//! use shelf_core::{fields, Index, IndexedCollection, MemoryStore, RecordStore, UniqueIndex};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # tokio_test();
//! # fn tokio_test() {
//! # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! # rt.block_on(async {
//! let remote = Arc::new(MemoryStore::new());
//! let store = RecordStore::new("users", remote.clone());
//!
//! let mut users = IndexedCollection::new(store, UniqueIndex::on(["id"]))
//!     .with_index("by_team", Index::on(["team"]));
//!
//! users.set(fields(json!({"id": 1, "name": "Alice", "team": "core"}))).unwrap();
//! users.set(fields(json!({"id": 2, "name": "Bob", "team": "core"}))).unwrap();
//! users.save().await.unwrap();
//!
//! users.load().await.unwrap();
//! let core = users.find("by_team", &fields(json!({"team": "core"}))).unwrap();
//! assert_eq!(core.len(), 2);
//! # });
//! # }
//! ```

pub mod collection;
pub mod error;
pub mod factory;
pub mod index;
pub mod key;
pub mod memory;
pub mod query;
pub mod record;
pub mod remote;
pub mod store;

// Re-export main types at crate root
pub use collection::{IndexedCollection, RecordOrder, SaveSummary, MAIN_INDEX};
pub use error::Error;
pub use factory::{PlainFactory, RecordFactory, TypedFactory};
pub use index::{CollisionPolicy, Index, IndexKey, RowId, UniqueIndex};
pub use key::{Key, KeyId};
pub use memory::MemoryStore;
pub use query::{Direction, Filter, Operator, Order, QueryOptions, RemoteQuery};
pub use record::{fields, Record};
pub use remote::{Entity, EntityStream, RemoteError, RemoteHandle, RemoteStore};
pub use store::{RecordStore, RecordStream, WriteOp, MAX_BATCH_SIZE};

/// Type aliases for clarity
pub type Kind = String;
pub type Fields = serde_json::Map<String, serde_json::Value>;
