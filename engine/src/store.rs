//! RecordStore - CRUD facade over one kind of the remote store.
//!
//! Reads stream remote entities through a [`RecordFactory`]. Writes are
//! split into batches of at most [`MAX_BATCH_SIZE`] entities and sent one
//! batch at a time; batches that landed before a failure stay committed.

use crate::{
    error::Result,
    factory::{validate_factory, PlainFactory, RecordFactory},
    query::QueryOptions,
    remote::{Entity, RemoteHandle},
    Error, Key, Kind, Record,
};
use futures::{future, stream, stream::BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Largest number of entities sent in one remote bulk call.
pub const MAX_BATCH_SIZE: usize = 400;

/// Stream of records produced by [`RecordStore::fetch`].
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Kind of bulk write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    Insert,
    Update,
    Upsert,
    Delete,
}

impl WriteOp {
    fn verb(&self) -> &'static str {
        match self {
            WriteOp::Insert => "inserted",
            WriteOp::Update => "updated",
            WriteOp::Upsert => "upserted",
            WriteOp::Delete => "deleted",
        }
    }
}

impl fmt::Display for WriteOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteOp::Insert => "insert",
            WriteOp::Update => "update",
            WriteOp::Upsert => "upsert",
            WriteOp::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// Bulk writes that send whole entities.
#[derive(Debug, Clone, Copy)]
enum Write {
    Insert,
    Update,
    Upsert,
}

impl From<Write> for WriteOp {
    fn from(write: Write) -> Self {
        match write {
            Write::Insert => WriteOp::Insert,
            Write::Update => WriteOp::Update,
            Write::Upsert => WriteOp::Upsert,
        }
    }
}

/// CRUD access to all entities of one kind.
#[derive(Clone)]
pub struct RecordStore {
    kind: Kind,
    remote: RemoteHandle,
    factory: Arc<dyn RecordFactory>,
    batch_size: usize,
}

impl RecordStore {
    /// Create a store for `kind` using the plain factory.
    pub fn new(kind: impl Into<Kind>, remote: RemoteHandle) -> Self {
        Self {
            kind: kind.into(),
            remote,
            factory: Arc::new(PlainFactory),
            batch_size: MAX_BATCH_SIZE,
        }
    }

    /// Register the factory used to build fetched records.
    ///
    /// Fails if the factory is bound to another kind.
    pub fn with_factory(mut self, factory: Arc<dyn RecordFactory>) -> Result<Self> {
        validate_factory(&self.kind, factory.as_ref())?;
        self.factory = factory;
        Ok(self)
    }

    /// Lower the batch size. Values above [`MAX_BATCH_SIZE`] are capped.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(1, MAX_BATCH_SIZE);
        self
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn remote(&self) -> &RemoteHandle {
        &self.remote
    }

    /// Stream records matching `options`.
    ///
    /// The factory is validated here, before any remote call. The remote
    /// query itself is opened lazily on first poll; every call to `fetch`
    /// opens a new one.
    pub fn fetch(&self, options: QueryOptions) -> Result<RecordStream> {
        let factory = match &options.factory {
            Some(factory) => {
                validate_factory(&self.kind, factory.as_ref())?;
                factory.clone()
            }
            None => self.factory.clone(),
        };

        let query = options.to_remote(&self.kind);
        let remote = self.remote.clone();

        let entities = stream::once(async move {
            let kind = query.kind.clone();
            remote
                .run_query(query)
                .await
                .map(|entities| {
                    let kind = kind.clone();
                    entities.map_err(move |source| Error::Query {
                        kind: kind.clone(),
                        source,
                    })
                })
                .map_err(|source| Error::Query { kind, source })
        })
        .try_flatten();

        tracing::trace!(kind = %self.kind, "query prepared");
        Ok(entities
            .and_then(move |entity| future::ready(factory.build(entity)))
            .boxed())
    }

    /// Fetch and collect every matching record.
    pub async fn select(&self, options: QueryOptions) -> Result<Vec<Record>> {
        let records: Vec<Record> = self.fetch(options)?.try_collect().await?;
        tracing::debug!(kind = %self.kind, count = records.len(), "records loaded");
        Ok(records)
    }

    /// Insert every record. Keys allocated remotely are written back.
    pub async fn insert<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a mut Record>,
    {
        self.write(Write::Insert, records.into_iter().collect())
            .await
    }

    /// Update every changed record. Unchanged records are skipped.
    pub async fn update<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a mut Record>,
    {
        self.write(Write::Update, changed_only(records)).await
    }

    /// Insert or replace every changed record. Unchanged records are skipped.
    pub async fn upsert<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a mut Record>,
    {
        self.write(Write::Upsert, changed_only(records)).await
    }

    /// Delete every record that carries a complete key; others are ignored.
    pub async fn delete<'a, I>(&self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'a Record>,
    {
        self.delete_keys(records.into_iter().filter_map(|r| r.key().cloned()))
            .await
    }

    /// Delete entities by key; incomplete keys are ignored.
    pub async fn delete_keys<I>(&self, keys: I) -> Result<usize>
    where
        I: IntoIterator<Item = Key>,
    {
        let keys: Vec<Key> = keys.into_iter().filter(Key::is_complete).collect();
        let total = keys.len();

        for (batch, keys) in into_batches(keys, self.batch_size).into_iter().enumerate() {
            let size = keys.len();
            self.remote
                .delete(keys)
                .await
                .map_err(|source| Error::Remote {
                    op: WriteOp::Delete,
                    batch,
                    size,
                    source,
                })?;
            tracing::debug!(kind = %self.kind, batch, size, "records deleted");
        }

        Ok(total)
    }

    async fn write(&self, write: Write, mut records: Vec<&mut Record>) -> Result<usize> {
        let op = WriteOp::from(write);
        let total = records.len();

        for (batch, chunk) in records.chunks_mut(self.batch_size).enumerate() {
            let size = chunk.len();
            let entities: Vec<Entity> = chunk
                .iter()
                .map(|record| {
                    let key = record
                        .key()
                        .cloned()
                        .unwrap_or_else(|| Key::incomplete(self.kind.clone()));
                    Entity::new(key, record.fields().clone())
                })
                .collect();

            let sent = match write {
                Write::Insert => self.remote.insert(entities).await,
                Write::Update => self.remote.update(entities).await,
                Write::Upsert => self.remote.upsert(entities).await,
            };
            let keys = sent.map_err(|source| Error::Remote {
                op,
                batch,
                size,
                source,
            })?;

            for (record, key) in chunk.iter_mut().zip(keys) {
                record.assign_key(key);
            }
            tracing::debug!(kind = %self.kind, batch, size, "records {}", op.verb());
        }

        for record in records.iter_mut() {
            record.commit();
        }
        Ok(total)
    }
}

impl fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("kind", &self.kind)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

fn changed_only<'a, I>(records: I) -> Vec<&'a mut Record>
where
    I: IntoIterator<Item = &'a mut Record>,
{
    records.into_iter().filter(|r| r.changed()).collect()
}

/// Split `items` into consecutive batches of at most `size`, keeping order.
pub fn into_batches<T>(items: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let size = size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(size));
    let mut iter = items.into_iter().peekable();
    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(size).collect());
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        factory::TypedFactory,
        memory::MemoryStore,
        query::{Direction, Operator},
        record::fields,
    };
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::json;

    fn users(remote: &Arc<MemoryStore>) -> RecordStore {
        RecordStore::new("users", remote.clone())
    }

    fn new_records(n: usize) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(fields(json!({"n": i}))))
            .collect()
    }

    #[tokio::test]
    async fn insert_assigns_keys_and_commits() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        let mut records = new_records(3);

        let written = store.insert(&mut records).await.unwrap();

        assert_eq!(written, 3);
        for record in &records {
            let key = record.key().expect("key assigned");
            assert!(key.is_complete());
            assert_eq!(key.kind, "users");
            assert!(!record.changed());
        }
        assert_eq!(remote.len("users"), 3);
    }

    #[tokio::test]
    async fn writes_are_batched_in_order() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        let mut records = new_records(1001);

        store.upsert(&mut records).await.unwrap();

        assert_eq!(
            remote.write_sizes(WriteOp::Upsert),
            vec![400, 400, 201],
            "ceil(1001 / 400) calls"
        );
        let loaded = store
            .select(QueryOptions::new().order("n", Direction::Ascending))
            .await
            .unwrap();
        assert_eq!(loaded.len(), 1001);
        assert_eq!(loaded[1000].get("n"), Some(&json!(1000)));
    }

    #[tokio::test]
    async fn smaller_batch_size() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote).with_batch_size(2);
        let mut records = new_records(5);

        store.insert(&mut records).await.unwrap();

        assert_eq!(remote.write_sizes(WriteOp::Insert), vec![2, 2, 1]);
        assert_eq!(users(&remote).with_batch_size(10_000).batch_size(), MAX_BATCH_SIZE);
        assert_eq!(users(&remote).with_batch_size(0).batch_size(), 1);
    }

    #[tokio::test]
    async fn upsert_skips_unchanged() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        let mut records = new_records(3);
        store.insert(&mut records).await.unwrap();

        records[1].set("n", 100);
        let written = store.upsert(&mut records).await.unwrap();

        assert_eq!(written, 1);
        assert_eq!(remote.write_sizes(WriteOp::Upsert), vec![1]);

        let written = store.update(&mut records).await.unwrap();
        assert_eq!(written, 0);
        assert!(remote.write_sizes(WriteOp::Update).is_empty());
    }

    #[tokio::test]
    async fn failure_reports_batch_and_keeps_prefix() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote).with_batch_size(2);
        let mut records = new_records(5);
        remote.fail_writes_after(1);

        let err = store.upsert(&mut records).await.unwrap_err();

        match err {
            Error::Remote { op, batch, size, .. } => {
                assert_eq!(op, WriteOp::Upsert);
                assert_eq!(batch, 1);
                assert_eq!(size, 2);
            }
            other => panic!("expected remote error, got {:?}", other),
        }
        assert_eq!(remote.len("users"), 2, "first batch stays committed");
        assert!(records[0].key().is_some());
        assert!(records[2].key().is_none());
        assert!(records.iter().all(Record::changed), "snapshots refresh on success only");
    }

    #[tokio::test]
    async fn failures_name_the_write() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        let mut records = new_records(1);
        store.insert(&mut records).await.unwrap();
        records[0].set("n", 5);
        remote.fail_writes_after(0);

        let insert = store.insert(&mut new_records(1)).await.unwrap_err();
        let update = store.update(&mut records).await.unwrap_err();
        let upsert = store.upsert(&mut records).await.unwrap_err();

        assert!(matches!(insert, Error::Remote { op: WriteOp::Insert, .. }));
        assert!(matches!(update, Error::Remote { op: WriteOp::Update, .. }));
        assert!(matches!(upsert, Error::Remote { op: WriteOp::Upsert, .. }));
    }

    #[tokio::test]
    async fn delete_ignores_keyless_records() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        let mut records = new_records(2);
        store.insert(&mut records).await.unwrap();
        records.push(Record::new(fields(json!({"n": 9}))));

        let deleted = store.delete(&records).await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(remote.len("users"), 0);
        assert_eq!(remote.write_sizes(WriteOp::Delete), vec![2]);
    }

    #[tokio::test]
    async fn delete_without_keys_makes_no_call() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);

        let deleted = store
            .delete(&[Record::new(fields(json!({"n": 1})))])
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert!(remote.write_sizes(WriteOp::Delete).is_empty());
    }

    #[tokio::test]
    async fn fetch_filters_and_orders() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        let mut records: Vec<Record> = [("a", 30), ("b", 17), ("c", 42)]
            .iter()
            .map(|(name, age)| Record::new(fields(json!({"name": name, "age": age}))))
            .collect();
        store.insert(&mut records).await.unwrap();

        let adults = store
            .select(
                QueryOptions::new()
                    .filter("age", Operator::Ge, 18)
                    .order("age", Direction::Descending),
            )
            .await
            .unwrap();

        let names: Vec<_> = adults.iter().map(|r| r.get("name").unwrap()).collect();
        assert_eq!(names, vec![&json!("c"), &json!("a")]);
        assert!(adults.iter().all(|r| !r.changed()));
    }

    #[tokio::test]
    async fn fetch_is_restartable() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);
        store.insert(&mut new_records(2)).await.unwrap();

        let first: Vec<Record> = store
            .fetch(QueryOptions::new())
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        let second: Vec<Record> = store
            .fetch(QueryOptions::new())
            .unwrap()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(first, second);
        assert_eq!(remote.query_count(), 2);
    }

    #[tokio::test]
    async fn fetch_opens_query_lazily() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);

        let stream = store.fetch(QueryOptions::new()).unwrap();
        assert_eq!(remote.query_count(), 0);
        drop(stream);
        assert_eq!(remote.query_count(), 0);
    }

    #[derive(Serialize, Deserialize)]
    struct Team {
        name: String,
    }

    #[tokio::test]
    async fn fetch_rejects_foreign_factory_before_remote() {
        let remote = Arc::new(MemoryStore::new());
        let store = users(&remote);

        let result = store.fetch(
            QueryOptions::new().factory(Arc::new(TypedFactory::<Team>::for_kind("teams"))),
        );

        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(remote.query_count(), 0);
    }

    #[tokio::test]
    async fn with_factory_validates_once() {
        let remote = Arc::new(MemoryStore::new());

        assert!(users(&remote)
            .with_factory(Arc::new(TypedFactory::<Team>::for_kind("teams")))
            .is_err());
        assert!(RecordStore::new("teams", remote.clone())
            .with_factory(Arc::new(TypedFactory::<Team>::for_kind("teams")))
            .is_ok());
    }

    #[tokio::test]
    async fn malformed_entity_fails_stream() {
        let remote = Arc::new(MemoryStore::new());
        remote.seed(Entity::new(
            Key::with_id("teams", 1),
            fields(json!({"title": "no name"})),
        ));
        let store = RecordStore::new("teams", remote.clone())
            .with_factory(Arc::new(TypedFactory::<Team>::for_kind("teams")))
            .unwrap();

        let result = store.select(QueryOptions::new()).await;
        assert!(matches!(result, Err(Error::MalformedEntity { .. })));
    }

    #[test]
    fn into_batches_splits() {
        assert!(into_batches(Vec::<u8>::new(), 400).is_empty());
        assert_eq!(into_batches(vec![1, 2, 3], 2), vec![vec![1, 2], vec![3]]);
        assert_eq!(into_batches(vec![1, 2], 0), vec![vec![1], vec![2]]);
    }

    proptest! {
        #[test]
        fn into_batches_bounds_and_order(n in 0usize..2000, size in 1usize..500) {
            let items: Vec<usize> = (0..n).collect();
            let batches = into_batches(items.clone(), size);

            prop_assert_eq!(batches.len(), n.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            prop_assert_eq!(batches.concat(), items);
        }
    }
}
