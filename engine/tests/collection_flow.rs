//! End-to-end tests for shelf-core
//!
//! These tests drive an IndexedCollection against the in-memory remote
//! store, covering batching, retries and unusual inputs.

use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shelf_core::{
    fields, CollisionPolicy, Entity, Error, Fields, Index, IndexedCollection, Key, MemoryStore,
    Operator, QueryOptions, Record, RecordStore, TypedFactory, UniqueIndex, WriteOp,
};
use std::collections::BTreeMap;
use std::sync::Arc;

fn users(remote: &Arc<MemoryStore>) -> IndexedCollection {
    IndexedCollection::new(
        RecordStore::new("users", remote.clone()),
        UniqueIndex::on(["id"]),
    )
    .with_index("by_team", Index::on(["team"]))
}

fn id_of(record: &Record) -> i64 {
    record.get("id").and_then(Value::as_i64).unwrap_or(-1)
}

// ============================================================================
// Net effect of set / delete / save
// ============================================================================

#[tokio::test]
async fn save_reflects_net_effect() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = users(&remote);

    // model of what the collection should hold afterwards
    let mut model: BTreeMap<i64, Fields> = BTreeMap::new();
    let steps: Vec<(bool, i64, &str)> = vec![
        (true, 1, "a"),
        (true, 2, "b"),
        (true, 1, "c"),
        (false, 2, ""),
        (true, 3, "d"),
        (false, 9, ""),
        (true, 2, "e"),
    ];

    for (is_set, id, name) in steps {
        if is_set {
            let partial = fields(json!({"id": id, "name": name}));
            collection.set(partial.clone()).unwrap();
            model.entry(id).or_default().extend(partial);
        } else {
            let removed = collection.delete(&fields(json!({"id": id})));
            assert_eq!(removed.is_some(), model.remove(&id).is_some());
        }
    }

    collection.save().await.unwrap();
    assert!(!collection.has_pending_changes());

    let mut local: Vec<Fields> = collection.values().map(|r| r.fields().clone()).collect();
    local.sort_by_key(|f| f["id"].as_i64());
    assert_eq!(local, model.values().cloned().collect::<Vec<_>>());

    let mut reloaded = users(&remote);
    reloaded.load().await.unwrap();
    let mut remote_ids: Vec<i64> = reloaded.values().map(id_of).collect();
    remote_ids.sort();
    assert_eq!(remote_ids, model.keys().copied().collect::<Vec<_>>());
}

#[tokio::test]
async fn record_created_then_deleted_never_reaches_remote() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = users(&remote);

    collection.set(fields(json!({"id": 1}))).unwrap();
    collection.delete(&fields(json!({"id": 1}))).unwrap();
    let summary = collection.save().await.unwrap();

    assert_eq!(summary.upserted, 0);
    assert_eq!(summary.deleted, 0);
    assert!(remote.write_sizes(WriteOp::Upsert).is_empty());
    assert!(remote.write_sizes(WriteOp::Delete).is_empty());
}

// ============================================================================
// Batching
// ============================================================================

#[tokio::test]
async fn large_save_is_split_into_batches() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = users(&remote);

    for id in 0..950 {
        collection
            .set(fields(json!({"id": id, "team": id % 3})))
            .unwrap();
    }
    collection.save().await.unwrap();

    assert_eq!(remote.write_sizes(WriteOp::Upsert), vec![400, 400, 150]);

    for id in 0..450 {
        collection.delete(&fields(json!({"id": id}))).unwrap();
    }
    let summary = collection.save().await.unwrap();

    assert_eq!(summary.deleted, 450);
    assert_eq!(remote.write_sizes(WriteOp::Delete), vec![400, 50]);
    assert_eq!(remote.len("users"), 500);
}

#[tokio::test]
async fn retry_after_partial_failure_does_not_duplicate() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = IndexedCollection::new(
        RecordStore::new("users", remote.clone()).with_batch_size(10),
        UniqueIndex::on(["id"]),
    );
    for id in 0..25 {
        collection.set(fields(json!({"id": id}))).unwrap();
    }
    remote.fail_writes_after(2);

    let err = collection.save().await.unwrap_err();
    assert!(matches!(err, Error::Remote { batch: 2, size: 5, .. }));
    assert_eq!(remote.len("users"), 20);
    assert_eq!(collection.pending_upserts().count(), 25);

    remote.heal();
    collection.save().await.unwrap();

    assert_eq!(remote.len("users"), 25);
    assert!(!collection.has_pending_changes());
}

// ============================================================================
// Queries and factories
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct Member {
    id: i64,
    team: String,
    #[serde(default)]
    active: bool,
}

#[tokio::test]
async fn typed_factory_query() {
    let remote = Arc::new(MemoryStore::new());
    for (id, team) in [(1, "core"), (2, "infra"), (3, "core")] {
        remote.seed(Entity::new(
            Key::incomplete("members"),
            fields(json!({"id": id, "team": team})),
        ));
    }
    let store = RecordStore::new("members", remote.clone())
        .with_factory(Arc::new(TypedFactory::<Member>::for_kind("members")))
        .unwrap();

    let core: Vec<Record> = store
        .fetch(QueryOptions::new().filter("team", Operator::Eq, "core"))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(core.len(), 2);
    assert!(core.iter().all(|r| r.get("active") == Some(&json!(false))));
    assert!(core.iter().all(|r| !r.changed()));
}

#[tokio::test]
async fn foreign_factory_makes_no_remote_call() {
    let remote = Arc::new(MemoryStore::new());
    let store = RecordStore::new("users", remote.clone());

    let result = store.select(
        QueryOptions::new().factory(Arc::new(TypedFactory::<Member>::for_kind("members"))),
    );

    assert!(matches!(result.await, Err(Error::Validation(_))));
    assert_eq!(remote.query_count(), 0);
}

// ============================================================================
// Unusual keys
// ============================================================================

#[tokio::test]
async fn composite_and_nested_keys() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = IndexedCollection::new(
        RecordStore::new("events", remote.clone()),
        UniqueIndex::on(["day", "slot"]),
    );

    collection
        .set(fields(json!({"day": "2024-01-01", "slot": {"h": 9, "m": 0}, "title": "a"})))
        .unwrap();
    collection
        .set(fields(json!({"slot": {"m": 0, "h": 9}, "day": "2024-01-01", "title": "b"})))
        .unwrap();

    assert_eq!(collection.len(), 1);
    let record = collection
        .get(&fields(json!({"day": "2024-01-01", "slot": {"h": 9, "m": 0}})))
        .unwrap();
    assert_eq!(record.get("title"), Some(&json!("b")));
}

#[tokio::test]
async fn missing_key_fields_share_null_key() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = users(&remote);

    collection.set(fields(json!({"name": "anon"}))).unwrap();
    collection.set(fields(json!({"name": "anon 2"}))).unwrap();

    assert_eq!(collection.len(), 1);
    assert_eq!(
        collection.get(&Fields::new()).unwrap().get("name"),
        Some(&json!("anon 2"))
    );
}

#[tokio::test]
async fn reject_policy_guards_secondary_unique_index() {
    let remote = Arc::new(MemoryStore::new());
    let mut collection = users(&remote).with_unique_index(
        "by_email",
        UniqueIndex::on(["email"]).with_policy(CollisionPolicy::Reject),
    );

    collection
        .set(fields(json!({"id": 1, "email": "a@example.com"})))
        .unwrap();
    let err = collection
        .set(fields(json!({"id": 2, "email": "a@example.com"})))
        .unwrap_err();

    assert!(matches!(err, Error::KeyCollision { .. }));
    assert_eq!(collection.len(), 1);
    assert_eq!(collection.pending_upserts().count(), 1);
}
