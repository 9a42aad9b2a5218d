//! In-process [`RemoteStore`] implementation.
//!
//! Holds entities in ordered maps and behaves like a conforming remote
//! store: numeric ids are allocated for incomplete keys, every bulk call
//! is atomic, and queries see a snapshot taken when they are opened. It
//! also keeps call statistics and can be told to start failing writes,
//! which is what tests and benches use it for.

use crate::{
    query::{Direction, Filter, Operator, Order, RemoteQuery},
    remote::{Entity, EntityStream, RemoteError, RemoteStore},
    store::WriteOp,
    Fields, Key, KeyId, Kind,
};
use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use serde_json::{Number, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Default)]
struct Inner {
    kinds: HashMap<Kind, BTreeMap<KeyId, Fields>>,
    next_id: i64,
    queries: usize,
    writes: Vec<(WriteOp, usize)>,
    fail_after: Option<usize>,
}

/// Remote store living entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entity directly, bypassing call statistics.
    pub fn seed(&self, entity: Entity) -> Key {
        let mut inner = self.inner.lock();
        let key = inner.complete(entity.key);
        if let Some(id) = key.id.clone() {
            inner
                .kinds
                .entry(key.kind.clone())
                .or_default()
                .insert(id, entity.data);
        }
        key
    }

    /// Fetch one entity's data by key.
    pub fn get(&self, key: &Key) -> Option<Fields> {
        let inner = self.inner.lock();
        let id = key.id.as_ref()?;
        inner.kinds.get(&key.kind)?.get(id).cloned()
    }

    /// Number of entities stored for `kind`.
    pub fn len(&self, kind: &str) -> usize {
        self.inner.lock().kinds.get(kind).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self, kind: &str) -> bool {
        self.len(kind) == 0
    }

    /// Number of queries opened so far.
    pub fn query_count(&self) -> usize {
        self.inner.lock().queries
    }

    /// Sizes of every bulk call of type `op`, in call order.
    pub fn write_sizes(&self, op: WriteOp) -> Vec<usize> {
        self.inner
            .lock()
            .writes
            .iter()
            .filter(|(o, _)| *o == op)
            .map(|(_, size)| *size)
            .collect()
    }

    /// Let `n` more bulk calls succeed, then fail every following one.
    pub fn fail_writes_after(&self, n: usize) {
        self.inner.lock().fail_after = Some(n);
    }

    /// Stop injecting write failures.
    pub fn heal(&self) {
        self.inner.lock().fail_after = None;
    }

    fn write(&self, op: WriteOp, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError> {
        let mut inner = self.inner.lock();
        inner.admit(op, entities.len())?;

        for entity in &entities {
            let Some(id) = entity.key.id.as_ref() else {
                continue;
            };
            let exists = inner
                .kinds
                .get(&entity.key.kind)
                .is_some_and(|rows| rows.contains_key(id));
            match op {
                WriteOp::Insert if exists => {
                    return Err(RemoteError::new(format!(
                        "entity {} already exists",
                        entity.key
                    )))
                }
                WriteOp::Update if !exists => {
                    return Err(RemoteError::new(format!("entity {} not found", entity.key)))
                }
                _ => {}
            }
        }
        if op == WriteOp::Insert {
            let mut seen = HashSet::new();
            for entity in &entities {
                if let Some(id) = entity.key.id.as_ref() {
                    if !seen.insert((&entity.key.kind, id)) {
                        return Err(RemoteError::new(format!(
                            "entity {} appears twice in one insert",
                            entity.key
                        )));
                    }
                }
            }
        }
        if op == WriteOp::Update {
            if let Some(entity) = entities.iter().find(|e| !e.key.is_complete()) {
                return Err(RemoteError::new(format!(
                    "cannot update entity with incomplete key {}",
                    entity.key
                )));
            }
        }

        // Allocated ids must stay clear of explicit ids anywhere in the batch.
        if let Some(max) = entities
            .iter()
            .filter_map(|e| match e.key.id {
                Some(KeyId::Id(id)) => Some(id),
                _ => None,
            })
            .max()
        {
            inner.next_id = inner.next_id.max(max);
        }

        let mut keys = Vec::with_capacity(entities.len());
        for entity in entities {
            let key = inner.complete(entity.key);
            if let Some(id) = key.id.clone() {
                inner
                    .kinds
                    .entry(key.kind.clone())
                    .or_default()
                    .insert(id, entity.data);
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

impl Inner {
    fn complete(&mut self, key: Key) -> Key {
        if let Some(KeyId::Id(id)) = key.id {
            self.next_id = self.next_id.max(id);
        }
        if key.is_complete() {
            return key;
        }
        self.next_id += 1;
        Key::with_id(key.kind, self.next_id)
    }

    fn admit(&mut self, op: WriteOp, size: usize) -> Result<(), RemoteError> {
        if let Some(remaining) = self.fail_after.as_mut() {
            if *remaining == 0 {
                return Err(RemoteError::new(format!("injected {} failure", op)));
            }
            *remaining -= 1;
        }
        self.writes.push((op, size));
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn run_query(&self, query: RemoteQuery) -> Result<EntityStream, RemoteError> {
        let mut inner = self.inner.lock();
        inner.queries += 1;

        let mut matched: Vec<Entity> = inner
            .kinds
            .get(&query.kind)
            .into_iter()
            .flat_map(|rows| rows.iter())
            .filter(|(_, data)| query.filters.iter().all(|f| matches(data, f)))
            .map(|(id, data)| {
                Entity::new(
                    Key {
                        kind: query.kind.clone(),
                        id: Some(id.clone()),
                    },
                    data.clone(),
                )
            })
            .collect();

        if !query.orders.is_empty() {
            matched.sort_by(|a, b| compare_by(&a.data, &b.data, &query.orders));
        }

        Ok(stream::iter(matched.into_iter().map(Ok)).boxed())
    }

    async fn insert(&self, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError> {
        self.write(WriteOp::Insert, entities)
    }

    async fn update(&self, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError> {
        self.write(WriteOp::Update, entities)
    }

    async fn upsert(&self, entities: Vec<Entity>) -> Result<Vec<Key>, RemoteError> {
        self.write(WriteOp::Upsert, entities)
    }

    async fn delete(&self, keys: Vec<Key>) -> Result<(), RemoteError> {
        let mut inner = self.inner.lock();
        inner.admit(WriteOp::Delete, keys.len())?;
        for key in keys {
            if let (Some(rows), Some(id)) = (inner.kinds.get_mut(&key.kind), key.id.as_ref()) {
                rows.remove(id);
            }
        }
        Ok(())
    }
}

fn matches(data: &Fields, filter: &Filter) -> bool {
    let Some(value) = data.get(&filter.field) else {
        return false;
    };
    match filter.op {
        Operator::Eq => json_eq(value, &filter.value),
        Operator::Ne => !json_eq(value, &filter.value),
        Operator::Lt => compare(value, &filter.value) == Some(Ordering::Less),
        Operator::Le => matches!(
            compare(value, &filter.value),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Gt => compare(value, &filter.value) == Some(Ordering::Greater),
        Operator::Ge => matches!(
            compare(value, &filter.value),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::In => filter
            .value
            .as_array()
            .is_some_and(|candidates| candidates.iter().any(|c| json_eq(value, c))),
        Operator::NotIn => filter
            .value
            .as_array()
            .is_some_and(|candidates| !candidates.iter().any(|c| json_eq(value, c))),
    }
}

/// Compare two values of the same JSON type. Mixed types are unordered.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => compare_numbers(a, b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Exact for integers, falling back to floating point for mixed values.
fn compare_numbers(a: &Number, b: &Number) -> Option<Ordering> {
    if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
        return Some(a.cmp(&b));
    }
    if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
        return Some(a.cmp(&b));
    }
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

/// JSON equality where numbers compare by value, so `1` equals `1.0`.
fn json_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => compare_numbers(x, y) == Some(Ordering::Equal),
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(x, y)| json_eq(x, y))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).is_some_and(|other| json_eq(v, other)))
        }
        _ => a == b,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

fn compare_by(a: &Fields, b: &Fields, orders: &[Order]) -> Ordering {
    for order in orders {
        let (x, y) = (a.get(&order.field), b.get(&order.field));
        let ordering = match (x, y) {
            (Some(x), Some(y)) => compare(x, y)
                .unwrap_or_else(|| type_rank(Some(x)).cmp(&type_rank(Some(y)))),
            _ => type_rank(x).cmp(&type_rank(y)),
        };
        let ordering = match order.direction {
            Direction::Ascending => ordering,
            Direction::Descending => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
