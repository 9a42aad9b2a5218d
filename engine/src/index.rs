//! Secondary indexes over collection rows.
//!
//! Indexes never own records. They map a derived [`IndexKey`] to the
//! [`RowId`] handles of the rows that produce it, and the owning
//! collection resolves handles to records.

use crate::{error::Result, Error, Fields};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

/// Handle to a row inside one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowId(pub(crate) u64);

impl RowId {
    /// Wrap a raw handle, for using indexes outside a collection.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// Canonical form of a derived index key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IndexKey(String);

impl IndexKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Project `names` out of `fields`. Missing fields project to `null`.
    pub fn project(fields: &Fields, names: &[String]) -> Self {
        let parts = names
            .iter()
            .map(|name| fields.get(name).cloned().unwrap_or(Value::Null))
            .collect();
        Self(Value::Array(parts).to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Function deriving an index key from a record's fields.
pub type KeyFn = Arc<dyn Fn(&Fields) -> IndexKey + Send + Sync>;

fn projection(names: Vec<String>) -> KeyFn {
    Arc::new(move |fields: &Fields| IndexKey::project(fields, &names))
}

static NO_ROWS: BTreeSet<RowId> = BTreeSet::new();

/// Multi-valued index: every key maps to the set of rows sharing it.
#[derive(Clone)]
pub struct Index {
    key_fn: KeyFn,
    map: HashMap<IndexKey, BTreeSet<RowId>>,
}

impl Index {
    /// An index keyed by a custom function.
    pub fn new(key_fn: impl Fn(&Fields) -> IndexKey + Send + Sync + 'static) -> Self {
        Self {
            key_fn: Arc::new(key_fn),
            map: HashMap::new(),
        }
    }

    /// An index keyed by the values of `names`.
    pub fn on<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_fn: projection(names.into_iter().map(Into::into).collect()),
            map: HashMap::new(),
        }
    }

    /// Derive the key of `fields`.
    pub fn key_of(&self, fields: &Fields) -> IndexKey {
        (self.key_fn)(fields)
    }

    pub fn add(&mut self, row: RowId, fields: &Fields) {
        let key = self.key_of(fields);
        self.map.entry(key).or_default().insert(row);
    }

    pub fn delete(&mut self, row: RowId, fields: &Fields) {
        let key = self.key_of(fields);
        if let Some(rows) = self.map.get_mut(&key) {
            rows.remove(&row);
            if rows.is_empty() {
                self.map.remove(&key);
            }
        }
    }

    /// Rows sharing the key of `partial`. Empty, never missing.
    pub fn get(&self, partial: &Fields) -> &BTreeSet<RowId> {
        self.map.get(&self.key_of(partial)).unwrap_or(&NO_ROWS)
    }

    /// Clear and re-add every row.
    pub fn rebuild<'a, I>(&mut self, rows: I)
    where
        I: IntoIterator<Item = (RowId, &'a Fields)>,
    {
        self.map.clear();
        for (row, fields) in rows {
            self.add(row, fields);
        }
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.map.len()
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Index").field("keys", &self.map.len()).finish()
    }
}

/// What a [`UniqueIndex`] does when a new row collides with a mapped key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollisionPolicy {
    /// Replace the earlier row silently. It stays reachable through other
    /// indexes only.
    #[default]
    Overwrite,
    /// Replace the earlier row and log a warning.
    Warn,
    /// Refuse with [`Error::KeyCollision`].
    Reject,
}

/// Unique index: every key maps to at most one row.
#[derive(Clone)]
pub struct UniqueIndex {
    name: String,
    key_fn: KeyFn,
    policy: CollisionPolicy,
    map: HashMap<IndexKey, RowId>,
}

impl UniqueIndex {
    /// A unique index keyed by a custom function.
    pub fn new(key_fn: impl Fn(&Fields) -> IndexKey + Send + Sync + 'static) -> Self {
        Self {
            name: "main".to_string(),
            key_fn: Arc::new(key_fn),
            policy: CollisionPolicy::default(),
            map: HashMap::new(),
        }
    }

    /// A unique index keyed by the values of `names`.
    pub fn on<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "main".to_string(),
            key_fn: projection(names.into_iter().map(Into::into).collect()),
            policy: CollisionPolicy::default(),
            map: HashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: CollisionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> CollisionPolicy {
        self.policy
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn key_of(&self, fields: &Fields) -> IndexKey {
        (self.key_fn)(fields)
    }

    /// Fail if adding `row` would displace another row under [`CollisionPolicy::Reject`].
    pub fn check(&self, row: RowId, fields: &Fields) -> Result<()> {
        if self.policy != CollisionPolicy::Reject {
            return Ok(());
        }
        let key = self.key_of(fields);
        match self.map.get(&key) {
            Some(existing) if *existing != row => Err(Error::KeyCollision {
                index: self.name.clone(),
                key,
            }),
            _ => Ok(()),
        }
    }

    /// Map the key of `fields` to `row`, returning the displaced row.
    pub fn add(&mut self, row: RowId, fields: &Fields) -> Result<Option<RowId>> {
        self.check(row, fields)?;
        let key = self.key_of(fields);
        let displaced = self.map.insert(key.clone(), row).filter(|old| *old != row);
        if let Some(old) = displaced {
            if self.policy == CollisionPolicy::Warn {
                tracing::warn!(
                    index = %self.name,
                    key = %key,
                    displaced = old.get(),
                    "unique index key collision; earlier row is no longer reachable"
                );
            }
        }
        Ok(displaced)
    }

    /// Unmap the key of `fields`, but only if it still points at `row`.
    pub fn delete(&mut self, row: RowId, fields: &Fields) {
        let key = self.key_of(fields);
        if self.map.get(&key) == Some(&row) {
            self.map.remove(&key);
        }
    }

    pub fn get(&self, partial: &Fields) -> Option<RowId> {
        self.map.get(&self.key_of(partial)).copied()
    }

    /// Whether `row` is currently reachable through this index.
    pub fn contains(&self, row: RowId, fields: &Fields) -> bool {
        self.map.get(&self.key_of(fields)) == Some(&row)
    }

    /// Fail if `rows` contain two rows with the same key under [`CollisionPolicy::Reject`].
    pub fn validate<'a, I>(&self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a Fields>,
    {
        if self.policy != CollisionPolicy::Reject {
            return Ok(());
        }
        let mut seen = std::collections::HashSet::new();
        for fields in rows {
            let key = self.key_of(fields);
            if !seen.insert(key.clone()) {
                return Err(Error::KeyCollision {
                    index: self.name.clone(),
                    key,
                });
            }
        }
        Ok(())
    }

    /// Clear and re-add every row. Fails without touching the index if
    /// the rows collide under [`CollisionPolicy::Reject`].
    pub fn rebuild<'a, I>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = (RowId, &'a Fields)>,
    {
        let rows: Vec<_> = rows.into_iter().collect();
        self.validate(rows.iter().map(|(_, fields)| *fields))?;
        self.map.clear();
        for (row, fields) in rows {
            self.add(row, fields)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Rows currently mapped, in no particular order.
    pub fn rows(&self) -> impl Iterator<Item = RowId> + '_ {
        self.map.values().copied()
    }
}

impl fmt::Debug for UniqueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UniqueIndex")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("keys", &self.map.len())
            .finish()
    }
}
