//! IndexedCollection - an in-memory mirror of one [`RecordStore`].
//!
//! The collection owns every loaded or locally created record and keeps a
//! set of indexes over them. Local edits through [`set`] and [`delete`]
//! update every index at once and are queued; [`save`] pushes the queue
//! to the remote store, upserts first and deletes second.
//!
//! [`set`]: IndexedCollection::set
//! [`delete`]: IndexedCollection::delete
//! [`save`]: IndexedCollection::save

use crate::{
    error::Result,
    index::{Index, RowId, UniqueIndex},
    query::QueryOptions,
    Error, Fields, Record, RecordStore,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Name under which the main index is registered.
pub const MAIN_INDEX: &str = "main";

/// Total order applied to records after each load.
pub type RecordOrder = Arc<dyn Fn(&Record, &Record) -> Ordering + Send + Sync>;

/// Outcome of a successful [`IndexedCollection::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveSummary {
    /// Records written in the upsert phase
    pub upserted: usize,
    /// Keys sent in the delete phase
    pub deleted: usize,
}

enum Slot {
    Multi(Index),
    Unique(UniqueIndex),
}

impl Slot {
    fn check(&self, row: RowId, fields: &Fields) -> Result<()> {
        match self {
            Slot::Multi(_) => Ok(()),
            Slot::Unique(index) => index.check(row, fields),
        }
    }

    fn add(&mut self, row: RowId, fields: &Fields) -> Result<()> {
        match self {
            Slot::Multi(index) => index.add(row, fields),
            Slot::Unique(index) => {
                index.add(row, fields)?;
            }
        }
        Ok(())
    }

    fn delete(&mut self, row: RowId, fields: &Fields) {
        match self {
            Slot::Multi(index) => index.delete(row, fields),
            Slot::Unique(index) => index.delete(row, fields),
        }
    }

    fn rebuild<'a>(&mut self, rows: impl IntoIterator<Item = (RowId, &'a Fields)>) -> Result<()> {
        match self {
            Slot::Multi(index) => {
                index.rebuild(rows);
                Ok(())
            }
            Slot::Unique(index) => index.rebuild(rows),
        }
    }
}

/// In-memory, multiply indexed mirror of a remote kind.
pub struct IndexedCollection {
    store: RecordStore,
    main: UniqueIndex,
    indexes: BTreeMap<String, Slot>,
    order: Option<RecordOrder>,
    rows: BTreeMap<RowId, Record>,
    next_row: u64,
    dirty: BTreeSet<RowId>,
    deleted: BTreeMap<RowId, Record>,
}

impl IndexedCollection {
    /// Create an empty collection whose canonical lookup is `main`.
    pub fn new(store: RecordStore, mut main: UniqueIndex) -> Self {
        main.set_name(MAIN_INDEX);
        Self {
            store,
            main,
            indexes: BTreeMap::new(),
            order: None,
            rows: BTreeMap::new(),
            next_row: 0,
            dirty: BTreeSet::new(),
            deleted: BTreeMap::new(),
        }
    }

    /// Add a multi-valued secondary index.
    pub fn with_index(mut self, name: impl Into<String>, index: Index) -> Self {
        self.indexes.insert(name.into(), Slot::Multi(index));
        self
    }

    /// Add a unique secondary index.
    pub fn with_unique_index(mut self, name: impl Into<String>, mut index: UniqueIndex) -> Self {
        let name = name.into();
        index.set_name(name.clone());
        self.indexes.insert(name, Slot::Unique(index));
        self
    }

    /// Sort records with `order` after every load.
    pub fn with_order(
        mut self,
        order: impl Fn(&Record, &Record) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.order = Some(Arc::new(order));
        self
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Replace the whole content with the remote state.
    ///
    /// Unsaved local edits are discarded.
    pub async fn load(&mut self) -> Result<()> {
        let mut records = self.store.select(QueryOptions::new()).await?;
        if let Some(order) = &self.order {
            records.sort_by(|a, b| order(a, b));
        }

        self.main.validate(records.iter().map(Record::fields))?;
        for slot in self.indexes.values() {
            if let Slot::Unique(index) = slot {
                index.validate(records.iter().map(Record::fields))?;
            }
        }

        let mut rows = BTreeMap::new();
        for record in records {
            rows.insert(self.allocate_row(), record);
        }
        self.rows = rows;
        self.dirty.clear();
        self.deleted.clear();

        self.main
            .rebuild(self.rows.iter().map(|(row, record)| (*row, record.fields())))?;
        for slot in self.indexes.values_mut() {
            slot.rebuild(self.rows.iter().map(|(row, record)| (*row, record.fields())))?;
        }

        tracing::debug!(
            kind = self.store.kind(),
            rows = self.rows.len(),
            indexes = self.indexes.len() + 1,
            "collection loaded"
        );
        Ok(())
    }

    /// Merge `partial` into the record it identifies, or create one.
    ///
    /// The record is re-indexed with its new fields and queued for upsert.
    pub fn set(&mut self, partial: Fields) -> Result<&Record> {
        let row = match self.main.get(&partial) {
            Some(row) => {
                let current = self
                    .rows
                    .get(&row)
                    .map(|record| record.fields().clone())
                    .ok_or_else(|| {
                        Error::Validation(format!("main index points at missing row {}", row.get()))
                    })?;
                let mut merged = current.clone();
                merged.extend(partial.clone());

                self.check(row, &merged)?;
                self.unindex(row, &current);
                self.index(row, &merged)?;
                if let Some(record) = self.rows.get_mut(&row) {
                    record.merge(partial);
                }
                row
            }
            None => {
                let row = self.allocate_row();
                self.check(row, &partial)?;
                self.index(row, &partial)?;
                self.rows.insert(row, Record::new(partial));
                row
            }
        };

        self.dirty.insert(row);
        self.rows
            .get(&row)
            .ok_or_else(|| Error::Validation(format!("row {} vanished", row.get())))
    }

    /// Remove the record identified by `partial` and queue its deletion.
    ///
    /// Returns `None`, changing nothing, if no record matches.
    pub fn delete(&mut self, partial: &Fields) -> Option<&Record> {
        let row = self.main.get(partial)?;
        let record = self.rows.remove(&row)?;
        self.unindex(row, record.fields());
        self.dirty.remove(&row);
        Some(&*self.deleted.entry(row).or_insert(record))
    }

    /// Push queued changes: upsert every dirty record, then delete every
    /// deleted one.
    ///
    /// A failing phase leaves its queue untouched, and a failing upsert
    /// phase skips the delete phase, so calling `save` again retries.
    pub async fn save(&mut self) -> Result<SaveSummary> {
        let mut summary = SaveSummary::default();

        if !self.dirty.is_empty() {
            let dirty = &self.dirty;
            let pending = self
                .rows
                .iter_mut()
                .filter(|(row, _)| dirty.contains(*row))
                .map(|(_, record)| record);
            summary.upserted = self.store.upsert(pending).await?;
            self.dirty.clear();
        }

        if !self.deleted.is_empty() {
            summary.deleted = self.store.delete(self.deleted.values()).await?;
            self.deleted.clear();
        }

        tracing::debug!(
            kind = self.store.kind(),
            upserted = summary.upserted,
            deleted = summary.deleted,
            "collection saved"
        );
        Ok(summary)
    }

    /// Records reachable through the main index, in load/insertion order.
    pub fn values(&self) -> impl Iterator<Item = &Record> + '_ {
        self.rows
            .iter()
            .filter(|(row, record)| self.main.contains(**row, record.fields()))
            .map(|(_, record)| record)
    }

    /// Look a record up through the main index.
    pub fn get(&self, partial: &Fields) -> Option<&Record> {
        self.main.get(partial).and_then(|row| self.rows.get(&row))
    }

    /// Records sharing the key of `partial` in the multi-valued index `index`.
    pub fn find(&self, index: &str, partial: &Fields) -> Result<Vec<&Record>> {
        match self.indexes.get(index) {
            Some(Slot::Multi(index)) => Ok(index
                .get(partial)
                .iter()
                .filter_map(|row| self.rows.get(row))
                .collect()),
            Some(Slot::Unique(index)) => Ok(index
                .get(partial)
                .and_then(|row| self.rows.get(&row))
                .into_iter()
                .collect()),
            None => Err(Error::IndexNotFound(index.to_string())),
        }
    }

    /// The record mapped to the key of `partial` in the unique index `index`.
    pub fn find_unique(&self, index: &str, partial: &Fields) -> Result<Option<&Record>> {
        if index == MAIN_INDEX {
            return Ok(self.get(partial));
        }
        match self.indexes.get(index) {
            Some(Slot::Unique(unique)) => {
                Ok(unique.get(partial).and_then(|row| self.rows.get(&row)))
            }
            Some(Slot::Multi(_)) => Err(Error::Validation(format!(
                "index '{}' is not unique",
                index
            ))),
            None => Err(Error::IndexNotFound(index.to_string())),
        }
    }

    /// Number of records reachable through the main index.
    pub fn len(&self) -> usize {
        self.main.len()
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty()
    }

    /// Records waiting to be upserted.
    pub fn pending_upserts(&self) -> impl Iterator<Item = &Record> + '_ {
        self.dirty.iter().filter_map(|row| self.rows.get(row))
    }

    /// Records waiting to be deleted remotely.
    pub fn pending_deletes(&self) -> impl Iterator<Item = &Record> + '_ {
        self.deleted.values()
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.dirty.is_empty() || !self.deleted.is_empty()
    }

    fn allocate_row(&mut self) -> RowId {
        self.next_row += 1;
        RowId(self.next_row)
    }

    fn check(&self, row: RowId, fields: &Fields) -> Result<()> {
        self.main.check(row, fields)?;
        self.indexes
            .values()
            .try_for_each(|slot| slot.check(row, fields))
    }

    fn index(&mut self, row: RowId, fields: &Fields) -> Result<()> {
        self.main.add(row, fields)?;
        for slot in self.indexes.values_mut() {
            slot.add(row, fields)?;
        }
        Ok(())
    }

    fn unindex(&mut self, row: RowId, fields: &Fields) {
        self.main.delete(row, fields);
        for slot in self.indexes.values_mut() {
            slot.delete(row, fields);
        }
    }
}

impl fmt::Debug for IndexedCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedCollection")
            .field("kind", &self.store.kind())
            .field("rows", &self.rows.len())
            .field("indexes", &self.indexes.keys().collect::<Vec<_>>())
            .field("dirty", &self.dirty.len())
            .field("deleted", &self.deleted.len())
            .finish()
    }
}
