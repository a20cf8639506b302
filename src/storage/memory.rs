//! In-memory storage backend.
//!
//! Records live in a hash map keyed by id, with an insertion-order list for
//! deterministic iteration, a normalized-name index, and a merge map that
//! keeps absorbed ids resolvable.

use std::collections::{HashMap, HashSet};

use crate::record::{Record, RecordId};
use crate::storage::traits::{RecordStore, StorageError};

const MAX_MERGE_HOPS: usize = 128;

/// In-memory record store.
#[derive(Debug, Default, Clone)]
pub struct InMemoryRecordStore {
    by_id: HashMap<RecordId, Record>,
    order: Vec<RecordId>,
    by_name: HashMap<String, HashSet<RecordId>>,
    merged_into: HashMap<RecordId, RecordId>,
    columns: Vec<String>,
}

impl InMemoryRecordStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records that already carry unique ids.
    ///
    /// Ids listed in a record's `merged_from` that are not themselves live
    /// resolve to that record, so a previous run's output can be reloaded.
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Result<Self, StorageError> {
        Self::from_table(&[], records)
    }

    /// Like [`InMemoryRecordStore::from_records`], registering `columns`
    /// first so they keep their table order.
    pub fn from_table(
        columns: &[String],
        records: impl IntoIterator<Item = Record>,
    ) -> Result<Self, StorageError> {
        let mut store = Self::new();
        for column in columns {
            store.register_column(column);
        }
        for record in records {
            store.insert(record)?;
        }
        let aliases: Vec<(RecordId, RecordId)> = store
            .by_id
            .values()
            .flat_map(|r| {
                r.provenance()
                    .merged_from
                    .iter()
                    .map(move |old| (old.clone(), r.record_id().clone()))
            })
            .collect();
        for (old, survivor) in aliases {
            if !store.by_id.contains_key(&old) && old != survivor {
                store.merged_into.entry(old).or_insert(survivor);
            }
        }
        Ok(store)
    }

    fn resolve_canonical_id(&self, id: &RecordId) -> Result<RecordId, StorageError> {
        let mut current = id.clone();
        for _ in 0..MAX_MERGE_HOPS {
            let Some(next) = self.merged_into.get(&current) else {
                return Ok(current);
            };
            if *next == current {
                return Err(StorageError::BackendError(
                    "record merge map contains a self-cycle".to_string(),
                ));
            }
            current = next.clone();
        }

        Err(StorageError::BackendError(
            "record merge map resolution exceeded hop limit".to_string(),
        ))
    }

    fn index_name(&mut self, record: &Record) {
        self.by_name
            .entry(record.name_normalized().to_string())
            .or_default()
            .insert(record.record_id().clone());
    }

    fn unindex_name(&mut self, key: &str, id: &RecordId) {
        if let Some(set) = self.by_name.get_mut(key) {
            set.remove(id);
            if set.is_empty() {
                self.by_name.remove(key);
            }
        }
    }

    fn register_fields(&mut self, record: &Record) {
        let new: Vec<String> = record
            .fields()
            .keys()
            .filter(|k| !self.columns.contains(k))
            .cloned()
            .collect();
        self.columns.extend(new);
    }

    /// Survivor that an absorbed id was merged into, if any.
    #[must_use]
    pub fn merged_into(&self, id: &RecordId) -> Option<&RecordId> {
        self.merged_into.get(id)
    }
}

impl RecordStore for InMemoryRecordStore {
    fn insert(&mut self, record: Record) -> Result<(), StorageError> {
        let id = record.record_id().clone();
        if id.is_blank() {
            return Err(StorageError::BackendError(
                "cannot insert a record without an id".to_string(),
            ));
        }
        if self.by_id.contains_key(&id) || self.merged_into.contains_key(&id) {
            return Err(StorageError::DuplicateKey(id.to_string()));
        }

        self.index_name(&record);
        self.register_fields(&record);
        self.order.push(id.clone());
        self.by_id.insert(id, record);
        Ok(())
    }

    fn get(&self, id: &RecordId) -> Result<Option<&Record>, StorageError> {
        let canonical = self.resolve_canonical_id(id)?;
        Ok(self.by_id.get(&canonical))
    }

    fn update(&mut self, record: Record) -> Result<(), StorageError> {
        let id = record.record_id().clone();
        if let Some(into) = self.merged_into.get(&id) {
            return Err(StorageError::AlreadyMerged {
                id,
                into: into.clone(),
            });
        }
        let prev_key = self
            .by_id
            .get(&id)
            .map(|r| r.name_normalized().to_string())
            .ok_or_else(|| StorageError::RecordNotFound(id.clone()))?;

        if prev_key != record.name_normalized() {
            self.unindex_name(&prev_key, &id);
            self.index_name(&record);
        }
        self.register_fields(&record);
        self.by_id.insert(id, record);
        Ok(())
    }

    fn absorb(&mut self, survivor: Record, absorbed: &RecordId) -> Result<(), StorageError> {
        let survivor_id = survivor.record_id().clone();
        if survivor_id == *absorbed {
            return Err(StorageError::BackendError(
                "cannot merge a record into itself".to_string(),
            ));
        }
        if !self.by_id.contains_key(absorbed) {
            return Err(StorageError::RecordNotFound(absorbed.clone()));
        }

        self.update(survivor)?;

        if let Some(prev) = self.by_id.remove(absorbed) {
            self.unindex_name(prev.name_normalized(), absorbed);
        }
        self.order.retain(|id| id != absorbed);
        self.merged_into.insert(absorbed.clone(), survivor_id);
        Ok(())
    }

    fn resolve(&self, id: &RecordId) -> Result<Option<RecordId>, StorageError> {
        let canonical = self.resolve_canonical_id(id)?;
        Ok(self.by_id.contains_key(&canonical).then_some(canonical))
    }

    fn find_by_normalized_name(&self, key: &str) -> Vec<&Record> {
        let Some(ids) = self.by_name.get(key) else {
            return Vec::new();
        };
        let mut results: Vec<&Record> = ids.iter().filter_map(|id| self.by_id.get(id)).collect();
        results.sort_by(|a, b| a.record_id().cmp(b.record_id()));
        results
    }

    fn records(&self) -> Vec<&Record> {
        self.order.iter().filter_map(|id| self.by_id.get(id)).collect()
    }

    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn register_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    fn len(&self) -> usize {
        self.by_id.len()
    }
}
