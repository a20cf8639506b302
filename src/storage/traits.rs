//! Abstract record store trait.
//!
//! The store owns every record of a run. Stages receive it by `&mut` for
//! writes; nothing holds a shared mutable handle.

use thiserror::Error;

use crate::record::{Record, RecordId};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Record not found.
    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    /// Key already exists.
    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    /// The record was absorbed by another record and cannot be written.
    #[error("Record {id} was merged into {into}")]
    AlreadyMerged {
        /// The absorbed id.
        id: RecordId,
        /// Its surviving record.
        into: RecordId,
    },

    /// Backend error.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Storage contract for agency records.
///
/// Absorbed ids keep resolving: [`RecordStore::get`] and
/// [`RecordStore::resolve`] follow the merge chain to the surviving record.
pub trait RecordStore: Send + Sync {
    /// Insert a new record. Returns an error if the id is blank or already
    /// used by a live or absorbed record.
    fn insert(&mut self, record: Record) -> Result<(), StorageError>;

    /// Get the live record an id resolves to.
    fn get(&self, id: &RecordId) -> Result<Option<&Record>, StorageError>;

    /// Replace a live record. Returns an error if the id is unknown or was
    /// absorbed.
    fn update(&mut self, record: Record) -> Result<(), StorageError>;

    /// Replace `survivor` and absorb `absorbed` into it.
    ///
    /// After a successful call, `get(absorbed)` returns the survivor.
    ///
    /// # Errors
    /// - `RecordNotFound`: if either record is not live
    /// - `BackendError`: if both ids are the same record
    fn absorb(&mut self, survivor: Record, absorbed: &RecordId) -> Result<(), StorageError>;

    /// Resolve an id to its live record id; `None` if the id is unknown.
    fn resolve(&self, id: &RecordId) -> Result<Option<RecordId>, StorageError>;

    /// Live records whose normalized name equals `key`.
    fn find_by_normalized_name(&self, key: &str) -> Vec<&Record>;

    /// Live records in insertion order.
    fn records(&self) -> Vec<&Record>;

    /// Pass-through field columns in first-seen order.
    fn columns(&self) -> &[String];

    /// Registers a pass-through column so output keeps its position.
    fn register_column(&mut self, column: &str);

    /// Number of live records.
    fn len(&self) -> usize;

    /// Returns true if no record is live.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content hash of the live records, in insertion order.
    fn fingerprint(&self) -> Result<String, StorageError> {
        let mut hasher = blake3::Hasher::new();
        for record in self.records() {
            let bytes = serde_json::to_vec(record)
                .map_err(|e| StorageError::SerializationError(e.to_string()))?;
            hasher.update(&bytes);
            hasher.update(b"\n");
        }
        Ok(hasher.finalize().to_hex().to_string())
    }
}
