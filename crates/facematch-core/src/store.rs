//! Identity store contract and an in-process implementation.

use crate::types::IdentityRecord;
use std::collections::BTreeMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("corrupt record {name}: {reason}")]
    Corrupt { name: String, reason: String },
    #[error("refusing to store {name}: descriptor has non-finite values")]
    NonFiniteDescriptor { name: String },
    #[error("store lock poisoned")]
    Poisoned,
}

/// Key-value access to enrolled identities, keyed by name.
///
/// Only single-key atomicity is assumed. Writes are last-write-wins and
/// deleting a missing key succeeds.
pub trait IdentityStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<IdentityRecord>, StoreError>;

    /// Snapshot of every record, in the store's iteration order.
    fn all(&self) -> Result<Vec<IdentityRecord>, StoreError>;

    /// Insert or overwrite the record stored under `record.name`.
    ///
    /// Records whose descriptor holds NaN or infinity are refused.
    fn set(&self, record: &IdentityRecord) -> Result<(), StoreError>;

    fn delete(&self, name: &str) -> Result<(), StoreError>;
}

/// Shared write-side check for [`IdentityStore::set`] implementations.
pub fn ensure_finite(record: &IdentityRecord) -> Result<(), StoreError> {
    if record.descriptor.is_finite() {
        Ok(())
    } else {
        Err(StoreError::NonFiniteDescriptor { name: record.name.clone() })
    }
}

/// In-memory store; iterates in name order.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<String, IdentityRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdentityStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<IdentityRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.get(name).cloned())
    }

    fn all(&self) -> Result<Vec<IdentityRecord>, StoreError> {
        let records = self.records.read().map_err(|_| StoreError::Poisoned)?;
        Ok(records.values().cloned().collect())
    }

    fn set(&self, record: &IdentityRecord) -> Result<(), StoreError> {
        ensure_finite(record)?;
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.insert(record.name.clone(), record.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<(), StoreError> {
        let mut records = self.records.write().map_err(|_| StoreError::Poisoned)?;
        records.remove(name);
        Ok(())
    }
}
