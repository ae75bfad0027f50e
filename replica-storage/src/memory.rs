//! In-memory replica store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use replica_core::{EntitySet, Row, ScopedQuery, StorageError};

use crate::{prepare_batch, LocalStore, StoreStats};

/// In-memory store keyed by entity set, then `ID`.
///
/// Rows within an entity set are kept in `ID` order, so unordered selects are
/// deterministic. A batch upsert takes the write lock once, which makes it
/// atomic with respect to concurrent readers.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<EntitySet, BTreeMap<String, Row>>>,
    batches: AtomicU64,
    rows_written: AtomicU64,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-loaded with rows, without counting them as writes.
    pub fn with_rows(entity_set: &EntitySet, rows: Vec<Row>) -> Result<Self, StorageError> {
        let store = Self::new();
        let prepared = prepare_batch(entity_set, rows)?;
        {
            let mut tables = store.tables.write().map_err(|_| StorageError::LockPoisoned)?;
            let table = tables.entry(entity_set.clone()).or_default();
            for (id, row) in prepared {
                table.insert(id, row);
            }
        }
        Ok(store)
    }

    /// Every row of an entity set, in `ID` order.
    pub fn rows(&self, entity_set: &EntitySet) -> Result<Vec<Row>, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tables
            .get(entity_set)
            .map(|t| t.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Number of rows in an entity set.
    pub fn len(&self, entity_set: &EntitySet) -> Result<usize, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        Ok(tables.get(entity_set).map(BTreeMap::len).unwrap_or(0))
    }

    /// Whether an entity set has no rows.
    pub fn is_empty(&self, entity_set: &EntitySet) -> Result<bool, StorageError> {
        Ok(self.len(entity_set)? == 0)
    }

    /// Clear all stored data.
    pub fn clear(&self) -> Result<(), StorageError> {
        self.tables
            .write()
            .map_err(|_| StorageError::LockPoisoned)?
            .clear();
        Ok(())
    }
}

#[async_trait]
impl LocalStore for InMemoryStore {
    async fn select(&self, query: &ScopedQuery) -> Result<Vec<Row>, StorageError> {
        let tables = self.tables.read().map_err(|_| StorageError::LockPoisoned)?;
        let rows = tables
            .get(query.entity_set())
            .map(|t| t.values().cloned().collect::<Vec<_>>())
            .unwrap_or_default();
        Ok(query.evaluate(rows))
    }

    async fn upsert(&self, entity_set: &EntitySet, rows: Vec<Row>) -> Result<usize, StorageError> {
        let prepared = prepare_batch(entity_set, rows)?;
        let written = prepared.len();

        let mut tables = self.tables.write().map_err(|_| StorageError::LockPoisoned)?;
        let table = tables.entry(entity_set.clone()).or_default();
        for (id, row) in prepared {
            table.insert(id, row);
        }

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(written as u64, Ordering::Relaxed);
        Ok(written)
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            batches: self.batches.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }
}
