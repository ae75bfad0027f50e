//! Replica Storage - Local Store Trait and Implementations
//!
//! Defines the transactional row store that owns the address replicas.
//! Two implementations are provided: [`InMemoryStore`] for tests and
//! embedded use, and [`LmdbStore`] for a replica that survives restarts.

pub mod key;
pub mod lmdb;
pub mod memory;

pub use key::RowKey;
pub use lmdb::{LmdbStore, LmdbStoreConfig, LmdbStoreError};
pub use memory::InMemoryStore;

use std::collections::HashMap;

use async_trait::async_trait;
use replica_core::{EntitySet, Predicate, Row, RowExt, ScopedQuery, StorageError, FIELD_ID};

// ============================================================================
// LOCAL STORE TRAIT
// ============================================================================

/// Transactional row store for replicas.
///
/// Rows are keyed by their `ID` field within an entity set. Implementations
/// must be safe to share across tasks.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Run a filtered read.
    async fn select(&self, query: &ScopedQuery) -> Result<Vec<Row>, StorageError>;

    /// Insert or replace rows by `ID`.
    ///
    /// The batch is all-or-nothing: if any row lacks a string `ID`, nothing is
    /// written. Within one batch a later row for the same `ID` wins.
    /// Returns the number of distinct keys written.
    async fn upsert(&self, entity_set: &EntitySet, rows: Vec<Row>) -> Result<usize, StorageError>;

    /// Point lookup by `ID`.
    async fn get(&self, entity_set: &EntitySet, id: &str) -> Result<Option<Row>, StorageError> {
        let query = ScopedQuery::select(entity_set.clone()).filter(Predicate::eq(FIELD_ID, id));
        Ok(self.select(&query).await?.into_iter().next())
    }

    /// Number of rows a query selects.
    async fn count(&self, query: &ScopedQuery) -> Result<usize, StorageError> {
        Ok(self.select(query).await?.len())
    }

    /// Write statistics since construction.
    fn stats(&self) -> StoreStats;
}

/// Write statistics for a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of upsert batches committed.
    pub batches: u64,
    /// Number of rows written across all batches.
    pub rows_written: u64,
}

/// Validate a batch and collapse duplicate keys, keeping the last row.
///
/// Order of first appearance is preserved.
pub(crate) fn prepare_batch(
    entity_set: &EntitySet,
    rows: Vec<Row>,
) -> Result<Vec<(String, Row)>, StorageError> {
    let mut prepared: Vec<(String, Row)> = Vec::with_capacity(rows.len());
    let mut positions: HashMap<String, usize> = HashMap::with_capacity(rows.len());
    for row in rows {
        let id = row.require_id(entity_set.as_str())?.to_string();
        match positions.get(&id) {
            Some(&at) => prepared[at].1 = row,
            None => {
                positions.insert(id.clone(), prepared.len());
                prepared.push((id, row));
            }
        }
    }
    Ok(prepared)
}
