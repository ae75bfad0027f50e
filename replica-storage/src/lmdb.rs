//! LMDB-backed replica store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep the replica in a
//! memory-mapped file, so replicated addresses survive restarts.
//!
//! # Layout
//!
//! A single unnamed database maps [`RowKey`] bytes to the row as JSON.
//! Rows of one entity set share a key prefix.
//!
//! # Transactions
//!
//! - Selects run in one read transaction.
//! - A batch upsert runs in one write transaction, so it commits entirely or
//!   not at all.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use replica_core::constants::DEFAULT_LMDB_MAP_SIZE_MB;
use replica_core::{EntitySet, Row, ScopedQuery, StorageError};

use crate::key::RowKey;
use crate::{prepare_batch, LocalStore, StoreStats};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbStoreError to StorageError.
impl From<LmdbStoreError> for StorageError {
    fn from(e: LmdbStoreError) -> Self {
        StorageError::TransactionFailed {
            reason: e.to_string(),
        }
    }
}

/// Configuration for the LMDB store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmdbStoreConfig {
    /// Directory holding the LMDB files.
    pub path: PathBuf,
    /// Maximum size of the memory map in megabytes.
    pub map_size_mb: usize,
}

impl LmdbStoreConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            map_size_mb: DEFAULT_LMDB_MAP_SIZE_MB,
        }
    }

    /// Set the map size.
    pub fn with_map_size_mb(mut self, map_size_mb: usize) -> Self {
        self.map_size_mb = map_size_mb;
        self
    }

    /// Create LmdbStoreConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `REPLICA_LMDB_PATH`: Directory for the replica (default: "./replica-data")
    /// - `REPLICA_LMDB_MAP_SIZE_MB`: Map size in megabytes (default: 64)
    pub fn from_env() -> Self {
        let path = std::env::var("REPLICA_LMDB_PATH").unwrap_or_else(|_| "./replica-data".to_string());
        let map_size_mb = std::env::var("REPLICA_LMDB_MAP_SIZE_MB")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_LMDB_MAP_SIZE_MB);
        Self {
            path: PathBuf::from(path),
            map_size_mb,
        }
    }
}

/// LMDB-backed replica store.
///
/// # Example
///
/// ```ignore
/// use replica_storage::{LmdbStore, LmdbStoreConfig, LocalStore};
///
/// let store = LmdbStore::open(&LmdbStoreConfig::new("/var/lib/replica"))?;
/// store.upsert(&addresses, rows).await?;
/// ```
pub struct LmdbStore {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    batches: AtomicU64,
    rows_written: AtomicU64,
}

impl LmdbStore {
    /// Open (or create) a store.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn open(config: &LmdbStoreConfig) -> Result<Self, LmdbStoreError> {
        Self::open_at(&config.path, config.map_size_mb)
    }

    fn open_at(path: &Path, map_size_mb: usize) -> Result<Self, LmdbStoreError> {
        let map_size = map_size_mb.checked_mul(1024 * 1024).ok_or_else(|| {
            LmdbStoreError::EnvOpen(format!("map size of {} MB is too large", map_size_mb))
        })?;
        std::fs::create_dir_all(path)?;

        // SAFETY: the environment is opened once per path by this process.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path)
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            batches: AtomicU64::new(0),
            rows_written: AtomicU64::new(0),
        })
    }

    /// Read every row of an entity set in key order.
    fn scan(&self, entity_set: &EntitySet) -> Result<Vec<Row>, LmdbStoreError> {
        let prefix = RowKey::prefix(entity_set);
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let iter = self
            .db
            .iter(&rtxn)
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        let mut rows = Vec::new();
        for result in iter {
            let (key, value) = result.map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
            if !key.starts_with(&prefix) {
                continue;
            }
            let row: Row = serde_json::from_slice(value)
                .map_err(|e| LmdbStoreError::Deserialization(e.to_string()))?;
            rows.push(row);
        }
        Ok(rows)
    }

    fn write_batch(&self, entity_set: &EntitySet, batch: &[(String, Row)]) -> Result<(), LmdbStoreError> {
        let encoded = batch
            .iter()
            .map(|(id, row)| {
                let key = RowKey::new(entity_set.clone(), id.clone()).encode();
                serde_json::to_vec(row)
                    .map(|value| (key, value))
                    .map_err(|e| LmdbStoreError::Serialization(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;

        for (key, value) in &encoded {
            self.db
                .put(&mut wtxn, key.as_slice(), value.as_slice())
                .map_err(|e| LmdbStoreError::Transaction(e.to_string()))?;
        }

        wtxn.commit()
            .map_err(|e| LmdbStoreError::Transaction(e.to_string()))
    }
}

#[async_trait]
impl LocalStore for LmdbStore {
    async fn select(&self, query: &ScopedQuery) -> Result<Vec<Row>, StorageError> {
        let rows = self.scan(query.entity_set())?;
        Ok(query.evaluate(rows))
    }

    async fn upsert(&self, entity_set: &EntitySet, rows: Vec<Row>) -> Result<usize, StorageError> {
        let prepared = prepare_batch(entity_set, rows)?;
        self.write_batch(entity_set, &prepared)
            .map_err(|e| StorageError::UpsertFailed {
                entity_set: entity_set.to_string(),
                reason: e.to_string(),
            })?;

        self.batches.fetch_add(1, Ordering::Relaxed);
        self.rows_written
            .fetch_add(prepared.len() as u64, Ordering::Relaxed);
        tracing::debug!(entity_set = %entity_set, rows = prepared.len(), "committed replica batch");
        Ok(prepared.len())
    }

    fn stats(&self) -> StoreStats {
        StoreStats {
            batches: self.batches.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{Columns, OrderBy, Predicate, RowExt};
    use serde_json::json;
    use tempfile::TempDir;

    fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn addresses() -> EntitySet {
        EntitySet::new("AdminService.Addresses")
    }

    fn open_temp() -> (TempDir, LmdbStore) {
        let dir = TempDir::new().unwrap();
        let store = LmdbStore::open(&LmdbStoreConfig::new(dir.path()).with_map_size_mb(8)).unwrap();
        (dir, store)
    }

    #[test]
    fn test_oversized_map_is_rejected() {
        let dir = TempDir::new().unwrap();
        let config = LmdbStoreConfig::new(dir.path()).with_map_size_mb(usize::MAX);
        match LmdbStore::open(&config) {
            Err(LmdbStoreError::EnvOpen(reason)) => assert!(reason.contains("too large")),
            Err(other) => panic!("expected EnvOpen, got {}", other),
            Ok(_) => panic!("expected EnvOpen, store opened"),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_select() {
        let (_dir, store) = open_temp();
        let set = addresses();

        let written = store
            .upsert(
                &set,
                vec![
                    row(json!({"ID": "A2", "businessPartner": "BP100", "city": "Bonn"})),
                    row(json!({"ID": "A1", "businessPartner": "BP100", "city": "Berlin"})),
                    row(json!({"ID": "A3", "businessPartner": "BP200", "city": "Köln"})),
                ],
            )
            .await
            .unwrap();
        assert_eq!(written, 3);

        let query = ScopedQuery::select(set.clone())
            .filter(Predicate::eq("businessPartner", "BP100"))
            .order_by(OrderBy::asc("city"))
            .columns(Columns::only(["ID"]));
        let rows = store.select(&query).await.unwrap();
        assert_eq!(rows, vec![row(json!({"ID": "A1"})), row(json!({"ID": "A2"}))]);
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing_row() {
        let (_dir, store) = open_temp();
        let set = addresses();

        store
            .upsert(&set, vec![row(json!({"ID": "A1", "city": "Berlin"}))])
            .await
            .unwrap();
        let mut tombstoned = row(json!({"ID": "A1", "city": "Berlin"}));
        tombstoned.set_tombstone(true);
        store.upsert(&set, vec![tombstoned]).await.unwrap();

        let stored = store.get(&set, "A1").await.unwrap().unwrap();
        assert!(stored.is_tombstoned());
        assert_eq!(store.count(&ScopedQuery::select(set)).await.unwrap(), 1);
        assert_eq!(store.stats().batches, 2);
    }

    #[tokio::test]
    async fn test_entity_sets_are_isolated() {
        let (_dir, store) = open_temp();
        store
            .upsert(&addresses(), vec![row(json!({"ID": "A1"}))])
            .await
            .unwrap();

        let orders = ScopedQuery::select(EntitySet::new("AdminService.Orders"));
        assert!(store.select(&orders).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_batch_writes_nothing() {
        let (_dir, store) = open_temp();
        let set = addresses();

        let result = store
            .upsert(&set, vec![row(json!({"ID": "A1"})), row(json!({"street": "x"}))])
            .await;
        assert!(matches!(result, Err(StorageError::MissingKey { .. })));
        assert!(store.select(&ScopedQuery::select(set)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let config = LmdbStoreConfig::new(dir.path()).with_map_size_mb(8);
        let set = addresses();

        {
            let store = LmdbStore::open(&config).unwrap();
            store
                .upsert(&set, vec![row(json!({"ID": "A1", "city": "Berlin"}))])
                .await
                .unwrap();
        }

        let reopened = LmdbStore::open(&config).unwrap();
        let stored = reopened.get(&set, "A1").await.unwrap().unwrap();
        assert_eq!(stored["city"], json!("Berlin"));
    }

    #[test]
    fn test_lmdb_error_converts_to_storage_error() {
        let err: StorageError = LmdbStoreError::Transaction("MDB_MAP_FULL".to_string()).into();
        assert!(matches!(err, StorageError::TransactionFailed { reason } if reason.contains("MDB_MAP_FULL")));
    }
}
