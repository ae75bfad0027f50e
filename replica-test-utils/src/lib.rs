//! Replica Test Utilities
//!
//! Shared test infrastructure for the replication workspace:
//! - A scriptable remote source (slow, failing or panicking on demand)
//! - A local store that fails on demand
//! - A diagnostic sink that captures instead of logging
//! - Proptest generators for addresses and partners
//! - Fixtures for common scenarios

// Re-export the in-memory store from its source crate
pub use replica_storage::{InMemoryStore, LocalStore, StoreStats};

// Re-export core types for convenience
pub use replica_core::{
    AddressRecord, BusinessPartnerId, CallerContext, Diagnostic, DiagnosticSink, EntitySet,
    OrderReference, Predicate, RemoteError, RemoteSource, ReplicaConfig, Row, RowExt, ScopedQuery,
    StorageError,
};

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

// ============================================================================
// MOCK REMOTE SOURCE
// ============================================================================

/// How the mock remote answers the next calls.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteBehavior {
    /// Answer immediately from the scripted rows.
    Serve,
    /// Sleep, then answer from the scripted rows.
    Delay(Duration),
    /// Fail with the given error.
    Fail(RemoteError),
    /// Panic inside the call.
    Panic,
}

/// Remote system-of-record backed by a scripted row set.
///
/// Queries are evaluated against the rows regardless of their entity set, so
/// a misdirected query is only visible through [`MockRemoteSource::queries`].
#[derive(Debug)]
pub struct MockRemoteSource {
    rows: RwLock<Vec<Row>>,
    behavior: RwLock<RemoteBehavior>,
    calls: AtomicUsize,
    queries: Mutex<Vec<ScopedQuery>>,
}

impl Default for MockRemoteSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteSource {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            behavior: RwLock::new(RemoteBehavior::Serve),
            calls: AtomicUsize::new(0),
            queries: Mutex::new(Vec::new()),
        }
    }

    /// A remote holding the given addresses.
    pub fn with_addresses<I>(records: I) -> Self
    where
        I: IntoIterator<Item = AddressRecord>,
    {
        let remote = Self::new();
        remote.set_rows(records.into_iter().map(AddressRecord::into_row).collect());
        remote
    }

    /// Replace the scripted rows.
    pub fn set_rows(&self, rows: Vec<Row>) {
        *self.rows.write().unwrap_or_else(|e| e.into_inner()) = rows;
    }

    /// The scripted rows.
    pub fn rows(&self) -> Vec<Row> {
        self.rows.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Add a row.
    pub fn push_row(&self, row: Row) {
        self.rows.write().unwrap_or_else(|e| e.into_inner()).push(row);
    }

    /// Remove every row with the given `ID`, as an upstream deletion would.
    pub fn remove(&self, id: &str) {
        self.rows
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|row| row.id() != Some(id));
    }

    /// Change how subsequent calls behave.
    pub fn set_behavior(&self, behavior: RemoteBehavior) {
        *self.behavior.write().unwrap_or_else(|e| e.into_inner()) = behavior;
    }

    /// Number of calls received.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every query received, in arrival order.
    pub fn queries(&self) -> Vec<ScopedQuery> {
        self.queries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn answer(&self, query: &ScopedQuery) -> Vec<Row> {
        query.evaluate(self.rows())
    }
}

#[async_trait]
impl RemoteSource for MockRemoteSource {
    async fn run(&self, query: &ScopedQuery) -> Result<Vec<Row>, RemoteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(query.clone());

        let behavior = self.behavior.read().unwrap_or_else(|e| e.into_inner()).clone();
        match behavior {
            RemoteBehavior::Serve => Ok(self.answer(query)),
            RemoteBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(self.answer(query))
            }
            RemoteBehavior::Fail(err) => Err(err),
            RemoteBehavior::Panic => panic!("scripted remote panic"),
        }
    }
}

// ============================================================================
// FAILING LOCAL STORE
// ============================================================================

/// In-memory store whose selects or upserts can be made to fail.
///
/// Failed upserts write nothing, like a rolled-back transaction.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    fail_selects: AtomicBool,
    fail_upserts: AtomicBool,
}

impl FailingStore {
    /// Wrap a store; nothing fails until switched on.
    pub fn new(inner: InMemoryStore) -> Self {
        Self {
            inner,
            fail_selects: AtomicBool::new(false),
            fail_upserts: AtomicBool::new(false),
        }
    }

    pub fn fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upserts(&self, fail: bool) {
        self.fail_upserts.store(fail, Ordering::SeqCst);
    }

    /// The wrapped store, for inspecting what was written.
    pub fn inner(&self) -> &InMemoryStore {
        &self.inner
    }
}

#[async_trait]
impl LocalStore for FailingStore {
    async fn select(&self, query: &ScopedQuery) -> Result<Vec<Row>, StorageError> {
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(StorageError::SelectFailed {
                entity_set: query.entity_set().to_string(),
                reason: "scripted select failure".to_string(),
            });
        }
        self.inner.select(query).await
    }

    async fn upsert(&self, entity_set: &EntitySet, rows: Vec<Row>) -> Result<usize, StorageError> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(StorageError::UpsertFailed {
                entity_set: entity_set.to_string(),
                reason: "scripted upsert failure".to_string(),
            });
        }
        self.inner.upsert(entity_set, rows).await
    }

    fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

// ============================================================================
// CAPTURING DIAGNOSTIC SINK
// ============================================================================

/// Diagnostic sink that records everything it receives.
#[derive(Debug, Default)]
pub struct CapturingSink {
    captured: Mutex<Vec<Diagnostic>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything emitted so far.
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.captured.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Number of diagnostics matching a predicate.
    pub fn count_where(&self, predicate: impl Fn(&Diagnostic) -> bool) -> usize {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|d| predicate(d))
            .count()
    }

    /// Number of replication anomalies emitted.
    pub fn anomalies(&self) -> usize {
        self.count_where(|d| matches!(d, Diagnostic::ReplicationAnomaly { .. }))
    }

    /// Number of remote fallbacks emitted.
    pub fn fallbacks(&self) -> usize {
        self.count_where(|d| matches!(d, Diagnostic::RemoteFallback { .. }))
    }
}

impl DiagnosticSink for CapturingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.captured
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(diagnostic);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for replication types.

    use super::*;
    use proptest::prelude::*;
    use serde_json::Value;

    /// Generate a business partner id.
    pub fn arb_partner_id() -> impl Strategy<Value = BusinessPartnerId> {
        "BP[0-9]{1,3}".prop_map(|s| BusinessPartnerId::new(s))
    }

    /// Generate an address id.
    pub fn arb_address_id() -> impl Strategy<Value = String> {
        "A[0-9]{1,3}"
    }

    /// Generate an opaque address field value.
    pub fn arb_field_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            "[A-Za-z ]{0,12}".prop_map(Value::String),
            (0i64..100_000).prop_map(Value::from),
            Just(Value::Null),
        ]
    }

    /// Generate a live address owned by the given partner.
    pub fn arb_address(partner: BusinessPartnerId) -> impl Strategy<Value = AddressRecord> {
        (
            arb_address_id(),
            arb_field_value(),
            arb_field_value(),
            arb_field_value(),
        )
            .prop_map(move |(id, street, city, postal_code)| {
                AddressRecord::new(id, partner.as_str())
                    .with_field("street", street)
                    .with_field("city", city)
                    .with_field("postalCode", postal_code)
            })
    }

    /// Generate addresses for one partner with distinct ids.
    pub fn arb_addresses(
        partner: BusinessPartnerId,
        max: usize,
    ) -> impl Strategy<Value = Vec<AddressRecord>> {
        prop::collection::vec(arb_address(partner), 0..=max).prop_map(|mut records| {
            let mut seen = std::collections::HashSet::new();
            records.retain(|r| seen.insert(r.id.clone()));
            records
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common scenarios.

    use super::*;

    /// Remote entity set used by the default configuration.
    pub fn remote_addresses() -> EntitySet {
        ReplicaConfig::default().remote_addresses
    }

    /// Local entity set used by the default configuration.
    pub fn local_addresses() -> EntitySet {
        ReplicaConfig::default().local_addresses
    }

    /// A caller scoped to the given partner.
    pub fn caller(partner: &str) -> CallerContext {
        CallerContext::for_user("alice").with_business_partner(partner)
    }

    /// A caller with no partner attribute.
    pub fn unscoped_caller() -> CallerContext {
        CallerContext::for_user("mallory")
    }

    /// A live address with a street and city.
    pub fn address(id: &str, partner: &str, street: &str, city: &str) -> AddressRecord {
        AddressRecord::new(id, partner)
            .with_field("street", street)
            .with_field("city", city)
    }

    /// Same as [`address`], flattened into a row.
    pub fn address_row(id: &str, partner: &str, street: &str, city: &str) -> Row {
        address(id, partner, street, city).into_row()
    }

    /// A change event payload naming the given partners.
    pub fn change_payload(partners: &[&str]) -> String {
        let keys: Vec<serde_json::Value> = partners
            .iter()
            .map(|p| serde_json::json!({ "businesspartner": p }))
            .collect();
        serde_json::json!({
            "specversion": "1.0",
            "type": "sap.s4.beh.businesspartner.v1.BusinessPartner.Changed.v1",
            "data": { "key": keys }
        })
        .to_string()
    }

    /// A local store seeded with replicas, without counting the seed as writes.
    pub fn seeded_store(records: Vec<AddressRecord>) -> InMemoryStore {
        let rows = records.into_iter().map(AddressRecord::into_row).collect();
        match InMemoryStore::with_rows(&local_addresses(), rows) {
            Ok(store) => store,
            Err(err) => panic!("fixture rows must carry an ID: {}", err),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
