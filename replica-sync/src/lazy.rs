//! Lazy replication of referenced addresses.
//!
//! When an order draft is patched to reference a shipping address, the
//! address must exist in the local replica before the order is persisted.
//! Missing addresses are fetched from the remote source, one per reference.

use std::sync::Arc;

use replica_core::{
    BusinessPartnerId, CallerContext, Diagnostic, DiagnosticSink, EntitySet, OrderReference,
    Predicate, RemoteSource, ReplicaConfig, ReplicaResult, Row, RowExt, ScopedQuery,
    FIELD_BUSINESS_PARTNER, FIELD_ID,
};
use replica_storage::LocalStore;

use crate::locks::{KeyedLocks, LockKey};
use crate::resilience::{bounded, ResilienceMetrics, ResiliencePolicy, ResilienceSnapshot};

/// What happened to each reference of one draft patch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LazyReport {
    /// Address ids fetched from the remote and written to the replica
    pub replicated: Vec<String>,
    /// Address ids already present locally
    pub already_present: Vec<String>,
    /// Address ids for which the remote returned zero or several rows
    pub anomalies: Vec<String>,
    /// Address ids whose remote fetch failed
    pub remote_failures: Vec<String>,
    /// References without an address id
    pub skipped: usize,
}

impl LazyReport {
    /// Whether every referenced address is now present locally.
    pub fn is_complete(&self) -> bool {
        self.anomalies.is_empty() && self.remote_failures.is_empty()
    }
}

/// Result of ensuring one address.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Ensured {
    Present,
    Replicated,
    Anomaly,
    RemoteFailed,
}

/// Replicates referenced addresses into the local store on demand.
pub struct LazyReplicationTrigger {
    remote: Arc<dyn RemoteSource>,
    local: Arc<dyn LocalStore>,
    sink: Arc<dyn DiagnosticSink>,
    policy: ResiliencePolicy,
    metrics: Arc<ResilienceMetrics>,
    remote_set: EntitySet,
    local_set: EntitySet,
    locks: Option<KeyedLocks>,
}

impl LazyReplicationTrigger {
    pub fn new(
        config: &ReplicaConfig,
        remote: Arc<dyn RemoteSource>,
        local: Arc<dyn LocalStore>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        let locks = config.serialize_per_key.then(KeyedLocks::new);
        Self {
            remote,
            local,
            sink,
            policy: ResiliencePolicy::from_config(config),
            metrics: Arc::new(ResilienceMetrics::new()),
            remote_set: config.remote_addresses.clone(),
            local_set: config.local_addresses.clone(),
            locks,
        }
    }

    /// Share a lock table with other handlers.
    ///
    /// Has no effect when per-key serialization is disabled.
    pub fn with_locks(mut self, locks: KeyedLocks) -> Self {
        if self.locks.is_some() {
            self.locks = Some(locks);
        }
        self
    }

    /// Counters for remote fetches.
    pub fn metrics(&self) -> ResilienceSnapshot {
        self.metrics.snapshot()
    }

    /// Ensure every referenced address exists in the local replica.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if the caller has no business partner; no reference
    ///   is processed.
    /// - `Storage` if a local lookup or upsert fails.
    ///
    /// Remote failures and unexpected match counts are reported through the
    /// diagnostic sink and the returned report, never as errors.
    pub async fn ensure_replicated(
        &self,
        caller: &CallerContext,
        references: &[OrderReference],
    ) -> ReplicaResult<LazyReport> {
        let partner = caller.business_partner()?;
        let mut report = LazyReport::default();

        for reference in references {
            let Some(address_id) = reference.shipping_address_id.as_deref() else {
                report.skipped += 1;
                continue;
            };

            let outcome = match &self.locks {
                Some(locks) => {
                    let _guard = locks.acquire(LockKey::address(&partner, address_id)).await;
                    self.ensure_one(&partner, address_id).await?
                }
                None => self.ensure_one(&partner, address_id).await?,
            };

            let bucket = match outcome {
                Ensured::Present => &mut report.already_present,
                Ensured::Replicated => &mut report.replicated,
                Ensured::Anomaly => &mut report.anomalies,
                Ensured::RemoteFailed => &mut report.remote_failures,
            };
            bucket.push(address_id.to_string());
        }

        tracing::debug!(
            business_partner = %partner,
            replicated = report.replicated.len(),
            already_present = report.already_present.len(),
            anomalies = report.anomalies.len(),
            remote_failures = report.remote_failures.len(),
            skipped = report.skipped,
            "lazy replication finished"
        );
        Ok(report)
    }

    async fn ensure_one(
        &self,
        partner: &BusinessPartnerId,
        address_id: &str,
    ) -> ReplicaResult<Ensured> {
        let local_query = self.address_query(self.local_set.clone(), partner, address_id);
        if self.local.count(&local_query).await? >= 1 {
            return Ok(Ensured::Present);
        }

        let remote_query = self.address_query(self.remote_set.clone(), partner, address_id);
        let fetched = bounded(&self.policy, &self.metrics, self.remote.run(&remote_query)).await;
        let mut rows = match fetched {
            Ok(rows) => rows,
            Err(error) => {
                self.sink.emit(Diagnostic::RemoteFetchFailed {
                    business_partner: partner.to_string(),
                    address_id: Some(address_id.to_string()),
                    error,
                });
                return Ok(Ensured::RemoteFailed);
            }
        };

        // A row without a string ID cannot be stored, so it is not a match.
        rows.retain(|row| row.id().is_some());
        match <[Row; 1]>::try_from(rows) {
            Ok([row]) => {
                self.local.upsert(&self.local_set, vec![row]).await?;
                tracing::info!(
                    business_partner = %partner,
                    address_id = %address_id,
                    "replicated shipping address"
                );
                Ok(Ensured::Replicated)
            }
            Err(rows) => {
                self.sink.emit(Diagnostic::ReplicationAnomaly {
                    business_partner: partner.to_string(),
                    address_id: address_id.to_string(),
                    count: rows.len(),
                });
                Ok(Ensured::Anomaly)
            }
        }
    }

    fn address_query(
        &self,
        entity_set: EntitySet,
        partner: &BusinessPartnerId,
        address_id: &str,
    ) -> ScopedQuery {
        ScopedQuery::select(entity_set).filter(
            Predicate::eq(FIELD_BUSINESS_PARTNER, partner.as_str())
                .and(Predicate::eq(FIELD_ID, address_id)),
        )
    }
}
