//! Reconciliation of replicas against business partner change events.
//!
//! A change event only names partners. For every named partner that has
//! local replicas, the current remote addresses are fetched and each replica
//! is either overwritten from its remote counterpart or tombstoned when the
//! remote no longer has it. Addresses the replica never held are not added.

use std::collections::HashMap;
use std::sync::Arc;

use replica_core::{
    replace_from_remote, BusinessPartnerId, Diagnostic, DiagnosticSink, EntitySet, Predicate,
    RemoteSource, ReplicaConfig, ReplicaResult, Row, RowExt, ScopedQuery, FIELD_BUSINESS_PARTNER,
};
use replica_events::ChangeEvent;
use replica_storage::LocalStore;

use crate::locks::{KeyedLocks, LockKey};
use crate::resilience::{bounded, ResilienceMetrics, ResiliencePolicy, ResilienceSnapshot};

/// What reconciliation did for one partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartnerStatus {
    /// Replicas were rewritten in one batch.
    Reconciled { updated: usize, tombstoned: usize },
    /// No local replicas; the remote was not asked.
    NoReplicas,
    /// The remote fetch failed; replicas were left untouched.
    RemoteUnavailable,
}

/// Per-partner outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartnerReport {
    pub partner: BusinessPartnerId,
    pub status: PartnerStatus,
}

/// Outcome of processing one change event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// One entry per distinct partner named by the event
    pub partners: Vec<PartnerReport>,
    /// The payload could not be read and was treated as empty
    pub malformed: bool,
}

impl ReconcileReport {
    /// Total replicas overwritten from the remote.
    pub fn updated(&self) -> usize {
        self.partners
            .iter()
            .map(|p| match p.status {
                PartnerStatus::Reconciled { updated, .. } => updated,
                _ => 0,
            })
            .sum()
    }

    /// Total replicas newly marked as deleted upstream (or kept so).
    pub fn tombstoned(&self) -> usize {
        self.partners
            .iter()
            .map(|p| match p.status {
                PartnerStatus::Reconciled { tombstoned, .. } => tombstoned,
                _ => 0,
            })
            .sum()
    }
}

/// Applies change events to the local replica.
pub struct ReconciliationProcessor {
    remote: Arc<dyn RemoteSource>,
    local: Arc<dyn LocalStore>,
    sink: Arc<dyn DiagnosticSink>,
    policy: ResiliencePolicy,
    metrics: Arc<ResilienceMetrics>,
    remote_set: EntitySet,
    local_set: EntitySet,
    topic: String,
    locks: Option<KeyedLocks>,
}

impl ReconciliationProcessor {
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
            topic: config.change_event.clone(),
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

    /// Process a change event payload.
    ///
    /// Unreadable payloads are an empty change set. The event counts as
    /// handled once this returns `Ok`, whatever anomalies were reported.
    ///
    /// # Errors
    ///
    /// `Storage` if a local select or batch upsert fails. Partners processed
    /// before the failure keep their committed batches.
    pub async fn process(&self, payload: &str) -> ReplicaResult<ReconcileReport> {
        self.sink.emit(Diagnostic::EventReceived {
            topic: self.topic.clone(),
            payload_bytes: payload.len(),
        });

        let (event, parse_error) = ChangeEvent::parse_or_empty(payload);
        let malformed = parse_error.is_some();
        if let Some(err) = parse_error {
            self.sink.emit(Diagnostic::MalformedEvent {
                reason: err.to_string(),
            });
        }

        let mut report = self.apply(&event).await?;
        report.malformed = malformed;
        Ok(report)
    }

    /// Reconcile every partner an already parsed event names.
    pub async fn apply(&self, event: &ChangeEvent) -> ReplicaResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        for partner in event.partners() {
            let status = match &self.locks {
                Some(locks) => {
                    let _guard = locks.acquire(LockKey::partner(partner)).await;
                    self.reconcile_partner(partner).await?
                }
                None => self.reconcile_partner(partner).await?,
            };
            report.partners.push(PartnerReport {
                partner: partner.clone(),
                status,
            });
        }
        Ok(report)
    }

    /// Bring one partner's replicas in line with the remote.
    pub async fn reconcile_partner(
        &self,
        partner: &BusinessPartnerId,
    ) -> ReplicaResult<PartnerStatus> {
        let replicas = self
            .local
            .select(&self.partner_query(self.local_set.clone(), partner))
            .await?;
        if replicas.is_empty() {
            tracing::debug!(business_partner = %partner, "no replicas to reconcile");
            return Ok(PartnerStatus::NoReplicas);
        }

        let remote_query = self.partner_query(self.remote_set.clone(), partner);
        let current = match bounded(&self.policy, &self.metrics, self.remote.run(&remote_query)).await
        {
            Ok(rows) => rows,
            Err(error) => {
                self.sink.emit(Diagnostic::RemoteFetchFailed {
                    business_partner: partner.to_string(),
                    address_id: None,
                    error,
                });
                return Ok(PartnerStatus::RemoteUnavailable);
            }
        };

        let (batch, updated, tombstoned) = merge_replicas(replicas, &current);
        self.local.upsert(&self.local_set, batch).await?;

        self.sink.emit(Diagnostic::PartnerReconciled {
            business_partner: partner.to_string(),
            updated,
            tombstoned,
        });
        Ok(PartnerStatus::Reconciled {
            updated,
            tombstoned,
        })
    }

    fn partner_query(&self, entity_set: EntitySet, partner: &BusinessPartnerId) -> ScopedQuery {
        ScopedQuery::select(entity_set)
            .filter(Predicate::eq(FIELD_BUSINESS_PARTNER, partner.as_str()))
    }
}

/// Rewrite local replicas from the current remote rows.
///
/// A replica with a remote counterpart becomes a copy of it (live); one
/// without is tombstoned with its fields unchanged. Returns the batch and
/// the updated and tombstoned counts.
fn merge_replicas(replicas: Vec<Row>, current: &[Row]) -> (Vec<Row>, usize, usize) {
    let by_id: HashMap<&str, &Row> = current
        .iter()
        .filter_map(|row| row.id().map(|id| (id, row)))
        .collect();

    let mut updated = 0;
    let mut tombstoned = 0;
    let batch = replicas
        .into_iter()
        .map(|mut replica| match replica.id().and_then(|id| by_id.get(id)) {
            Some(remote) => {
                updated += 1;
                replace_from_remote(remote)
            }
            None => {
                tombstoned += 1;
                replica.set_tombstone(true);
                replica
            }
        })
        .collect();
    (batch, updated, tombstoned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{AddressRecord, ReplicaError, StorageError};
    use replica_test_utils::fixtures::{
        address, address_row, change_payload, local_addresses, seeded_store,
    };
    use replica_test_utils::{CapturingSink, FailingStore, InMemoryStore, MockRemoteSource};

    #[test]
    fn test_merge_updates_and_tombstones() {
        let replicas = vec![
            address_row("A1", "BP1", "Old St", "Berlin"),
            address_row("A2", "BP1", "Gone St", "Bonn"),
        ];
        let current = vec![address_row("A1", "BP1", "New St", "Berlin")];

        let (batch, updated, tombstoned) = merge_replicas(replicas, &current);

        assert_eq!((updated, tombstoned), (1, 1));
        assert_eq!(batch[0], address_row("A1", "BP1", "New St", "Berlin"));
        assert!(batch[1].is_tombstoned());
        assert_eq!(batch[1]["street"], "Gone St");
    }

    #[test]
    fn test_merge_revives_tombstoned_replica() {
        let replicas = vec![address("A1", "BP1", "Old St", "Berlin").tombstoned().into_row()];
        let current = vec![address_row("A1", "BP1", "Back St", "Berlin")];

        let (batch, _, _) = merge_replicas(replicas, &current);

        let record = AddressRecord::from_row(&batch[0]).unwrap();
        assert!(!record.tombstone);
        assert_eq!(record.fields["street"], "Back St");
    }

    #[tokio::test]
    async fn test_no_replicas_skips_remote() {
        let remote = Arc::new(MockRemoteSource::new());
        let local = Arc::new(InMemoryStore::new());
        let processor = ReconciliationProcessor::new(
            &ReplicaConfig::default(),
            remote.clone(),
            local.clone(),
            Arc::new(CapturingSink::new()),
        );

        let report = processor.process(&change_payload(&["BP1"])).await.unwrap();

        assert_eq!(report.partners[0].status, PartnerStatus::NoReplicas);
        assert_eq!(remote.call_count(), 0);
        assert_eq!(local.stats().batches, 0);
    }

    #[tokio::test]
    async fn test_one_batch_per_partner() {
        let remote = Arc::new(MockRemoteSource::with_addresses([
            address("A1", "BP1", "New St 1", "Berlin"),
            address("A2", "BP1", "New St 2", "Berlin"),
        ]));
        let local = Arc::new(seeded_store(vec![
            address("A1", "BP1", "Old St 1", "Berlin"),
            address("A2", "BP1", "Old St 2", "Berlin"),
            address("A3", "BP1", "Old St 3", "Berlin"),
        ]));
        let processor = ReconciliationProcessor::new(
            &ReplicaConfig::default(),
            remote,
            local.clone(),
            Arc::new(CapturingSink::new()),
        );

        let report = processor.process(&change_payload(&["BP1"])).await.unwrap();

        assert_eq!(report.updated(), 2);
        assert_eq!(report.tombstoned(), 1);
        assert_eq!(local.stats().batches, 1);
        assert_eq!(local.stats().rows_written, 3);
        assert_eq!(local.len(&local_addresses()).unwrap(), 3);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_acknowledged() {
        let sink = Arc::new(CapturingSink::new());
        let processor = ReconciliationProcessor::new(
            &ReplicaConfig::default(),
            Arc::new(MockRemoteSource::new()),
            Arc::new(InMemoryStore::new()),
            sink.clone(),
        );

        let report = processor.process("{not json").await.unwrap();

        assert!(report.malformed);
        assert!(report.partners.is_empty());
        assert_eq!(
            sink.count_where(|d| matches!(d, Diagnostic::MalformedEvent { .. })),
            1
        );
    }

    #[tokio::test]
    async fn test_batch_upsert_failure_is_not_acknowledged() {
        let remote = Arc::new(MockRemoteSource::new());
        let local = Arc::new(FailingStore::new(seeded_store(vec![address(
            "A1", "BP1", "Old St 1", "Berlin",
        )])));
        local.fail_upserts(true);
        let sink = Arc::new(CapturingSink::new());
        let processor = ReconciliationProcessor::new(
            &ReplicaConfig::default(),
            remote,
            local.clone(),
            sink.clone(),
        );

        let err = processor
            .process(&change_payload(&["BP1"]))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReplicaError::Storage(StorageError::UpsertFailed { .. })
        ));
        let stored = local.inner().rows(&local_addresses()).unwrap();
        assert_eq!(stored, vec![address_row("A1", "BP1", "Old St 1", "Berlin")]);
        assert_eq!(
            sink.count_where(|d| matches!(d, Diagnostic::PartnerReconciled { .. })),
            0
        );
    }
}
