//! Resilient read-through gateway.
//!
//! Reads go to the remote system-of-record first, scoped to the caller's
//! business partner. When the remote is slow or failing, the same query is
//! answered from the local replica instead. Results are never merged and a
//! read never writes to the replica.

use std::sync::Arc;

use replica_core::{
    BusinessPartnerId, CallerContext, Diagnostic, DiagnosticSink, EntitySet, Predicate,
    RemoteSource, ReplicaConfig, ReplicaResult, Row, ScopedQuery, FIELD_BUSINESS_PARTNER,
};
use replica_storage::LocalStore;

use crate::resilience::{
    with_timeout_fallback, ResilienceMetrics, ResiliencePolicy, ResilienceSnapshot, Served,
};

/// Which side answered a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    Remote,
    Local,
}

/// Rows of a read together with the side that served them.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRead {
    pub rows: Vec<Row>,
    pub source: ReadSource,
}

/// Read-through gateway for one remote/local entity set pair.
pub struct ReadThroughGateway {
    remote: Arc<dyn RemoteSource>,
    local: Arc<dyn LocalStore>,
    sink: Arc<dyn DiagnosticSink>,
    policy: ResiliencePolicy,
    remote_set: EntitySet,
    local_set: EntitySet,
    metrics: Arc<ResilienceMetrics>,
}

impl ReadThroughGateway {
    pub fn new(
        config: &ReplicaConfig,
        remote: Arc<dyn RemoteSource>,
        local: Arc<dyn LocalStore>,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            remote,
            local,
            sink,
            policy: ResiliencePolicy::from_config(config),
            remote_set: config.remote_addresses.clone(),
            local_set: config.local_addresses.clone(),
            metrics: Arc::new(ResilienceMetrics::new()),
        }
    }

    pub fn policy(&self) -> &ResiliencePolicy {
        &self.policy
    }

    /// Counters for this gateway's policy.
    pub fn metrics(&self) -> ResilienceSnapshot {
        self.metrics.snapshot()
    }

    /// Serve a read, remote first.
    pub async fn read(&self, caller: &CallerContext, query: &ScopedQuery) -> ReplicaResult<Vec<Row>> {
        Ok(self.read_detailed(caller, query).await?.rows)
    }

    /// Serve a read and report which side answered.
    ///
    /// # Errors
    ///
    /// - `Unauthorized` if the caller has no business partner; nothing is
    ///   queried.
    /// - `Storage` if the remote failed and the local fallback failed too.
    pub async fn read_detailed(
        &self,
        caller: &CallerContext,
        query: &ScopedQuery,
    ) -> ReplicaResult<GatewayRead> {
        let partner = caller.business_partner()?;
        let remote_query = self.scoped_query(&partner, query);

        let served = with_timeout_fallback(
            &self.policy,
            &self.metrics,
            self.remote.run(&remote_query),
            |cause| {
                self.sink.emit(Diagnostic::RemoteFallback {
                    policy: self.policy.key().to_string(),
                    error: cause,
                });
                let fallback_query = remote_query.retarget(self.local_set.clone());
                async move { self.local.select(&fallback_query).await }
            },
        )
        .await?;

        Ok(match served {
            Served::Primary(rows) => {
                tracing::debug!(
                    business_partner = %partner,
                    rows = rows.len(),
                    "read served by remote"
                );
                GatewayRead {
                    rows,
                    source: ReadSource::Remote,
                }
            }
            Served::Fallback { value, .. } => GatewayRead {
                rows: value,
                source: ReadSource::Local,
            },
        })
    }

    /// The caller's query, scoped to a partner and aimed at the remote set.
    ///
    /// The scope comes first: `businessPartner == partner AND <caller predicate>`.
    /// Projection, ordering and paging are kept.
    pub fn scoped_query(&self, partner: &BusinessPartnerId, query: &ScopedQuery) -> ScopedQuery {
        let scope = Predicate::eq(FIELD_BUSINESS_PARTNER, partner.as_str());
        let predicate = match query.predicate() {
            Some(caller_predicate) => scope.and(caller_predicate.clone()),
            None => scope,
        };
        query.retarget(self.remote_set.clone()).filter(predicate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use replica_core::{Columns, OrderBy, RemoteError, ReplicaError, StorageError};
    use replica_test_utils::fixtures::{
        address, caller, local_addresses, remote_addresses, seeded_store, unscoped_caller,
    };
    use replica_test_utils::{
        CapturingSink, FailingStore, InMemoryStore, MockRemoteSource, RemoteBehavior,
    };

    fn gateway(
        remote: Arc<MockRemoteSource>,
        local: Arc<dyn LocalStore>,
        sink: Arc<CapturingSink>,
    ) -> ReadThroughGateway {
        ReadThroughGateway::new(&ReplicaConfig::default(), remote, local, sink)
    }

    #[tokio::test]
    async fn test_scoped_query_puts_partner_first() {
        let remote = Arc::new(MockRemoteSource::new());
        let local: Arc<dyn LocalStore> = Arc::new(seeded_store(vec![]));
        let gw = gateway(remote, local, Arc::new(CapturingSink::new()));

        let query = ScopedQuery::select(local_addresses())
            .filter(Predicate::eq("city", "Berlin"))
            .columns(Columns::only(["ID", "city"]))
            .order_by(OrderBy::asc("city"));
        let scoped = gw.scoped_query(&BusinessPartnerId::new("BP1"), &query);

        assert_eq!(scoped.entity_set(), &remote_addresses());
        assert_eq!(
            scoped.predicate(),
            Some(&Predicate::And(vec![
                Predicate::eq("businessPartner", "BP1"),
                Predicate::eq("city", "Berlin"),
            ]))
        );
        assert_eq!(scoped.projection(), query.projection());
    }

    #[tokio::test]
    async fn test_unscoped_caller_is_unauthorized() {
        let remote = Arc::new(MockRemoteSource::new());
        let local: Arc<dyn LocalStore> = Arc::new(seeded_store(vec![]));
        let gw = gateway(Arc::clone(&remote), local, Arc::new(CapturingSink::new()));

        let err = gw
            .read(&unscoped_caller(), &ScopedQuery::select(local_addresses()))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::Unauthorized { .. }));
        assert_eq!(remote.call_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_error_falls_back_and_reports() {
        let remote = Arc::new(MockRemoteSource::with_addresses([address(
            "A1",
            "BP1",
            "Remote St",
            "Berlin",
        )]));
        remote.set_behavior(RemoteBehavior::Fail(RemoteError::Connection {
            reason: "refused".to_string(),
        }));
        let local = Arc::new(seeded_store(vec![address("A1", "BP1", "Local St", "Berlin")]));
        let sink = Arc::new(CapturingSink::new());
        let gw = gateway(remote, local.clone(), Arc::clone(&sink));

        let read = gw
            .read_detailed(&caller("BP1"), &ScopedQuery::select(local_addresses()))
            .await
            .unwrap();

        assert_eq!(read.source, ReadSource::Local);
        assert_eq!(read.rows[0]["street"], "Local St");
        assert_eq!(sink.fallbacks(), 1);
        assert_eq!(gw.metrics().fallbacks, 1);
        assert_eq!(local.stats().batches, 0);
    }

    #[tokio::test]
    async fn test_remote_and_fallback_failure_is_surfaced() {
        let remote = Arc::new(MockRemoteSource::new());
        remote.set_behavior(RemoteBehavior::Fail(RemoteError::Connection {
            reason: "refused".to_string(),
        }));
        let local = Arc::new(FailingStore::new(InMemoryStore::new()));
        local.fail_selects(true);
        let sink = Arc::new(CapturingSink::new());
        let gw = gateway(remote, local, Arc::clone(&sink));

        let err = gw
            .read(&caller("BP1"), &ScopedQuery::select(local_addresses()))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ReplicaError::Storage(StorageError::SelectFailed { .. })
        ));
        assert_eq!(sink.fallbacks(), 1);
    }
}
