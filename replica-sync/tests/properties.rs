//! Property tests for the replication paths.
//!
//! Each case builds its own runtime, so the properties run as plain
//! (non-async) proptest cases.

use std::sync::Arc;

use proptest::prelude::*;
use replica_core::{
    AddressRecord, BusinessPartnerId, OrderReference, Predicate, RemoteError, ReplicaConfig,
    RowExt, ScopedQuery,
};
use replica_storage::LocalStore;
use replica_sync::{LazyReplicationTrigger, ReadThroughGateway, ReconciliationProcessor};
use replica_test_utils::fixtures::{caller, change_payload, local_addresses, seeded_store};
use replica_test_utils::generators::{arb_address, arb_addresses};
use replica_test_utils::{CapturingSink, InMemoryStore, MockRemoteSource, RemoteBehavior};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn partner() -> BusinessPartnerId {
    BusinessPartnerId::new("BP1")
}

fn arb_city_filter() -> impl Strategy<Value = Option<Predicate>> {
    prop_oneof![
        Just(None),
        "[A-Za-z ]{0,12}".prop_map(|city| Some(Predicate::eq("city", city))),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A remote that answers in time is returned exactly.
    #[test]
    fn prop_remote_in_time_is_returned_exactly(
        remote_rows in arb_addresses(partner(), 6),
        local_rows in arb_addresses(partner(), 6),
        filter in arb_city_filter(),
    ) {
        runtime().block_on(async {
            let remote = Arc::new(MockRemoteSource::with_addresses(remote_rows));
            let sink = Arc::new(CapturingSink::new());
            let gateway = ReadThroughGateway::new(
                &ReplicaConfig::default(),
                remote.clone(),
                Arc::new(seeded_store(local_rows)),
                sink.clone(),
            );
            let mut query = ScopedQuery::select(local_addresses());
            if let Some(filter) = filter {
                query = query.filter(filter);
            }

            let rows = gateway.read(&caller("BP1"), &query).await.unwrap();

            let direct = remote.queries()[0].evaluate(remote.rows());
            prop_assert_eq!(rows, direct);
            prop_assert_eq!(sink.fallbacks(), 0);
            Ok(())
        })?;
    }

    /// A failing remote is replaced by the equivalent query on the replica.
    #[test]
    fn prop_failed_remote_reads_equivalent_local_query(
        local_rows in arb_addresses(partner(), 6),
        filter in arb_city_filter(),
    ) {
        runtime().block_on(async {
            let remote = Arc::new(MockRemoteSource::new());
            remote.set_behavior(RemoteBehavior::Fail(RemoteError::Connection {
                reason: "down".to_string(),
            }));
            let local = Arc::new(seeded_store(local_rows));
            let gateway = ReadThroughGateway::new(
                &ReplicaConfig::default(),
                remote.clone(),
                local.clone(),
                Arc::new(CapturingSink::new()),
            );
            let mut query = ScopedQuery::select(local_addresses());
            if let Some(filter) = filter {
                query = query.filter(filter);
            }

            let rows = gateway.read(&caller("BP1"), &query).await.unwrap();

            let queries = remote.queries();
            let remote_query = &queries[0];
            let equivalent = remote_query.retarget(local_addresses());
            prop_assert!(equivalent.is_equivalent_to(remote_query));
            prop_assert_eq!(rows, local.select(&equivalent).await.unwrap());
            Ok(())
        })?;
    }

    /// Replicating the same address twice leaves exactly one row.
    #[test]
    fn prop_lazy_replication_is_idempotent(record in arb_address(partner())) {
        runtime().block_on(async {
            let id = record.id.clone();
            let remote = Arc::new(MockRemoteSource::with_addresses([record.clone()]));
            let local = Arc::new(InMemoryStore::new());
            let trigger = LazyReplicationTrigger::new(
                &ReplicaConfig::default(),
                remote,
                local.clone(),
                Arc::new(CapturingSink::new()),
            );
            let refs = [OrderReference::shipping_to(id.clone())];

            trigger.ensure_replicated(&caller("BP1"), &refs).await.unwrap();
            let second = trigger.ensure_replicated(&caller("BP1"), &refs).await.unwrap();

            prop_assert_eq!(second.already_present, vec![id.clone()]);
            prop_assert_eq!(local.rows(&local_addresses()).unwrap(), vec![record.into_row()]);
            Ok(())
        })?;
    }

    /// Applying an event twice converges to the state after applying it once,
    /// and replicas missing upstream end tombstoned with their fields intact.
    #[test]
    fn prop_reconcile_converges_and_tombstones(
        replicas in arb_addresses(partner(), 6),
        keep in prop::collection::vec(any::<bool>(), 6),
        edited_city in "[A-Za-z]{1,8}",
    ) {
        runtime().block_on(async {
            let current: Vec<AddressRecord> = replicas
                .iter()
                .zip(keep.iter())
                .filter(|(_, keep)| **keep)
                .map(|(r, _)| r.clone().with_field("city", edited_city.clone()))
                .collect();
            let remote = Arc::new(MockRemoteSource::with_addresses(current.clone()));
            let local = Arc::new(seeded_store(replicas.clone()));
            let processor = ReconciliationProcessor::new(
                &ReplicaConfig::default(),
                remote,
                local.clone(),
                Arc::new(CapturingSink::new()),
            );
            let payload = change_payload(&["BP1"]);

            processor.process(&payload).await.unwrap();
            let once = local.rows(&local_addresses()).unwrap();
            processor.process(&payload).await.unwrap();
            let twice = local.rows(&local_addresses()).unwrap();
            prop_assert_eq!(&once, &twice);

            for replica in &replicas {
                let stored = once
                    .iter()
                    .find(|row| row.id() == Some(replica.id.as_str()))
                    .cloned()
                    .unwrap();
                match current.iter().find(|c| c.id == replica.id) {
                    Some(upstream) => prop_assert_eq!(stored, upstream.clone().into_row()),
                    None => prop_assert_eq!(stored, replica.clone().tombstoned().into_row()),
                }
            }
            Ok(())
        })?;
    }
}
