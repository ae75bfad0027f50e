//! Replica Sync - Read-Through, Lazy Replication and Reconciliation
//!
//! Keeps a local replica of business partner addresses in step with the
//! remote system-of-record:
//!
//! - [`ReadThroughGateway`]: reads go to the remote, bounded by a timeout,
//!   and fall back to the replica when it is slow or failing.
//! - [`LazyReplicationTrigger`]: addresses referenced by an order draft are
//!   fetched into the replica if missing.
//! - [`ReconciliationProcessor`]: partner change events overwrite replicas
//!   from the remote and tombstone those deleted upstream.
//!
//! [`dispatch::address_handlers`] wires all three into a [`DispatchTable`].
//!
//! ```text
//! read ─────────► Gateway ──► Remote ──(timeout/error)──► Local
//! draft patch ──► Trigger ──► Local? ──(missing)──► Remote ──► Local upsert
//! change event ─► Processor ► Local ──► Remote ──► Local batch upsert
//! ```

pub mod dispatch;
pub mod gateway;
pub mod lazy;
pub mod locks;
pub mod reconcile;
pub mod resilience;
pub mod telemetry;

pub use dispatch::{address_handlers, DispatchTable, HandlerKey, HandlerKind, Outcome, Request};
pub use gateway::{GatewayRead, ReadSource, ReadThroughGateway};
pub use lazy::{LazyReplicationTrigger, LazyReport};
pub use locks::{KeyGuard, KeyedLocks, LockKey};
pub use reconcile::{PartnerReport, PartnerStatus, ReconcileReport, ReconciliationProcessor};
pub use resilience::{
    bounded, with_timeout_fallback, ResilienceMetrics, ResiliencePolicy, ResilienceSnapshot,
    Served,
};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
