//! Explicit handler dispatch table.
//!
//! Handlers are registered at startup under an operation kind and a name
//! (entity set or event topic). Nothing is discovered at runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use replica_core::{
    CallerContext, DiagnosticSink, EntitySet, EventError, OrderReference, RemoteSource,
    ReplicaConfig, ReplicaResult, Row, ScopedQuery,
};
use replica_events::InboundMessage;
use replica_storage::LocalStore;

use crate::gateway::ReadThroughGateway;
use crate::lazy::{LazyReplicationTrigger, LazyReport};
use crate::locks::KeyedLocks;
use crate::reconcile::{ReconcileReport, ReconciliationProcessor};

// ============================================================================
// KEYS, REQUESTS AND OUTCOMES
// ============================================================================

/// Operation kind a handler is registered for.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq)]
pub enum HandlerKind {
    /// Read of an entity set
    Read,
    /// Patch of a draft entity, before it is applied
    DraftPatch,
    /// Inbound message on a topic
    Event,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "READ",
            Self::DraftPatch => "DRAFT_PATCH",
            Self::Event => "EVENT",
        };
        f.write_str(name)
    }
}

/// Registration key.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct HandlerKey {
    pub kind: HandlerKind,
    pub name: String,
}

impl HandlerKey {
    pub fn new(kind: HandlerKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// Name under which an event handler is registered.
pub fn event_name(service: &str, event: &str) -> String {
    format!("{}/{}", service, event)
}

/// A request routed through the table.
#[derive(Debug, Clone)]
pub enum Request {
    Read {
        caller: CallerContext,
        query: ScopedQuery,
    },
    DraftPatch {
        caller: CallerContext,
        entity_set: EntitySet,
        references: Vec<OrderReference>,
    },
    Event(InboundMessage),
}

impl Request {
    /// The key this request is routed by.
    pub fn key(&self) -> HandlerKey {
        match self {
            Self::Read { query, .. } => {
                HandlerKey::new(HandlerKind::Read, query.entity_set().as_str())
            }
            Self::DraftPatch { entity_set, .. } => {
                HandlerKey::new(HandlerKind::DraftPatch, entity_set.as_str())
            }
            Self::Event(message) => HandlerKey::new(
                HandlerKind::Event,
                event_name(&message.service, &message.event),
            ),
        }
    }
}

/// What a handler produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Result set of a read
    Rows(Vec<Row>),
    /// The draft patch may proceed
    Patched(LazyReport),
    /// The event is acknowledged
    Completed(ReconcileReport),
}

// ============================================================================
// HANDLER TRAITS
// ============================================================================

#[async_trait]
pub trait ReadHandler: Send + Sync {
    async fn on_read(&self, caller: &CallerContext, query: &ScopedQuery) -> ReplicaResult<Vec<Row>>;
}

#[async_trait]
pub trait DraftPatchHandler: Send + Sync {
    async fn before_patch(
        &self,
        caller: &CallerContext,
        references: &[OrderReference],
    ) -> ReplicaResult<LazyReport>;
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, message: &InboundMessage) -> ReplicaResult<ReconcileReport>;
}

#[async_trait]
impl ReadHandler for ReadThroughGateway {
    async fn on_read(&self, caller: &CallerContext, query: &ScopedQuery) -> ReplicaResult<Vec<Row>> {
        self.read(caller, query).await
    }
}

#[async_trait]
impl DraftPatchHandler for LazyReplicationTrigger {
    async fn before_patch(
        &self,
        caller: &CallerContext,
        references: &[OrderReference],
    ) -> ReplicaResult<LazyReport> {
        self.ensure_replicated(caller, references).await
    }
}

#[async_trait]
impl EventHandler for ReconciliationProcessor {
    async fn on_event(&self, message: &InboundMessage) -> ReplicaResult<ReconcileReport> {
        self.process(&message.payload).await
    }
}

#[derive(Clone)]
enum Registered {
    Read(Arc<dyn ReadHandler>),
    DraftPatch(Arc<dyn DraftPatchHandler>),
    Event(Arc<dyn EventHandler>),
}

// ============================================================================
// DISPATCH TABLE
// ============================================================================

/// Handlers keyed by (kind, name).
#[derive(Clone, Default)]
pub struct DispatchTable {
    handlers: HashMap<HandlerKey, Registered>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a read handler for an entity set. Replaces any earlier one.
    pub fn on_read(mut self, entity_set: impl Into<String>, handler: Arc<dyn ReadHandler>) -> Self {
        self.handlers.insert(
            HandlerKey::new(HandlerKind::Read, entity_set),
            Registered::Read(handler),
        );
        self
    }

    /// Register a before-patch handler for a draft entity set.
    pub fn before_patch(
        mut self,
        entity_set: impl Into<String>,
        handler: Arc<dyn DraftPatchHandler>,
    ) -> Self {
        self.handlers.insert(
            HandlerKey::new(HandlerKind::DraftPatch, entity_set),
            Registered::DraftPatch(handler),
        );
        self
    }

    /// Register a handler for a topic of a messaging service.
    pub fn on_event(mut self, service: &str, event: &str, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(
            HandlerKey::new(HandlerKind::Event, event_name(service, event)),
            Registered::Event(handler),
        );
        self
    }

    pub fn contains(&self, key: &HandlerKey) -> bool {
        self.handlers.contains_key(key)
    }

    /// Registered keys, sorted for stable output.
    pub fn keys(&self) -> Vec<HandlerKey> {
        let mut keys: Vec<HandlerKey> = self.handlers.keys().cloned().collect();
        keys.sort_by(|a, b| (a.kind as u8, &a.name).cmp(&(b.kind as u8, &b.name)));
        keys
    }

    /// Route a request to its handler.
    ///
    /// # Errors
    ///
    /// `Event(UnknownHandler)` if nothing is registered under the request's
    /// key; otherwise whatever the handler returns.
    pub async fn dispatch(&self, request: Request) -> ReplicaResult<Outcome> {
        let key = request.key();
        let unknown = || EventError::UnknownHandler {
            kind: key.kind.to_string(),
            name: key.name.clone(),
        };

        match (self.handlers.get(&key), request) {
            (Some(Registered::Read(handler)), Request::Read { caller, query }) => {
                Ok(Outcome::Rows(handler.on_read(&caller, &query).await?))
            }
            (
                Some(Registered::DraftPatch(handler)),
                Request::DraftPatch {
                    caller, references, ..
                },
            ) => Ok(Outcome::Patched(
                handler.before_patch(&caller, &references).await?,
            )),
            (Some(Registered::Event(handler)), Request::Event(message)) => {
                Ok(Outcome::Completed(handler.on_event(&message).await?))
            }
            _ => Err(unknown().into()),
        }
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("handlers", &self.keys())
            .finish()
    }
}

/// Build the table for address replication.
///
/// - reads of the local address set go through the read-through gateway
/// - draft patches of the local order set trigger lazy replication
/// - partner change events reconcile the replica
///
/// The trigger and the processor share one lock table. Their keys never
/// collide: the trigger locks single addresses, the processor whole partners,
/// so a draft patch and a change event for the same partner still interleave.
pub fn address_handlers(
    config: &ReplicaConfig,
    remote: Arc<dyn RemoteSource>,
    local: Arc<dyn LocalStore>,
    sink: Arc<dyn DiagnosticSink>,
) -> DispatchTable {
    let locks = KeyedLocks::new();

    let gateway = ReadThroughGateway::new(config, remote.clone(), local.clone(), sink.clone());
    let trigger = LazyReplicationTrigger::new(config, remote.clone(), local.clone(), sink.clone())
        .with_locks(locks.clone());
    let processor = ReconciliationProcessor::new(config, remote, local, sink).with_locks(locks);

    DispatchTable::new()
        .on_read(config.local_addresses.as_str(), Arc::new(gateway))
        .before_patch(config.local_orders.as_str(), Arc::new(trigger))
        .on_event(&config.messaging_service, &config.change_event, Arc::new(processor))
}
