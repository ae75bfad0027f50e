//! Injected diagnostic sink.
//!
//! Every handler receives an `Arc<dyn DiagnosticSink>` at construction
//! instead of reaching for a global logger. The production sink forwards to
//! `tracing`; tests plug in a capturing sink and assert on what was reported.

use std::fmt;

use crate::error::RemoteError;

/// Severity of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticLevel {
    Info,
    Warn,
}

/// Something a handler absorbed instead of failing.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// The remote read failed or timed out; the local replica answered.
    RemoteFallback { policy: String, error: RemoteError },

    /// Zero or several remote rows matched where exactly one was expected.
    ReplicationAnomaly {
        business_partner: String,
        address_id: String,
        count: usize,
    },

    /// A remote fetch during replication or reconciliation failed; the key
    /// was left untouched.
    RemoteFetchFailed {
        business_partner: String,
        address_id: Option<String>,
        error: RemoteError,
    },

    /// A change event arrived.
    EventReceived { topic: String, payload_bytes: usize },

    /// A change event could not be read; treated as an empty change set.
    MalformedEvent { reason: String },

    /// Local replicas of a partner were brought in line with the remote.
    PartnerReconciled {
        business_partner: String,
        updated: usize,
        tombstoned: usize,
    },
}

impl Diagnostic {
    pub fn level(&self) -> DiagnosticLevel {
        match self {
            Self::RemoteFallback { .. }
            | Self::ReplicationAnomaly { .. }
            | Self::RemoteFetchFailed { .. }
            | Self::MalformedEvent { .. } => DiagnosticLevel::Warn,
            Self::EventReceived { .. } | Self::PartnerReconciled { .. } => DiagnosticLevel::Info,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteFallback { policy, error } => {
                write!(f, "remote read under '{}' failed, serving replica: {}", policy, error)
            }
            Self::ReplicationAnomaly {
                address_id, count, ..
            } => write!(
                f,
                "Unexpected number of shipping addresses for ID '{}': {}",
                address_id, count
            ),
            Self::RemoteFetchFailed {
                business_partner,
                address_id,
                error,
            } => match address_id {
                Some(id) => write!(
                    f,
                    "remote fetch of address '{}' for '{}' failed: {}",
                    id, business_partner, error
                ),
                None => write!(
                    f,
                    "remote fetch of addresses for '{}' failed: {}",
                    business_partner, error
                ),
            },
            Self::EventReceived {
                topic,
                payload_bytes,
            } => write!(f, "received '{}' ({} bytes)", topic, payload_bytes),
            Self::MalformedEvent { reason } => {
                write!(f, "ignoring malformed change event: {}", reason)
            }
            Self::PartnerReconciled {
                business_partner,
                updated,
                tombstoned,
            } => write!(
                f,
                "Updated Addresses for BusinessPartner '{}': {} updated, {} tombstoned",
                business_partner, updated, tombstoned
            ),
        }
    }
}

/// Destination for diagnostics.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Sink forwarding diagnostics to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        match &diagnostic {
            Diagnostic::RemoteFallback { policy, error } => {
                tracing::warn!(policy = %policy, error = %error, "{}", diagnostic);
            }
            Diagnostic::ReplicationAnomaly {
                business_partner,
                address_id,
                count,
            } => {
                tracing::warn!(
                    business_partner = %business_partner,
                    address_id = %address_id,
                    count = *count,
                    "{}",
                    diagnostic
                );
            }
            Diagnostic::RemoteFetchFailed {
                business_partner, ..
            } => {
                tracing::warn!(business_partner = %business_partner, "{}", diagnostic);
            }
            Diagnostic::MalformedEvent { .. } => tracing::warn!("{}", diagnostic),
            Diagnostic::EventReceived { topic, .. } => {
                tracing::info!(topic = %topic, "{}", diagnostic);
            }
            Diagnostic::PartnerReconciled {
                business_partner, ..
            } => {
                tracing::info!(business_partner = %business_partner, "{}", diagnostic);
            }
        }
    }
}
