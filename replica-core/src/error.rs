//! Error types for replication operations

use std::time::Duration;
use thiserror::Error;

/// Local store errors.
///
/// These are the only failures besides [`ReplicaError::Unauthorized`] that
/// are surfaced to the caller of a read, patch or change event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Row in {entity_set} is missing its key field '{field}'")]
    MissingKey { entity_set: String, field: String },

    #[error("Upsert into {entity_set} failed: {reason}")]
    UpsertFailed { entity_set: String, reason: String },

    #[error("Select from {entity_set} failed: {reason}")]
    SelectFailed { entity_set: String, reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Remote system-of-record errors.
///
/// Never surfaced for reads: the read-through gateway recovers from every
/// variant by falling back to the local store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("Remote call under policy '{policy}' timed out after {after:?}")]
    Timeout { policy: String, after: Duration },

    #[error("Remote connection failed: {reason}")]
    Connection { reason: String },

    #[error("Remote protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Remote call panicked: {reason}")]
    Panicked { reason: String },
}

/// Change event errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Malformed event payload: {reason}")]
    Malformed { reason: String },

    #[error("No handler registered for {kind} '{name}'")]
    UnknownHandler { kind: String, name: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all replication errors.
#[derive(Debug, Clone, Error)]
pub enum ReplicaError {
    #[error("Unauthorized: caller context has no '{attribute}' attribute")]
    Unauthorized { attribute: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("Event error: {0}")]
    Event(#[from] EventError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ReplicaError {
    /// Whether this error should reach the caller as a failed request.
    ///
    /// Remote and event errors are absorbed by fallbacks and diagnostics.
    pub fn is_caller_visible(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Storage(_))
    }
}

/// Result type alias for replication operations.
pub type ReplicaResult<T> = Result<T, ReplicaError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_missing_key() {
        let err = StorageError::MissingKey {
            entity_set: "AdminService.Addresses".to_string(),
            field: "ID".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("AdminService.Addresses"));
        assert!(msg.contains("'ID'"));
    }

    #[test]
    fn test_remote_error_display_timeout() {
        let err = RemoteError::Timeout {
            policy: "addresses.read".to_string(),
            after: Duration::from_secs(10),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("timed out"));
        assert!(msg.contains("addresses.read"));
        assert!(msg.contains("10s"));
    }

    #[test]
    fn test_unauthorized_display_names_attribute() {
        let err = ReplicaError::Unauthorized {
            attribute: "businessPartner".to_string(),
        };
        assert!(format!("{}", err).contains("businessPartner"));
    }

    #[test]
    fn test_replica_error_from_variants() {
        let storage = ReplicaError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, ReplicaError::Storage(_)));

        let remote = ReplicaError::from(RemoteError::Connection {
            reason: "refused".to_string(),
        });
        assert!(matches!(remote, ReplicaError::Remote(_)));

        let event = ReplicaError::from(EventError::Malformed {
            reason: "eof".to_string(),
        });
        assert!(matches!(event, ReplicaError::Event(_)));

        let config = ReplicaError::from(ConfigError::MissingRequired {
            field: "policy_key".to_string(),
        });
        assert!(matches!(config, ReplicaError::Config(_)));
    }

    #[test]
    fn test_caller_visibility() {
        assert!(ReplicaError::Unauthorized {
            attribute: "businessPartner".to_string()
        }
        .is_caller_visible());
        assert!(ReplicaError::from(StorageError::LockPoisoned).is_caller_visible());
        assert!(!ReplicaError::from(RemoteError::Protocol {
            reason: "bad status".to_string()
        })
        .is_caller_visible());
        assert!(!ReplicaError::from(EventError::Malformed {
            reason: "eof".to_string()
        })
        .is_caller_visible());
    }
}
