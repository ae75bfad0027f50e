//! Replication configuration.
//!
//! Process-wide state is limited to this configuration. It is loaded from
//! environment variables with defaults from [`crate::constants`].

use std::time::Duration;

use crate::constants::{
    DEFAULT_CHANGE_EVENT, DEFAULT_LOCAL_ADDRESSES, DEFAULT_LOCAL_ORDERS,
    DEFAULT_MESSAGING_SERVICE, DEFAULT_POLICY_KEY, DEFAULT_REMOTE_ADDRESSES,
    DEFAULT_REMOTE_TIMEOUT_MS,
};
use crate::error::ConfigError;
use crate::query::EntitySet;

/// Configuration shared by the read-through gateway, the lazy replication
/// trigger and the reconciliation processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaConfig {
    /// Upper bound on a remote read before the local fallback runs.
    pub remote_timeout: Duration,

    /// Stable key identifying the read-through call site, so repeated
    /// failures can be attributed to it.
    pub policy_key: String,

    /// Remote entity set holding the authoritative addresses.
    pub remote_addresses: EntitySet,

    /// Local entity set holding the replicas.
    pub local_addresses: EntitySet,

    /// Local entity set whose draft patches reference addresses.
    pub local_orders: EntitySet,

    /// Messaging service delivering change events.
    pub messaging_service: String,

    /// Change event topic.
    pub change_event: String,

    /// Serialize lazy replication per (partner, address) and reconciliation
    /// per partner.
    pub serialize_per_key: bool,
}

impl Default for ReplicaConfig {
    fn default() -> Self {
        Self {
            remote_timeout: Duration::from_millis(DEFAULT_REMOTE_TIMEOUT_MS),
            policy_key: DEFAULT_POLICY_KEY.to_string(),
            remote_addresses: EntitySet::new(DEFAULT_REMOTE_ADDRESSES),
            local_addresses: EntitySet::new(DEFAULT_LOCAL_ADDRESSES),
            local_orders: EntitySet::new(DEFAULT_LOCAL_ORDERS),
            messaging_service: DEFAULT_MESSAGING_SERVICE.to_string(),
            change_event: DEFAULT_CHANGE_EVENT.to_string(),
            serialize_per_key: true,
        }
    }
}

impl ReplicaConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create ReplicaConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `REPLICA_REMOTE_TIMEOUT_MS`: Remote read bound (default: 10000)
    /// - `REPLICA_POLICY_KEY`: Resilience policy key (default: "AdminServiceAddressHandler")
    /// - `REPLICA_REMOTE_ADDRESSES`: Remote entity set
    /// - `REPLICA_LOCAL_ADDRESSES`: Local replica entity set
    /// - `REPLICA_LOCAL_ORDERS`: Local order entity set
    /// - `REPLICA_MESSAGING_SERVICE`: Messaging service name (default: "bupa-messaging")
    /// - `REPLICA_CHANGE_EVENT`: Change event topic (default: "BO/BusinessPartner/Changed")
    /// - `REPLICA_SERIALIZE_PER_KEY`: "false" disables keyed locks (default: true)
    ///
    /// Unparsable numbers fall back to their defaults; call
    /// [`ReplicaConfig::validate`] afterwards to reject unusable values.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let remote_timeout = std::env::var("REPLICA_REMOTE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.remote_timeout);

        let policy_key = std::env::var("REPLICA_POLICY_KEY").unwrap_or(defaults.policy_key);

        let remote_addresses = std::env::var("REPLICA_REMOTE_ADDRESSES")
            .map(EntitySet::new)
            .unwrap_or(defaults.remote_addresses);

        let local_addresses = std::env::var("REPLICA_LOCAL_ADDRESSES")
            .map(EntitySet::new)
            .unwrap_or(defaults.local_addresses);

        let local_orders = std::env::var("REPLICA_LOCAL_ORDERS")
            .map(EntitySet::new)
            .unwrap_or(defaults.local_orders);

        let messaging_service =
            std::env::var("REPLICA_MESSAGING_SERVICE").unwrap_or(defaults.messaging_service);

        let change_event = std::env::var("REPLICA_CHANGE_EVENT").unwrap_or(defaults.change_event);

        let serialize_per_key = std::env::var("REPLICA_SERIALIZE_PER_KEY")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.serialize_per_key);

        Self {
            remote_timeout,
            policy_key,
            remote_addresses,
            local_addresses,
            local_orders,
            messaging_service,
            change_event,
            serialize_per_key,
        }
    }

    /// Set the remote read bound.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Set the resilience policy key.
    pub fn with_policy_key(mut self, key: impl Into<String>) -> Self {
        self.policy_key = key.into();
        self
    }

    /// Set the remote and local address entity sets.
    pub fn with_entity_sets(mut self, remote: EntitySet, local: EntitySet) -> Self {
        self.remote_addresses = remote;
        self.local_addresses = local;
        self
    }

    /// Enable or disable keyed locks.
    pub fn with_serialize_per_key(mut self, enabled: bool) -> Self {
        self.serialize_per_key = enabled;
        self
    }

    /// Reject configurations the handlers cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "remote_timeout".to_string(),
                value: format!("{:?}", self.remote_timeout),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.policy_key.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "policy_key".to_string(),
            });
        }
        if self.remote_addresses == self.local_addresses {
            return Err(ConfigError::InvalidValue {
                field: "local_addresses".to_string(),
                value: self.local_addresses.to_string(),
                reason: "must differ from the remote entity set".to_string(),
            });
        }
        for (field, value) in [
            ("messaging_service", &self.messaging_service),
            ("change_event", &self.change_event),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::MissingRequired {
                    field: field.to_string(),
                });
            }
        }
        Ok(())
    }
}
