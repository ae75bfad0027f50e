//! Constants for address replication
//!
//! Defaults used by [`crate::ReplicaConfig`]. Centralizing them keeps the
//! environment overrides and the tests pointing at one place.

// ============================================================================
// RESILIENCE
// ============================================================================

/// Default bound on a remote read before falling back to the replica.
pub const DEFAULT_REMOTE_TIMEOUT_MS: u64 = 10_000;

/// Default resilience policy key for the address read-through.
pub const DEFAULT_POLICY_KEY: &str = "AdminServiceAddressHandler";

// ============================================================================
// ENTITY SETS
// ============================================================================

/// Remote entity set holding the authoritative addresses.
pub const DEFAULT_REMOTE_ADDRESSES: &str = "API_BUSINESS_PARTNER.A_BusinessPartnerAddress";

/// Local entity set holding the address replicas.
pub const DEFAULT_LOCAL_ADDRESSES: &str = "AdminService.Addresses";

/// Local entity set whose draft patches trigger lazy replication.
pub const DEFAULT_LOCAL_ORDERS: &str = "AdminService.Orders";

// ============================================================================
// MESSAGING
// ============================================================================

/// Messaging service delivering business partner change events.
pub const DEFAULT_MESSAGING_SERVICE: &str = "bupa-messaging";

/// Topic of the business partner change event.
pub const DEFAULT_CHANGE_EVENT: &str = "BO/BusinessPartner/Changed";

// ============================================================================
// LOCAL STORE
// ============================================================================

/// Default LMDB map size for the persistent replica, in megabytes.
pub const DEFAULT_LMDB_MAP_SIZE_MB: usize = 64;
