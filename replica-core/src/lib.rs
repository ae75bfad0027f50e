//! Replica Core - Rows, Queries and Errors
//!
//! Plain data types shared by the storage, event and sync crates:
//! field-bag rows and the typed address view, the scoped query builder,
//! caller identity, configuration, the injected diagnostic sink and the
//! remote source boundary. No handler logic lives here.

pub mod config;
pub mod constants;
pub mod diagnostics;
pub mod error;
pub mod identity;
pub mod query;
pub mod remote;
pub mod row;

pub use config::ReplicaConfig;
pub use diagnostics::{Diagnostic, DiagnosticLevel, DiagnosticSink, TracingSink};
pub use error::{
    ConfigError, EventError, RemoteError, ReplicaError, ReplicaResult, StorageError,
};
pub use identity::{BusinessPartnerId, CallerContext, BUSINESS_PARTNER_ATTRIBUTE};
pub use query::{Columns, EntitySet, FilterOperator, OrderBy, Predicate, ScopedQuery};
pub use remote::RemoteSource;
pub use row::{
    replace_from_remote, AddressRecord, OrderReference, Row, RowExt, FIELD_BUSINESS_PARTNER,
    FIELD_ID, FIELD_TOMBSTONE,
};
