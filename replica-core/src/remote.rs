//! Remote system-of-record boundary.

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::query::ScopedQuery;
use crate::row::Row;

/// Client for the authoritative remote source.
///
/// Calls may be slow or fail; callers bound them with a timeout and decide
/// how to degrade. Implementations must be cancel-safe: a call dropped
/// mid-flight must not leave shared state behind.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Run a filtered read, returning rows in the order the remote chose.
    async fn run(&self, query: &ScopedQuery) -> Result<Vec<Row>, RemoteError>;
}
