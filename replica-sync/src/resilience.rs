//! Bounded remote calls with local fallback.
//!
//! A remote call runs under a [`ResiliencePolicy`]: a stable key naming the
//! call site and a single timeout. Timeouts, errors and panics inside the
//! call all become a [`RemoteError`]; the abandoned future is dropped.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::FutureExt;
use replica_core::{RemoteError, ReplicaConfig};

// ============================================================================
// POLICY
// ============================================================================

/// Timeout policy for one remote call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResiliencePolicy {
    key: String,
    timeout: Duration,
}

impl ResiliencePolicy {
    pub fn new(key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            key: key.into(),
            timeout,
        }
    }

    /// Policy configured by [`ReplicaConfig::policy_key`] and
    /// [`ReplicaConfig::remote_timeout`].
    pub fn from_config(config: &ReplicaConfig) -> Self {
        Self::new(config.policy_key.clone(), config.remote_timeout)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Counters for one policy.
///
/// There is no circuit breaking; the counters only make repeated failures
/// observable.
#[derive(Debug, Default)]
pub struct ResilienceMetrics {
    /// Remote calls that answered in time
    pub remote_successes: AtomicU64,

    /// Remote calls abandoned at the timeout
    pub remote_timeouts: AtomicU64,

    /// Remote calls that returned an error or panicked
    pub remote_failures: AtomicU64,

    /// Requests answered by the fallback
    pub fallbacks: AtomicU64,
}

impl ResilienceMetrics {
    /// Create new metrics instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ResilienceSnapshot {
        ResilienceSnapshot {
            remote_successes: self.remote_successes.load(Ordering::Relaxed),
            remote_timeouts: self.remote_timeouts.load(Ordering::Relaxed),
            remote_failures: self.remote_failures.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Result<(), &RemoteError>) {
        let counter = match outcome {
            Ok(()) => &self.remote_successes,
            Err(RemoteError::Timeout { .. }) => &self.remote_timeouts,
            Err(_) => &self.remote_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of resilience metrics at a point in time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResilienceSnapshot {
    pub remote_successes: u64,
    pub remote_timeouts: u64,
    pub remote_failures: u64,
    pub fallbacks: u64,
}

// ============================================================================
// EXECUTION
// ============================================================================

/// Which side answered a [`with_timeout_fallback`] call.
#[derive(Debug, Clone, PartialEq)]
pub enum Served<T> {
    /// The remote answered within the timeout.
    Primary(T),
    /// The remote failed; the fallback answered.
    Fallback { value: T, cause: RemoteError },
}

impl<T> Served<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Primary(value) | Self::Fallback { value, .. } => value,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::Fallback { .. })
    }
}

/// Run a remote call under a policy.
///
/// The call is abandoned when the timeout elapses. A panic inside the call
/// is caught and reported as [`RemoteError::Panicked`].
pub async fn bounded<T, P>(
    policy: &ResiliencePolicy,
    metrics: &ResilienceMetrics,
    primary: P,
) -> Result<T, RemoteError>
where
    P: Future<Output = Result<T, RemoteError>>,
{
    let attempt = AssertUnwindSafe(primary).catch_unwind();
    let result = match tokio::time::timeout(policy.timeout, attempt).await {
        Ok(Ok(result)) => result,
        Ok(Err(panic)) => Err(RemoteError::Panicked {
            reason: panic_message(panic.as_ref()),
        }),
        Err(_) => Err(RemoteError::Timeout {
            policy: policy.key.clone(),
            after: policy.timeout,
        }),
    };
    metrics.record(&result.as_ref().map(|_| ()));
    result
}

/// Run `primary` under a policy; on any remote failure run `fallback` with the
/// cause.
///
/// The fallback has no timeout of its own and its error is returned as is.
pub async fn with_timeout_fallback<T, E, P, F, Fut>(
    policy: &ResiliencePolicy,
    metrics: &ResilienceMetrics,
    primary: P,
    fallback: F,
) -> Result<Served<T>, E>
where
    P: Future<Output = Result<T, RemoteError>>,
    F: FnOnce(RemoteError) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    match bounded(policy, metrics, primary).await {
        Ok(value) => Ok(Served::Primary(value)),
        Err(cause) => {
            metrics.fallbacks.fetch_add(1, Ordering::Relaxed);
            let value = fallback(cause.clone()).await?;
            Ok(Served::Fallback { value, cause })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
