//! Per-key async locks.
//!
//! Serializes lazy replication per (partner, address) and reconciliation per
//! partner. Locks for unrelated keys never contend. Entries are removed once
//! no task holds or waits for them.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use replica_core::BusinessPartnerId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Key of a replication critical section.
#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum LockKey {
    /// One address of one partner - lazy replication
    Address {
        partner: BusinessPartnerId,
        address_id: String,
    },
    /// Every replica of one partner - reconciliation
    Partner(BusinessPartnerId),
}

impl LockKey {
    pub fn address(partner: &BusinessPartnerId, address_id: &str) -> Self {
        Self::Address {
            partner: partner.clone(),
            address_id: address_id.to_string(),
        }
    }

    pub fn partner(partner: &BusinessPartnerId) -> Self {
        Self::Partner(partner.clone())
    }
}

impl fmt::Display for LockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Address {
                partner,
                address_id,
            } => write!(f, "{}/{}", partner, address_id),
            Self::Partner(partner) => write!(f, "{}", partner),
        }
    }
}

type LockTable = DashMap<LockKey, Arc<Mutex<()>>>;

/// Table of async locks keyed by [`LockKey`].
#[derive(Debug, Default, Clone)]
pub struct KeyedLocks {
    locks: Arc<LockTable>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a key.
    pub async fn acquire(&self, key: LockKey) -> KeyGuard {
        // DashMap's entry API handles the get-or-insert atomically
        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let guard = lock.lock_owned().await;
        KeyGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Number of keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key; released on drop.
#[must_use = "the key is released as soon as the guard is dropped"]
pub struct KeyGuard {
    key: LockKey,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<LockTable>,
}

impl KeyGuard {
    pub fn key(&self) -> &LockKey {
        &self.key
    }
}

impl fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyGuard").field("key", &self.key).finish()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        // Release first so the table's Arc is the only one left when idle.
        self.guard.take();
        self.locks
            .remove_if(&self.key, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn bp(id: &str) -> BusinessPartnerId {
        BusinessPartnerId::new(id)
    }

    #[tokio::test]
    async fn test_guard_removes_idle_entry() {
        let locks = KeyedLocks::new();
        {
            let guard = locks.acquire(LockKey::partner(&bp("BP1"))).await;
            assert_eq!(guard.key(), &LockKey::Partner(bp("BP1")));
            assert_eq!(locks.len(), 1);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.acquire(LockKey::address(&bp("BP1"), "A1")).await;
        let _b = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(LockKey::address(&bp("BP1"), "A2")),
        )
        .await
        .expect("different key must not block");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_partner_key_does_not_cover_its_addresses() {
        let locks = KeyedLocks::new();
        let _partner = locks.acquire(LockKey::partner(&bp("BP1"))).await;
        let _address = tokio::time::timeout(
            Duration::from_millis(50),
            locks.acquire(LockKey::address(&bp("BP1"), "A1")),
        )
        .await
        .expect("partner and address keys are independent");
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_same_key_is_serialized() {
        let locks = KeyedLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let locks = locks.clone();
            let inside = Arc::clone(&inside);
            let max_inside = Arc::clone(&max_inside);
            tasks.push(tokio::spawn(async move {
                let _guard = locks.acquire(LockKey::partner(&bp("BP1"))).await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                max_inside.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[test]
    fn test_lock_key_display() {
        assert_eq!(LockKey::address(&bp("BP1"), "A1").to_string(), "BP1/A1");
        assert_eq!(LockKey::partner(&bp("BP1")).to_string(), "BP1");
    }
}
