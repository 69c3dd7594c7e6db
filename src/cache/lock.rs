//! Process-local keyed locks.
//!
//! The cache serializes work per source hash and the registry manager per
//! `registry:name`. Both only need to coordinate tasks inside one process, so the
//! locks are async mutexes stored in a [`DashMap`] keyed by name. An entry lives only
//! while some task holds or waits for it. Cross-process coordination happens one level
//! up, in the installer's project lock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A set of named async mutexes.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mutex(&self, key: &str) -> Arc<Mutex<()>> {
        // Clone the Arc out so the DashMap shard is not held across an await
        self.locks.entry(key.to_string()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Wait for exclusive access to `key`. The lock is held until the guard drops.
    pub async fn acquire(&self, key: &str) -> KeyedGuard<'_> {
        let mutex = self.mutex(key);
        tracing::trace!(target: "cache", "Waiting for lock {}", key);
        KeyedGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Take the lock only if nobody holds it.
    pub fn try_acquire(&self, key: &str) -> Option<KeyedGuard<'_>> {
        let guard = self.mutex(key).try_lock_owned().ok();
        let guard = KeyedGuard {
            locks: self,
            key: key.to_string(),
            guard,
        };
        guard.guard.is_some().then_some(guard)
    }

    /// Number of keys currently held or waited on.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one key of a [`KeyedLocks`].
///
/// Dropping the guard releases the lock and forgets the key when no other task
/// holds or waits for it.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a clone of the Arc, so the map's copy is the last one only when idle
        self.locks.locks.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
