//! Per-key single flight for cache misses.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = Arc<Mutex<HashMap<String, Slot>>>;

#[derive(Debug, Default)]
struct Slot {
    lock: Arc<AsyncMutex<()>>,
    // holders and waiters, including waiters that are yet to be polled
    users: usize,
}

#[derive(Debug, Clone, Default)]
/// A set of async locks, created on demand per key,
/// and removed again once nobody holds or waits for them.
pub(crate) struct KeyedLocks {
    locks: LockMap,
}

impl KeyedLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait until the lock for `key` is acquired.
    ///
    /// Dropping the returned future before it completes
    /// cleans up the same way as dropping the [`KeyGuard`].
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock();
            let slot = locks.entry(key.to_owned()).or_default();
            slot.users += 1;
            slot.lock.clone()
        };
        let mut guard = KeyGuard {
            key: key.to_owned(),
            guard: None,
            locks: self.locks.clone(),
        };
        guard.guard = Some(lock.lock_owned().await);
        guard
    }

    #[cfg(test)]
    pub(crate) fn tracked_keys(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Holds the lock of a single key of [`KeyedLocks`] until dropped.
pub(crate) struct KeyGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl std::fmt::Debug for KeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGuard")
            .field("key", &self.key)
            .field("acquired", &self.guard.is_some())
            .finish()
    }
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock();
        drop(self.guard.take());
        if let Some(slot) = locks.get_mut(&self.key) {
            slot.users -= 1;
            if slot.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}
