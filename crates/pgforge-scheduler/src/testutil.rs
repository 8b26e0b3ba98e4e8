//! An in-memory [`FencedLockManager`] for exercising scheduler
//! failover logic without a real distributed lock. Never use this in
//! production: there is no fencing, no cross-process coordination,
//! and leadership is whatever the test last granted.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use pgforge_core::lock::{FencedLockManager, LockCallbacks};

struct Contender {
    callbacks: LockCallbacks,
    is_leader: bool,
}

/// A single-process fenced-lock double. Whoever last called
/// [`grant`](Self::grant) for a lock name is leader until
/// [`revoke`](Self::revoke)d or cancelled.
pub struct InMemoryFencedLock {
    contenders: RwLock<HashMap<String, Contender>>,
}

impl InMemoryFencedLock {
    pub fn new() -> Self {
        Self {
            contenders: RwLock::new(HashMap::new()),
        }
    }

    /// Grant leadership for `lock_name` to its registered contender,
    /// firing `on_acquired`. No-op if no contender is registered or it
    /// already holds the lock.
    pub async fn grant(&self, lock_name: &str) {
        let callbacks = {
            let mut contenders = self.contenders.write();
            let Some(entry) = contenders.get_mut(lock_name) else {
                return;
            };
            if entry.is_leader {
                return;
            }
            entry.is_leader = true;
            entry.callbacks.clone()
        };
        (callbacks.on_acquired)();
    }

    /// Revoke leadership for `lock_name`, firing `on_released` if it
    /// was held. No-op otherwise.
    pub async fn revoke(&self, lock_name: &str) {
        let callbacks = {
            let mut contenders = self.contenders.write();
            let Some(entry) = contenders.get_mut(lock_name) else {
                return;
            };
            if !entry.is_leader {
                return;
            }
            entry.is_leader = false;
            entry.callbacks.clone()
        };
        (callbacks.on_released)();
    }
}

impl Default for InMemoryFencedLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FencedLockManager for InMemoryFencedLock {
    async fn acquire_lock_async(&self, lock_name: &str, callbacks: LockCallbacks) {
        self.contenders.write().insert(
            lock_name.to_string(),
            Contender {
                callbacks,
                is_leader: false,
            },
        );
    }

    async fn cancel_async_lock_acquiring(&self, lock_name: &str) {
        self.revoke(lock_name).await;
        self.contenders.write().remove(lock_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn grant_fires_on_acquired_once() {
        let lock = InMemoryFencedLock::new();
        let acquired = Arc::new(AtomicUsize::new(0));
        let acquired_clone = acquired.clone();

        lock.acquire_lock_async(
            "test-lock",
            LockCallbacks::new(move || { acquired_clone.fetch_add(1, Ordering::SeqCst); }, || {}),
        )
        .await;

        lock.grant("test-lock").await;
        lock.grant("test-lock").await;

        assert_eq!(acquired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn revoke_fires_on_released_only_when_held() {
        let lock = InMemoryFencedLock::new();
        let released = Arc::new(AtomicUsize::new(0));
        let released_clone = released.clone();

        lock.acquire_lock_async(
            "test-lock",
            LockCallbacks::new(|| {}, move || { released_clone.fetch_add(1, Ordering::SeqCst); }),
        )
        .await;

        lock.revoke("test-lock").await;
        assert_eq!(released.load(Ordering::SeqCst), 0);

        lock.grant("test-lock").await;
        lock.revoke("test-lock").await;
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
