//! Fenced lock interface consumed by the scheduler (4.B).
//!
//! The lock's own storage/fencing implementation is an external
//! collaborator and out of scope for this crate (§1). This module
//! only defines the contract the scheduler drives: exactly one holder
//! across all contenders for a given lock name, with acquired/released
//! callbacks that may fire on any thread and may interleave any number
//! of times over a scheduler's lifetime.

use async_trait::async_trait;
use std::sync::Arc;

/// Callbacks invoked by a [`FencedLockManager`] when this node's
/// standing as leader for a given lock name changes. Modeled as plain
/// closures rather than a trait object with named methods, matching
/// how this workspace's event bus hands subscribers a boxed `Fn`
/// rather than a richer interface, since the implementation living on
/// the other side of this boundary is out of scope here.
#[derive(Clone)]
pub struct LockCallbacks {
    pub on_acquired: Arc<dyn Fn() + Send + Sync>,
    pub on_released: Arc<dyn Fn() + Send + Sync>,
}

impl LockCallbacks {
    pub fn new(
        on_acquired: impl Fn() + Send + Sync + 'static,
        on_released: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_acquired: Arc::new(on_acquired),
            on_released: Arc::new(on_released),
        }
    }
}

/// Async single-leader election keyed by lock name.
///
/// Implementations are expected to run a background contender per
/// `acquire_lock_async` call; callers must not assume same-thread
/// delivery of callbacks, nor that `on_acquired`/`on_released` alternate
/// strictly (a release due to IO fault, host eviction, or explicit
/// cancellation may be followed by another acquisition without the
/// caller observing every intermediate state).
#[async_trait]
pub trait FencedLockManager: Send + Sync {
    /// Start (or restart) a background contender for `lock_name`.
    /// Idempotent per lock name: calling this again while already
    /// contending simply replaces the registered callbacks.
    async fn acquire_lock_async(&self, lock_name: &str, callbacks: LockCallbacks);

    /// Withdraw this node's contention for `lock_name`. If this node
    /// currently holds the lock, it is released and `on_released`
    /// fires before this call returns.
    async fn cancel_async_lock_acquiring(&self, lock_name: &str);
}
