//! The common subscription lifecycle contract (4.G), independent of
//! batching strategy.

use async_trait::async_trait;
use uuid::Uuid;

use pgforge_core::error::Result;

/// Lifecycle and identity shared by every event store subscription.
/// [`crate::BatchedSubscription`] is this crate's only implementation;
/// the trait exists so callers can hold subscriptions of different
/// batching strategies behind one handle.
#[async_trait]
pub trait EventStoreSubscription: Send + Sync {
    fn subscriber_id(&self) -> &str;

    fn aggregate_type(&self) -> &str;

    /// `Some(tenant)` restricts delivery to events tagged with that
    /// tenant; `None` delivers every event of `aggregate_type`.
    fn only_include_events_for_tenant(&self) -> Option<Uuid>;

    /// Begin pulling and delivering events. Idempotent.
    async fn start(&self) -> Result<()>;

    /// Stop pulling, draining in-flight work before persisting the
    /// resume point. Idempotent.
    async fn stop(&self) -> Result<()>;

    /// Whether `start` has been called and `stop` has not completed.
    fn is_started(&self) -> bool;

    /// Whether the subscription is currently delivering events (a
    /// started subscription that has suspended, e.g. between polls,
    /// is still started but may report `false` here).
    fn is_active(&self) -> bool;

    /// Stop this subscription. Distinct from `reset_from`: the resume
    /// point is monotonic nondecreasing except via an explicit
    /// `reset_from` call, so `unsubscribe` leaves it untouched — a
    /// future `start` under the same id resumes where it left off.
    async fn unsubscribe(&self) -> Result<()>;

    /// Whether only one subscriber with this id may run across the
    /// whole fleet at a time. Batched subscriptions are not exclusive:
    /// any number of nodes may run the same `subscriber_id` and each
    /// gets its own resume point progress (there is exactly one
    /// resume point per `(subscriber_id, aggregate_type)`, shared by
    /// however many local instances happen to poll it, same as any
    /// other durable consumer group).
    fn is_exclusive(&self) -> bool {
        false
    }

    /// Whether event delivery participates in the caller's database
    /// transaction. Batched subscriptions deliver out of band and
    /// never do.
    fn is_in_transaction(&self) -> bool {
        false
    }
}
