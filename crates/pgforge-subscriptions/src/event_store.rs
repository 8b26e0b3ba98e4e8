//! The event store contract (§1, §6): an external collaborator. Its
//! storage engine, write path and transactional guarantees are out of
//! scope here — this crate only consumes a cold, backpressured stream
//! of already-persisted events.

use std::time::Duration;
use uuid::Uuid;

use futures::stream::BoxStream;
use pgforge_core::error::Result;

use crate::event::{GlobalEventOrder, PersistedEvent};

/// Parameters for one `poll_events` call, gathered into a struct
/// rather than threaded positionally since most of them are fixed
/// per-subscription configuration rather than varying per call.
#[derive(Debug, Clone)]
pub struct PollParameters {
    pub poll_batch_size: u32,
    pub poll_interval: Duration,
    pub tenant_filter: Option<Uuid>,
}

/// Source of persisted events for batched subscriptions to pull from.
/// Implementations decide how demand is satisfied (long-poll, notify
/// channel, plain interval scan); callers only drive the returned
/// stream forward at their own pace.
pub trait EventStore: Send + Sync {
    /// Open a cold stream of events of `aggregate_type` starting at
    /// `from_order` inclusive. The stream never terminates under
    /// normal operation; it is dropped by the caller to stop polling.
    fn poll_events(
        &self,
        aggregate_type: String,
        from_order: GlobalEventOrder,
        subscriber_id: String,
        parameters: PollParameters,
    ) -> BoxStream<'static, Result<PersistedEvent>>;
}
