//! # pgforge-subscriptions
//!
//! A durable, batched, at-least-once event subscription engine (§4.G)
//! that pulls from an external [`EventStore`] and checkpoints resume
//! progress via `pgforge-db`'s `durable_subscription_resume_points`
//! table.

pub mod batched;
pub mod event;
pub mod event_store;
pub mod subscription;

pub use batched::{BatchProcessor, BatchedSubscription, ResetProcessor};
pub use event::{GlobalEventOrder, PersistedEvent};
pub use event_store::{EventStore, PollParameters};
pub use subscription::EventStoreSubscription;
