//! The batching pull-loop bridge between an [`EventStore`] and a
//! handler function (§4.G). Accumulates events up to
//! `max_batch_size` or until `max_latency` elapses, whichever comes
//! first, hands the batch to the processor, and tracks the highest
//! acknowledged order in memory. The resume point itself is persisted
//! only on `stop` and `reset_from`, not after every batch — at-least-
//! once delivery after a crash without a clean stop is the documented
//! tradeoff, not a gap to close here.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use pgforge_core::config::SubscriptionConfig;
use pgforge_core::error::{Error, Result};
use pgforge_db::resume_point_repository::DurableSubscriptionRepository;

use crate::event::{GlobalEventOrder, PersistedEvent};
use crate::event_store::{EventStore, PollParameters};
use crate::subscription::EventStoreSubscription;

/// A batch handler. Returning `Err` fails the whole batch: it is
/// logged and retried on the next iteration rather than advancing the
/// in-memory high-water mark.
pub type BatchProcessor =
    Arc<dyn Fn(Vec<PersistedEvent>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

/// Callback run by `reset_from` once the new resume point has been
/// persisted, before the subscription restarts.
pub type ResetProcessor = Arc<dyn Fn(GlobalEventOrder) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

enum ControlEvent {
    Stop,
}

/// A durable, at-least-once batched subscription over one
/// `(subscriber_id, aggregate_type)` pair (§4.G).
pub struct BatchedSubscription {
    subscriber_id: String,
    aggregate_type: String,
    tenant_filter: Option<Uuid>,
    config: SubscriptionConfig,

    store: Arc<dyn EventStore>,
    resume_points: Arc<dyn DurableSubscriptionRepository>,
    processor: BatchProcessor,

    /// Highest acknowledged `globalOrder + 1`, updated in memory after
    /// every successfully processed batch. Only written to the
    /// repository on `stop` (which `unsubscribe` also goes through) and
    /// `reset_from`.
    high_water_mark: Arc<AtomicI64>,
    started: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    control_tx: RwLock<Option<mpsc::UnboundedSender<ControlEvent>>>,
    pull_task: RwLock<Option<JoinHandle<()>>>,
}

impl BatchedSubscription {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        subscriber_id: impl Into<String>,
        aggregate_type: impl Into<String>,
        store: Arc<dyn EventStore>,
        resume_points: Arc<dyn DurableSubscriptionRepository>,
        processor: BatchProcessor,
        config: SubscriptionConfig,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            aggregate_type: aggregate_type.into(),
            tenant_filter: None,
            config,
            store,
            resume_points,
            processor,
            high_water_mark: Arc::new(AtomicI64::new(GlobalEventOrder::BEGINNING.0)),
            started: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicBool::new(false)),
            control_tx: RwLock::new(None),
            pull_task: RwLock::new(None),
        }
    }

    pub fn with_tenant_filter(mut self, tenant_id: Uuid) -> Self {
        self.tenant_filter = Some(tenant_id);
        self
    }

    /// If started: stop (persisting whatever was tracked up to that
    /// point), override the resume point to `from_order`, run
    /// `processor` against the new order, then start again. If
    /// stopped: same, minus the stop/start lifecycle (§4.G
    /// `resetFrom`).
    pub async fn reset_from(&self, from_order: GlobalEventOrder, processor: Option<ResetProcessor>) -> Result<()> {
        let was_started = self.is_started();
        if was_started {
            self.stop().await?;
        }

        self.high_water_mark.store(from_order.0, Ordering::SeqCst);
        self.resume_points
            .save_resume_point(&self.subscriber_id, &self.aggregate_type, from_order.0)
            .await?;

        if let Some(processor) = processor {
            processor(from_order).await?;
        }

        if was_started {
            self.start().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventStoreSubscription for BatchedSubscription {
    fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    fn only_include_events_for_tenant(&self) -> Option<Uuid> {
        self.tenant_filter
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let starting_order = self
            .resume_points
            .get_or_create_resume_point(&self.subscriber_id, &self.aggregate_type, GlobalEventOrder::BEGINNING.0)
            .await?;
        self.high_water_mark.store(starting_order, Ordering::SeqCst);

        let (tx, mut control_rx) = mpsc::unbounded_channel::<ControlEvent>();
        *self.control_tx.write().await = Some(tx);

        let parameters = PollParameters {
            poll_batch_size: self.config.poll_batch_size,
            poll_interval: self.config.poll_interval(),
            tenant_filter: self.tenant_filter,
        };
        let mut stream = self.store.poll_events(
            self.aggregate_type.clone(),
            GlobalEventOrder(starting_order),
            self.subscriber_id.clone(),
            parameters,
        );

        let max_batch_size = self.config.max_batch_size;
        let max_latency = self.config.max_latency();
        let stop_drain = self.config.stop_drain();
        let subscriber_id = self.subscriber_id.clone();
        let processor = self.processor.clone();
        let high_water_mark = self.high_water_mark.clone();
        let active = self.active.clone();
        let started = self.started.clone();

        let handle = tokio::spawn(async move {
            let mut batch: Vec<PersistedEvent> = Vec::with_capacity(max_batch_size);
            let mut stopping = false;

            'outer: loop {
                active.store(false, Ordering::SeqCst);
                let deadline = tokio::time::sleep(max_latency);
                tokio::pin!(deadline);

                while batch.len() < max_batch_size {
                    tokio::select! {
                        biased;

                        control = control_rx.recv() => {
                            match control {
                                Some(ControlEvent::Stop) | None => {
                                    stopping = true;
                                    break;
                                }
                            }
                        }
                        item = stream.next() => {
                            match item {
                                Some(Ok(event)) => {
                                    active.store(true, Ordering::SeqCst);
                                    batch.push(event);
                                }
                                Some(Err(e)) => {
                                    // §7 SubscriptionEventFailure, per-event path:
                                    // log and skip, demand keeps flowing.
                                    log_absorbed(&e, "event store stream yielded an error, skipping event");
                                }
                                None => {
                                    stopping = true;
                                    break;
                                }
                            }
                        }
                        _ = &mut deadline => {
                            break;
                        }
                    }
                }

                if !batch.is_empty() {
                    if let Err(e) = apply_batch(&processor, &high_water_mark, &mut batch).await {
                        tracing::warn!(
                            subscriber_id = %subscriber_id,
                            error = %e,
                            "batch processing failed, will retry on next poll"
                        );
                    }
                }

                if stopping {
                    let drain = tokio::time::timeout(stop_drain, async {
                        while let Some(Ok(event)) = stream.next().await {
                            batch.push(event);
                            if batch.len() >= max_batch_size {
                                break;
                            }
                        }
                    });
                    let _ = drain.await;

                    if !batch.is_empty() {
                        let _ = apply_batch(&processor, &high_water_mark, &mut batch).await;
                    }

                    break 'outer;
                }
            }

            active.store(false, Ordering::SeqCst);
            started.store(false, Ordering::SeqCst);
        });

        *self.pull_task.write().await = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if !self.is_started() {
            return Ok(());
        }

        if let Some(tx) = self.control_tx.write().await.take() {
            let _ = tx.send(ControlEvent::Stop);
        }

        if let Some(handle) = self.pull_task.write().await.take() {
            let _ = tokio::time::timeout(self.config.stop_drain() * 2, handle).await;
        }

        self.started.store(false, Ordering::SeqCst);
        self.active.store(false, Ordering::SeqCst);

        self.resume_points
            .save_resume_point(
                &self.subscriber_id,
                &self.aggregate_type,
                self.high_water_mark.load(Ordering::SeqCst),
            )
            .await
    }

    fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn unsubscribe(&self) -> Result<()> {
        // Just stop: the resume point is monotonic nondecreasing except
        // via explicit `reset_from` (§3), and unsubscribe is a distinct
        // lifecycle member from reset, so it leaves the persisted point
        // untouched rather than rewinding it.
        self.stop().await
    }
}

/// Hand `batch` to the processor and, on success, advance
/// `high_water_mark` to `max(globalOrder) + 1` in memory. Does not
/// touch the repository — callers persist at stop/reset.
async fn apply_batch(
    processor: &BatchProcessor,
    high_water_mark: &Arc<AtomicI64>,
    batch: &mut Vec<PersistedEvent>,
) -> Result<()> {
    let highest = batch
        .iter()
        .map(|e| e.global_order)
        .max()
        .unwrap_or(GlobalEventOrder::BEGINNING);

    processor(std::mem::take(batch)).await?;
    high_water_mark.store(highest.next().0, Ordering::SeqCst);
    Ok(())
}

fn log_absorbed(err: &Error, context: &str) {
    if err.is_io() {
        tracing::debug!(error = %err, "{}", context);
    } else {
        tracing::warn!(error = %err, "{}", context);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream::{self, BoxStream};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;
    use tokio::sync::Mutex as AsyncMutex;

    struct VecEventStore {
        events: StdMutex<VecDeque<PersistedEvent>>,
    }

    impl EventStore for VecEventStore {
        fn poll_events(
            &self,
            _aggregate_type: String,
            from_order: GlobalEventOrder,
            _subscriber_id: String,
            _parameters: PollParameters,
        ) -> BoxStream<'static, Result<PersistedEvent>> {
            let remaining: Vec<PersistedEvent> = self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| e.global_order >= from_order)
                .cloned()
                .collect();
            stream::iter(remaining.into_iter().map(Ok)).boxed()
        }
    }

    struct InMemoryResumePoints {
        points: StdMutex<std::collections::HashMap<(String, String), i64>>,
    }

    impl InMemoryResumePoints {
        fn new() -> Self {
            Self {
                points: StdMutex::new(std::collections::HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl DurableSubscriptionRepository for InMemoryResumePoints {
        async fn get_or_create_resume_point(
            &self,
            subscriber_id: &str,
            aggregate_type: &str,
            initial_order: i64,
        ) -> Result<i64> {
            let mut points = self.points.lock().unwrap();
            Ok(*points
                .entry((subscriber_id.to_string(), aggregate_type.to_string()))
                .or_insert(initial_order))
        }

        async fn save_resume_point(
            &self,
            subscriber_id: &str,
            aggregate_type: &str,
            resume_from_and_including: i64,
        ) -> Result<()> {
            self.points.lock().unwrap().insert(
                (subscriber_id.to_string(), aggregate_type.to_string()),
                resume_from_and_including,
            );
            Ok(())
        }

        async fn find(
            &self,
            subscriber_id: &str,
            aggregate_type: &str,
        ) -> Result<Option<pgforge_db::models::SubscriptionResumePointRow>> {
            let points = self.points.lock().unwrap();
            Ok(points
                .get(&(subscriber_id.to_string(), aggregate_type.to_string()))
                .map(|order| pgforge_db::models::SubscriptionResumePointRow {
                    subscriber_id: subscriber_id.to_string(),
                    aggregate_type: aggregate_type.to_string(),
                    resume_from_and_including_global_order: *order,
                    updated_at: chrono::Utc::now(),
                }))
        }
    }

    fn make_event(order: i64) -> PersistedEvent {
        PersistedEvent::new(GlobalEventOrder(order), "order", "order.placed", serde_json::json!({}))
    }

    #[tokio::test]
    async fn delivers_events_and_persists_resume_point_on_stop() {
        let mut deque = VecDeque::new();
        for i in 0..5 {
            deque.push_back(make_event(i));
        }
        let store = Arc::new(VecEventStore {
            events: StdMutex::new(deque),
        });
        let resume_points = Arc::new(InMemoryResumePoints::new());

        let received = Arc::new(AsyncMutex::new(Vec::new()));
        let received_clone = received.clone();
        let processor: BatchProcessor = Arc::new(move |batch| {
            let received = received_clone.clone();
            Box::pin(async move {
                received.lock().await.extend(batch);
                Ok(())
            })
        });

        let mut config = SubscriptionConfig::default();
        config.max_batch_size = 5;
        config.max_latency_ms = 30;

        let subscription =
            BatchedSubscription::new("test-sub", "order", store, resume_points.clone(), processor, config);

        subscription.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        // Not persisted yet: resume point advances only at stop/reset.
        assert!(resume_points.find("test-sub", "order").await.unwrap().is_none());

        subscription.stop().await.unwrap();

        assert_eq!(received.lock().await.len(), 5);
        let row = resume_points.find("test-sub", "order").await.unwrap().unwrap();
        assert_eq!(row.resume_from_and_including_global_order, 5);
    }

    #[tokio::test]
    async fn persists_initial_order_when_no_events_delivered() {
        let store = Arc::new(VecEventStore {
            events: StdMutex::new(VecDeque::new()),
        });
        let resume_points = Arc::new(InMemoryResumePoints::new());
        let processor: BatchProcessor = Arc::new(|_batch| Box::pin(async { Ok(()) }));

        let mut config = SubscriptionConfig::default();
        config.max_latency_ms = 20;

        let subscription =
            BatchedSubscription::new("idle-sub", "order", store, resume_points.clone(), processor, config);

        subscription.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        subscription.stop().await.unwrap();

        let row = resume_points.find("idle-sub", "order").await.unwrap().unwrap();
        assert_eq!(row.resume_from_and_including_global_order, GlobalEventOrder::BEGINNING.0);
    }

    #[tokio::test]
    async fn reset_from_overwrites_resume_point_while_stopped() {
        let store = Arc::new(VecEventStore {
            events: StdMutex::new(VecDeque::new()),
        });
        let resume_points = Arc::new(InMemoryResumePoints::new());
        let processor: BatchProcessor = Arc::new(|_batch| Box::pin(async { Ok(()) }));

        let subscription = BatchedSubscription::new(
            "test-sub",
            "order",
            store,
            resume_points.clone(),
            processor,
            SubscriptionConfig::default(),
        );

        subscription.reset_from(GlobalEventOrder(42), None).await.unwrap();

        let row = resume_points.find("test-sub", "order").await.unwrap().unwrap();
        assert_eq!(row.resume_from_and_including_global_order, 42);
        assert!(!subscription.is_started());
    }

    #[tokio::test]
    async fn reset_from_invokes_processor_with_new_order() {
        let store = Arc::new(VecEventStore {
            events: StdMutex::new(VecDeque::new()),
        });
        let resume_points = Arc::new(InMemoryResumePoints::new());
        let processor: BatchProcessor = Arc::new(|_batch| Box::pin(async { Ok(()) }));

        let subscription = BatchedSubscription::new(
            "test-sub",
            "order",
            store,
            resume_points,
            processor,
            SubscriptionConfig::default(),
        );

        let observed = Arc::new(AsyncMutex::new(None));
        let observed_clone = observed.clone();
        let reset_processor: ResetProcessor = Arc::new(move |order| {
            let observed = observed_clone.clone();
            Box::pin(async move {
                *observed.lock().await = Some(order);
                Ok(())
            })
        });

        subscription
            .reset_from(GlobalEventOrder(7), Some(reset_processor))
            .await
            .unwrap();

        assert_eq!(*observed.lock().await, Some(GlobalEventOrder(7)));
    }
}
