//! Persisted-event types (§6, 4.G).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A position in the global, per-aggregate-type event order. Strictly
/// increasing; gaps are permitted (deleted or filtered events), but no
/// two events of the same aggregate type ever share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalEventOrder(pub i64);

impl GlobalEventOrder {
    pub const BEGINNING: GlobalEventOrder = GlobalEventOrder(0);

    pub fn next(self) -> Self {
        GlobalEventOrder(self.0 + 1)
    }
}

impl std::fmt::Display for GlobalEventOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for GlobalEventOrder {
    fn from(value: i64) -> Self {
        GlobalEventOrder(value)
    }
}

/// An event as read back from the event store: the minimal shape a
/// batched subscription needs, independent of the store's own schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedEvent {
    pub global_order: GlobalEventOrder,
    pub event_id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: Option<Uuid>,
    pub tenant_id: Option<Uuid>,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl PersistedEvent {
    pub fn new(
        global_order: GlobalEventOrder,
        aggregate_type: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            global_order,
            event_id: Uuid::now_v7(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: None,
            tenant_id: None,
            event_type: event_type.into(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_aggregate_id(mut self, aggregate_id: Uuid) -> Self {
        self.aggregate_id = Some(aggregate_id);
        self
    }

    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_event_order_compares_numerically() {
        assert!(GlobalEventOrder(5) > GlobalEventOrder(4));
        assert_eq!(GlobalEventOrder(4).next(), GlobalEventOrder(5));
    }

    #[test]
    fn persisted_event_carries_aggregate_and_tenant() {
        let id = Uuid::now_v7();
        let event = PersistedEvent::new(
            GlobalEventOrder(1),
            "order",
            "order.placed",
            serde_json::json!({}),
        )
        .with_aggregate_id(id)
        .with_tenant(id);

        assert_eq!(event.aggregate_id, Some(id));
        assert_eq!(event.tenant_id, Some(id));
    }
}
