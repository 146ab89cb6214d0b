//! `RealtimeEventPublisher`: a fan-out to per-subscription and global
//! listener groups.
//! Workers and the processor hold this as a shared injected collaborator;
//! nothing here talks to a specific wire transport - a websocket gateway
//! subscribes to the broadcast channels this module exposes.

use crate::sync::model::SubscriptionId;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::trace;

/// Server -> client event names, part of the stable event contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventName {
    ChangesDetected,
    FileChanged,
    DatabaseChanged,
    SubscriptionHealthChanged,
    SubscriptionStateChanged,
    SubscriptionCreated,
    SubscriptionDeleted,
    ComparisonStarted,
    ComparisonProgress,
    ComparisonCompleted,
    ComparisonFailed,
    ServiceShuttingDown,
}

impl EventName {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::ChangesDetected => "changes-detected",
            EventName::FileChanged => "file-changed",
            EventName::DatabaseChanged => "database-changed",
            EventName::SubscriptionHealthChanged => "subscription-health-changed",
            EventName::SubscriptionStateChanged => "subscription-state-changed",
            EventName::SubscriptionCreated => "subscription-created",
            EventName::SubscriptionDeleted => "subscription-deleted",
            EventName::ComparisonStarted => "comparison-started",
            EventName::ComparisonProgress => "comparison-progress",
            EventName::ComparisonCompleted => "comparison-completed",
            EventName::ComparisonFailed => "comparison-failed",
            EventName::ServiceShuttingDown => "service-shutting-down",
        }
    }
}

/// A single realtime message: the envelope every listener receives,
/// regardless of which group delivered it.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeEvent {
    pub event: &'static str,
    pub subscription_id: Option<SubscriptionId>,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

const GLOBAL_CHANNEL_CAPACITY: usize = 1024;
const SUBSCRIPTION_CHANNEL_CAPACITY: usize = 256;

/// Fan-out publisher: one broadcast channel for the global "all" group, one
/// lazily-created broadcast channel per subscription id. `join-subscription`
/// / `join-all` client methods are modeled as `subscribe()` calls
/// against the returned receivers; `leave-*` is simply dropping the
/// receiver.
pub struct RealtimeEventPublisher {
    global: broadcast::Sender<RealtimeEvent>,
    per_subscription: DashMap<SubscriptionId, broadcast::Sender<RealtimeEvent>>,
}

impl RealtimeEventPublisher {
    pub fn new() -> Arc<Self> {
        let (global, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Arc::new(Self {
            global,
            per_subscription: DashMap::new(),
        })
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<RealtimeEvent> {
        self.global.subscribe()
    }

    pub fn subscribe_subscription(&self, subscription_id: SubscriptionId) -> broadcast::Receiver<RealtimeEvent> {
        self.per_subscription
            .entry(subscription_id)
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Emits to both the subscription's group and the global "all" group.
    /// A send with no listeners is a normal, silent no-op (`broadcast::Sender::send`
    /// returning `Err` just means nobody is currently joined).
    pub fn emit(&self, event: EventName, subscription_id: SubscriptionId, payload: Value) {
        let message = RealtimeEvent {
            event: event.as_str(),
            subscription_id: Some(subscription_id),
            timestamp: Utc::now(),
            payload,
        };
        trace!(event = event.as_str(), subscription = %subscription_id, "emitting realtime event");

        if let Some(sender) = self.per_subscription.get(&subscription_id) {
            let _ = sender.send(message.clone());
        }
        let _ = self.global.send(message);
    }

    /// Emits a service-wide event with no owning subscription (currently
    /// only `service-shutting-down`).
    pub fn emit_global(&self, event: EventName, payload: Value) {
        let message = RealtimeEvent {
            event: event.as_str(),
            subscription_id: None,
            timestamp: Utc::now(),
            payload,
        };
        let _ = self.global.send(message);
    }

    /// Drops the broadcast channel for a deleted subscription so its slot
    /// doesn't linger in the map forever.
    pub fn remove_subscription(&self, subscription_id: SubscriptionId) {
        self.per_subscription.remove(&subscription_id);
    }
}

impl Default for RealtimeEventPublisher {
    fn default() -> Self {
        let (global, _) = broadcast::channel(GLOBAL_CHANNEL_CAPACITY);
        Self {
            global,
            per_subscription: DashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn subscription_listener_and_global_listener_both_receive() {
        let publisher = RealtimeEventPublisher::new();
        let sub_id = uuid::Uuid::new_v4();
        let mut sub_rx = publisher.subscribe_subscription(sub_id);
        let mut global_rx = publisher.subscribe_all();

        publisher.emit(EventName::ChangesDetected, sub_id, json!({"count": 2}));

        let from_sub = sub_rx.recv().await.unwrap();
        let from_global = global_rx.recv().await.unwrap();
        assert_eq!(from_sub.event, "changes-detected");
        assert_eq!(from_global.event, "changes-detected");
    }

    #[tokio::test]
    async fn unrelated_subscription_does_not_receive() {
        let publisher = RealtimeEventPublisher::new();
        let sub_a = uuid::Uuid::new_v4();
        let sub_b = uuid::Uuid::new_v4();
        let mut rx_b = publisher.subscribe_subscription(sub_b);

        publisher.emit(EventName::DatabaseChanged, sub_a, json!({}));

        assert!(rx_b.try_recv().is_err());
    }
}
