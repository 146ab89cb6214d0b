//! Per-subscription change debouncer: coalesces rapid events into a single
//! `PendingChangeBatch` per quiet period. Each subscription gets its own
//! actor task so that one subscription's timer never interferes with
//! another's; the outer map is a concurrent map so callers never block on
//! each other.

use crate::sync::model::{ChangeKind, ChangeSource, DetectedChange, ObjectType, PendingChangeBatch, SubscriptionId};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

/// The debouncer's single listener slot. Implementations must not block -
/// the processor's implementation spawns work and returns immediately.
pub trait BatchListener: Send + Sync {
    fn on_batch(&self, batch: PendingChangeBatch);
}

enum ActorMessage {
    Record(DetectedChange),
}

pub struct Debouncer {
    debounce: Duration,
    listener: Arc<dyn BatchListener>,
    senders: DashMap<SubscriptionId, mpsc::UnboundedSender<ActorMessage>>,
    handles: DashMap<SubscriptionId, JoinHandle<()>>,
}

impl Debouncer {
    pub fn new(debounce: Duration, listener: Arc<dyn BatchListener>) -> Arc<Self> {
        Arc::new(Self {
            debounce,
            listener,
            senders: DashMap::new(),
            handles: DashMap::new(),
        })
    }

    /// Upserts the coalescing map (last-kind-wins for a given identifier)
    /// and resets the subscription's timer.
    pub fn record(
        &self,
        subscription_id: SubscriptionId,
        object_identifier: String,
        source: ChangeSource,
        kind: ChangeKind,
        object_type: Option<ObjectType>,
    ) {
        let change = DetectedChange::new(subscription_id, source, kind, object_identifier, object_type);
        let tx = self.ensure_actor(subscription_id);
        // The actor task owns the coalescing map; an unbounded channel never
        // blocks the caller, matching "record" being a fire-and-forget call
        // from any worker.
        let _ = tx.send(ActorMessage::Record(change));
    }

    fn ensure_actor(&self, subscription_id: SubscriptionId) -> mpsc::UnboundedSender<ActorMessage> {
        self.senders
            .entry(subscription_id)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                let debounce = self.debounce;
                let listener = self.listener.clone();
                let handle = tokio::spawn(run_actor(subscription_id, rx, debounce, listener));
                self.handles.insert(subscription_id, handle);
                tx
            })
            .clone()
    }

    /// Cancels all pending timers and drops unemitted batches. The
    /// reconciler is relied on to recover any work lost this way.
    pub fn dispose(&self) {
        for entry in self.handles.iter() {
            entry.value().abort();
        }
        self.handles.clear();
        self.senders.clear();
    }

    /// Tears down a single subscription's actor, e.g. on deletion, so it
    /// doesn't linger holding a sender/timer for a subscription that no
    /// longer exists.
    pub fn remove_subscription(&self, subscription_id: SubscriptionId) {
        if let Some((_, handle)) = self.handles.remove(&subscription_id) {
            handle.abort();
        }
        self.senders.remove(&subscription_id);
    }
}

async fn run_actor(
    subscription_id: SubscriptionId,
    mut rx: mpsc::UnboundedReceiver<ActorMessage>,
    debounce: Duration,
    listener: Arc<dyn BatchListener>,
) {
    let mut pending: HashMap<String, DetectedChange> = HashMap::new();
    let mut batch_started = Utc::now();

    loop {
        if pending.is_empty() {
            match rx.recv().await {
                Some(ActorMessage::Record(change)) => {
                    batch_started = Utc::now();
                    pending.insert(change.object_identifier.clone(), change);
                }
                None => return,
            }
            continue;
        }

        tokio::select! {
            received = rx.recv() => {
                match received {
                    Some(ActorMessage::Record(change)) => {
                        // Coalescing: the latest event for an identifier
                        // replaces any earlier one within the window.
                        pending.insert(change.object_identifier.clone(), change);
                    }
                    None => return,
                }
            }
            _ = tokio::time::sleep(debounce) => {
                let batch = PendingChangeBatch {
                    subscription_id,
                    changes: pending.drain().map(|(_, v)| v).collect(),
                    batch_started,
                    batch_completed: Utc::now(),
                };
                trace!(subscription = %subscription_id, changes = batch.changes.len(), "emitting debounced batch");
                listener.on_batch(batch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingListener {
        batches: Mutex<Vec<PendingChangeBatch>>,
    }

    impl CollectingListener {
        fn new() -> Arc<Self> {
            Arc::new(Self { batches: Mutex::new(vec![]) })
        }
    }

    impl BatchListener for CollectingListener {
        fn on_batch(&self, batch: PendingChangeBatch) {
            self.batches.lock().unwrap().push(batch);
        }
    }

    /// create -> modify -> delete within one window emits one batch
    /// containing one change for `x` of kind `delete`.
    #[tokio::test(start_paused = true)]
    async fn coalesces_create_modify_delete_into_single_delete() {
        let listener = CollectingListener::new();
        let debouncer = Debouncer::new(Duration::from_millis(100), listener.clone());
        let sub_id = uuid::Uuid::new_v4();

        debouncer.record(sub_id, "X.sql".into(), ChangeSource::Filesystem, ChangeKind::Created, None);
        tokio::time::advance(Duration::from_millis(20)).await;
        debouncer.record(sub_id, "X.sql".into(), ChangeSource::Filesystem, ChangeKind::Modified, None);
        tokio::time::advance(Duration::from_millis(20)).await;
        debouncer.record(sub_id, "X.sql".into(), ChangeSource::Filesystem, ChangeKind::Deleted, None);

        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::task::yield_now().await;

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].changes.len(), 1);
        assert_eq!(batches[0].changes[0].kind, ChangeKind::Deleted);
    }

    /// A rename is modeled upstream as delete(old) + create(new); the
    /// debouncer just coalesces them as two distinct identifiers.
    #[tokio::test(start_paused = true)]
    async fn distinct_identifiers_stay_distinct_in_one_batch() {
        let listener = CollectingListener::new();
        let debouncer = Debouncer::new(Duration::from_millis(50), listener.clone());
        let sub_id = uuid::Uuid::new_v4();

        debouncer.record(sub_id, "old.sql".into(), ChangeSource::Filesystem, ChangeKind::Deleted, None);
        debouncer.record(sub_id, "new.sql".into(), ChangeSource::Filesystem, ChangeKind::Created, None);

        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].changes.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn independent_subscriptions_do_not_interfere() {
        let listener = CollectingListener::new();
        let debouncer = Debouncer::new(Duration::from_millis(50), listener.clone());
        let sub_a = uuid::Uuid::new_v4();
        let sub_b = uuid::Uuid::new_v4();

        debouncer.record(sub_a, "a.sql".into(), ChangeSource::Filesystem, ChangeKind::Created, None);
        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;
        debouncer.record(sub_b, "b.sql".into(), ChangeSource::Filesystem, ChangeKind::Created, None);
        tokio::time::advance(Duration::from_millis(80)).await;
        tokio::task::yield_now().await;

        let batches = listener.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().any(|b| b.subscription_id == sub_a));
        assert!(batches.iter().any(|b| b.subscription_id == sub_b));
    }
}
