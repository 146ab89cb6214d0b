//! Persistence interfaces: four collections, each behind a narrow
//! repository contract with atomic single-document writes and indexed
//! lookups by subscription identifier.
//!
//! The on-disk layout of the backing document store is explicitly out of
//! scope for this engine - what lives here is the contract the rest
//! of the engine programs against, backed by a process-local concurrent
//! map. Swapping in a real embedded document store means implementing
//! these four traits; nothing above this layer needs to change.

use crate::error::Result;
use crate::sync::model::*;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn insert(&self, subscription: Subscription) -> Result<()>;
    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>>;
    async fn get_by_name(&self, name: &str) -> Result<Option<Subscription>>;
    async fn list(&self) -> Result<Vec<Subscription>>;
    async fn update(&self, subscription: Subscription) -> Result<()>;
    async fn delete(&self, id: SubscriptionId) -> Result<()>;
}

#[async_trait]
pub trait SnapshotRepository: Send + Sync {
    async fn insert(&self, snapshot: SchemaSnapshot) -> Result<()>;
    async fn latest_for(&self, subscription_id: SubscriptionId) -> Result<Option<SchemaSnapshot>>;
    async fn list_for(&self, subscription_id: SubscriptionId) -> Result<Vec<SchemaSnapshot>>;
    async fn delete(&self, id: SnapshotId) -> Result<()>;
    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<()>;
}

#[async_trait]
pub trait ComparisonRepository: Send + Sync {
    async fn insert(&self, result: ComparisonResult) -> Result<()>;
    async fn get(&self, id: ComparisonId) -> Result<Option<ComparisonResult>>;
    async fn list_for(&self, subscription_id: SubscriptionId) -> Result<Vec<ComparisonResult>>;
    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<()>;
}

#[async_trait]
pub trait PendingChangeRepository: Send + Sync {
    async fn insert_many(&self, changes: Vec<DetectedChange>) -> Result<()>;
    async fn list_unprocessed_for(&self, subscription_id: SubscriptionId) -> Result<Vec<DetectedChange>>;
    async fn mark_processed(&self, ids: &[ChangeId]) -> Result<()>;
    async fn mark_all_processed_for(&self, subscription_id: SubscriptionId) -> Result<()>;
    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<()>;
}

/// In-memory implementation of all four repositories, sharded via
/// `DashMap` for low-contention concurrent access (per the project's
/// `LegacyCache` -> `DashMap` migration pattern).
#[derive(Default)]
pub struct InMemoryStore {
    subscriptions: DashMap<SubscriptionId, Subscription>,
    snapshots: DashMap<SnapshotId, SchemaSnapshot>,
    comparisons: DashMap<ComparisonId, ComparisonResult>,
    pending_changes: DashMap<ChangeId, DetectedChange>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SubscriptionRepository for InMemoryStore {
    async fn insert(&self, subscription: Subscription) -> Result<()> {
        self.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn get(&self, id: SubscriptionId) -> Result<Option<Subscription>> {
        Ok(self.subscriptions.get(&id).map(|r| r.clone()))
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Subscription>> {
        Ok(self
            .subscriptions
            .iter()
            .find(|r| r.name.eq_ignore_ascii_case(name))
            .map(|r| r.clone()))
    }

    async fn list(&self) -> Result<Vec<Subscription>> {
        Ok(self.subscriptions.iter().map(|r| r.clone()).collect())
    }

    async fn update(&self, subscription: Subscription) -> Result<()> {
        self.subscriptions.insert(subscription.id, subscription);
        Ok(())
    }

    async fn delete(&self, id: SubscriptionId) -> Result<()> {
        self.subscriptions.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl SnapshotRepository for InMemoryStore {
    async fn insert(&self, snapshot: SchemaSnapshot) -> Result<()> {
        self.snapshots.insert(snapshot.id, snapshot);
        Ok(())
    }

    async fn latest_for(&self, subscription_id: SubscriptionId) -> Result<Option<SchemaSnapshot>> {
        Ok(self
            .snapshots
            .iter()
            .filter(|r| r.subscription_id == subscription_id)
            .max_by_key(|r| r.captured_at)
            .map(|r| r.clone()))
    }

    async fn list_for(&self, subscription_id: SubscriptionId) -> Result<Vec<SchemaSnapshot>> {
        let mut out: Vec<_> = self
            .snapshots
            .iter()
            .filter(|r| r.subscription_id == subscription_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|s| s.captured_at);
        Ok(out)
    }

    async fn delete(&self, id: SnapshotId) -> Result<()> {
        self.snapshots.remove(&id);
        Ok(())
    }

    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.snapshots.retain(|_, v| v.subscription_id != subscription_id);
        Ok(())
    }
}

#[async_trait]
impl ComparisonRepository for InMemoryStore {
    async fn insert(&self, result: ComparisonResult) -> Result<()> {
        self.comparisons.insert(result.id, result);
        Ok(())
    }

    async fn get(&self, id: ComparisonId) -> Result<Option<ComparisonResult>> {
        Ok(self.comparisons.get(&id).map(|r| r.clone()))
    }

    async fn list_for(&self, subscription_id: SubscriptionId) -> Result<Vec<ComparisonResult>> {
        let mut out: Vec<_> = self
            .comparisons
            .iter()
            .filter(|r| r.subscription_id == subscription_id)
            .map(|r| r.clone())
            .collect();
        out.sort_by_key(|c| c.compared_at);
        Ok(out)
    }

    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.comparisons.retain(|_, v| v.subscription_id != subscription_id);
        Ok(())
    }
}

#[async_trait]
impl PendingChangeRepository for InMemoryStore {
    async fn insert_many(&self, changes: Vec<DetectedChange>) -> Result<()> {
        for change in changes {
            self.pending_changes.insert(change.id, change);
        }
        Ok(())
    }

    async fn list_unprocessed_for(&self, subscription_id: SubscriptionId) -> Result<Vec<DetectedChange>> {
        Ok(self
            .pending_changes
            .iter()
            .filter(|r| r.subscription_id == subscription_id && !r.processed)
            .map(|r| r.clone())
            .collect())
    }

    async fn mark_processed(&self, ids: &[ChangeId]) -> Result<()> {
        let now = chrono::Utc::now();
        for id in ids {
            if let Some(mut entry) = self.pending_changes.get_mut(id) {
                entry.processed = true;
                entry.processed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_all_processed_for(&self, subscription_id: SubscriptionId) -> Result<()> {
        let now = chrono::Utc::now();
        for mut entry in self.pending_changes.iter_mut() {
            if entry.subscription_id == subscription_id && !entry.processed {
                entry.processed = true;
                entry.processed_at = Some(now);
            }
        }
        Ok(())
    }

    async fn delete_for_subscription(&self, subscription_id: SubscriptionId) -> Result<()> {
        self.pending_changes.retain(|_, v| v.subscription_id != subscription_id);
        Ok(())
    }
}

/// Retention/cleanup helpers used by the cache cleanup worker. Kept
/// separate from the four trait contracts above since they operate across
/// all subscriptions at once rather than being scoped to one.
impl InMemoryStore {
    pub fn prune_snapshots_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let before = self.snapshots.len();
        self.snapshots.retain(|_, v| v.captured_at >= cutoff);
        before - self.snapshots.len()
    }

    pub fn prune_comparisons_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let before = self.comparisons.len();
        self.comparisons.retain(|_, v| v.compared_at >= cutoff);
        before - self.comparisons.len()
    }

    pub fn prune_processed_pending_changes_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> usize {
        let before = self.pending_changes.len();
        self.pending_changes.retain(|_, v| !(v.processed && v.processed_at.map(|t| t < cutoff).unwrap_or(false)));
        before - self.pending_changes.len()
    }

    /// Keeps only the `limit` most recent snapshots per subscription.
    pub fn enforce_snapshot_cap(&self, subscription_id: SubscriptionId, limit: usize) -> usize {
        let mut mine: Vec<_> = self
            .snapshots
            .iter()
            .filter(|r| r.subscription_id == subscription_id)
            .map(|r| (r.id, r.captured_at))
            .collect();
        mine.sort_by_key(|(_, captured_at)| std::cmp::Reverse(*captured_at));
        let excess: Vec<_> = mine.into_iter().skip(limit).map(|(id, _)| id).collect();
        let removed = excess.len();
        for id in excess {
            self.snapshots.remove(&id);
        }
        removed
    }
}
