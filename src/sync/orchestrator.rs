//! The comparison orchestrator: the serialized executor. Enforces
//! at-most-one concurrent comparison per subscription and a global
//! concurrency cap; builds snapshots (full or incremental), invokes the
//! comparer, persists history, updates the subscription's last-compared
//! timestamp.

use crate::error::{Result, SyncError};
use crate::sync::comparer::{CompareOptions, SchemaComparer};
use crate::sync::config::Configuration;
use crate::sync::db_builder::DatabaseModelBuilder;
use crate::sync::file_builder::FileModelBuilder;
use crate::sync::model::*;
use crate::sync::normalizer::NormalizeOptions;
use crate::sync::realtime::{EventName, RealtimeEventPublisher};
use crate::sync::repository::{ComparisonRepository, SnapshotRepository, SubscriptionRepository};
use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

pub struct ComparisonOrchestrator {
    subscriptions: Arc<dyn SubscriptionRepository>,
    snapshots: Arc<dyn SnapshotRepository>,
    comparisons: Arc<dyn ComparisonRepository>,
    db_builder: Arc<DatabaseModelBuilder>,
    file_builder: Arc<FileModelBuilder>,
    comparer: SchemaComparer,
    realtime: Arc<RealtimeEventPublisher>,
    semaphore: Arc<Semaphore>,
    locks: DashMap<SubscriptionId, Arc<AsyncMutex<()>>>,
    incremental_freshness: std::time::Duration,
}

impl ComparisonOrchestrator {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        snapshots: Arc<dyn SnapshotRepository>,
        comparisons: Arc<dyn ComparisonRepository>,
        db_builder: Arc<DatabaseModelBuilder>,
        file_builder: Arc<FileModelBuilder>,
        realtime: Arc<RealtimeEventPublisher>,
        config: &Configuration,
    ) -> Self {
        Self {
            subscriptions,
            snapshots,
            comparisons,
            db_builder,
            file_builder,
            comparer: SchemaComparer::new(),
            realtime,
            semaphore: Arc::new(Semaphore::new(config.monitoring.max_concurrent_comparisons)),
            locks: DashMap::new(),
            incremental_freshness: config.monitoring.full_reconciliation_interval(),
        }
    }

    fn lock_for(&self, subscription_id: SubscriptionId) -> Arc<AsyncMutex<()>> {
        self.locks.entry(subscription_id).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// `full` forces a fresh database snapshot; otherwise the latest cached
    /// snapshot is reused when fresh enough.
    pub async fn run(&self, subscription_id: SubscriptionId, full: bool, trigger: &str) -> Result<ComparisonResult> {
        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("subscription {subscription_id}")))?;

        let lock = self.lock_for(subscription_id);
        let _guard = lock.try_lock().map_err(|_| SyncError::conflict("comparison-in-progress"))?;

        let _permit = self.semaphore.acquire().await.map_err(|e| SyncError::Fatal(e.to_string()))?;

        self.realtime.emit(EventName::ComparisonStarted, subscription_id, json!({"trigger": trigger, "full": full}));
        let started = Instant::now();

        let result = self.execute(&subscription, full, trigger).await;

        match result {
            Ok(comparison) => {
                self.comparisons.insert(comparison.clone()).await?;

                let mut updated = subscription.clone();
                updated.timestamps.last_compared = Some(Utc::now());
                updated.timestamps.updated = Utc::now();
                self.subscriptions.update(updated).await?;

                self.realtime.emit(
                    EventName::ComparisonCompleted,
                    subscription_id,
                    json!({
                        "comparison_id": comparison.id,
                        "status": comparison.status,
                        "total_differences": comparison.summary.total_differences,
                    }),
                );
                info!(
                    subscription = %subscription_id,
                    status = ?comparison.status,
                    duration_ms = started.elapsed().as_millis() as u64,
                    "comparison finished"
                );
                Ok(comparison)
            }
            Err(e) => {
                let failed = ComparisonResult {
                    id: Uuid::new_v4(),
                    subscription_id,
                    compared_at: Utc::now(),
                    duration: started.elapsed(),
                    status: ComparisonStatus::Error,
                    trigger: trigger.to_string(),
                    summary: ComparisonSummary::default(),
                    differences: vec![],
                    unsupported_objects: vec![],
                };
                // Best-effort: a persistence failure here must not mask the
                // original error from the caller.
                let _ = self.comparisons.insert(failed).await;
                self.realtime.emit(EventName::ComparisonFailed, subscription_id, json!({"error": e.to_string()}));
                warn!(subscription = %subscription_id, error = %e, "comparison failed");
                Err(e)
            }
        }
    }

    async fn execute(&self, subscription: &Subscription, full: bool, trigger: &str) -> Result<ComparisonResult> {
        let started = Instant::now();
        let normalize_options = NormalizeOptions {
            ignore_whitespace: subscription.options.ignore_whitespace,
            ignore_comments: subscription.options.ignore_comments,
        };

        let snapshot = self.resolve_snapshot(subscription, full, normalize_options).await?;

        let mut file_cache = self.file_builder.build(&subscription.folder, normalize_options).await?;
        file_cache.subscription_id = subscription.id;

        let allow_set = subscription.options.effective_allow_set();
        let outcome = self.comparer.compare(&snapshot, &file_cache, CompareOptions { allow_set: &allow_set });

        let status = if outcome.differences.is_empty() { ComparisonStatus::Synchronized } else { ComparisonStatus::HasDifferences };

        let summary = ComparisonSummary::derive(&outcome.differences, &outcome.unsupported, outcome.objects_compared, outcome.objects_unchanged);

        Ok(ComparisonResult {
            id: Uuid::new_v4(),
            subscription_id: subscription.id,
            compared_at: Utc::now(),
            duration: started.elapsed(),
            status,
            trigger: trigger.to_string(),
            summary,
            differences: outcome.differences,
            unsupported_objects: outcome.unsupported,
        })
    }

    /// Full mode always builds fresh. Incremental mode reuses the latest
    /// snapshot when it exists and is fresh enough; otherwise it behaves as
    /// full.
    async fn resolve_snapshot(
        &self,
        subscription: &Subscription,
        full: bool,
        normalize_options: NormalizeOptions,
    ) -> Result<SchemaSnapshot> {
        if !full {
            if let Some(latest) = self.snapshots.latest_for(subscription.id).await? {
                let age = Utc::now().signed_duration_since(latest.captured_at);
                if age.to_std().map(|a| a < self.incremental_freshness).unwrap_or(false) {
                    return Ok(latest);
                }
            }
        }

        let snapshot = self.db_builder.build(subscription, normalize_options, None).await?;
        self.snapshots.insert(snapshot.clone()).await?;
        Ok(snapshot)
    }

    /// A single-object targeted path used by polling. Builds a
    /// type-filtered database view and restricts both sides to the one
    /// requested `(schema, name)` key before comparing.
    pub async fn compare_object(
        &self,
        subscription_id: SubscriptionId,
        schema: &str,
        name: &str,
        object_type: ObjectType,
        trigger: &str,
    ) -> Result<ComparisonResult> {
        let subscription = self
            .subscriptions
            .get(subscription_id)
            .await?
            .ok_or_else(|| SyncError::not_found(format!("subscription {subscription_id}")))?;

        let lock = self.lock_for(subscription_id);
        let _guard = lock.try_lock().map_err(|_| SyncError::conflict("comparison-in-progress"))?;
        let _permit = self.semaphore.acquire().await.map_err(|e| SyncError::Fatal(e.to_string()))?;

        let started = Instant::now();
        let normalize_options = NormalizeOptions {
            ignore_whitespace: subscription.options.ignore_whitespace,
            ignore_comments: subscription.options.ignore_comments,
        };

        let mut snapshot = self.db_builder.build(&subscription, normalize_options, Some(object_type)).await?;
        snapshot.objects.retain(|o| o.schema_name.eq_ignore_ascii_case(schema) && o.object_name.eq_ignore_ascii_case(name));

        let mut file_cache = self.file_builder.build(&subscription.folder, normalize_options).await?;
        file_cache.subscription_id = subscription.id;
        file_cache.entries.retain(|_, e| {
            e.object_type == object_type && e.schema_name.eq_ignore_ascii_case(schema) && e.object_name.eq_ignore_ascii_case(name)
        });

        let allow_set: std::collections::HashSet<ObjectType> = [object_type].into_iter().collect();
        let outcome = self.comparer.compare(&snapshot, &file_cache, CompareOptions { allow_set: &allow_set });
        let status = if outcome.differences.is_empty() { ComparisonStatus::Synchronized } else { ComparisonStatus::HasDifferences };
        let summary = ComparisonSummary::derive(&outcome.differences, &outcome.unsupported, outcome.objects_compared, outcome.objects_unchanged);

        let comparison = ComparisonResult {
            id: Uuid::new_v4(),
            subscription_id,
            compared_at: Utc::now(),
            duration: started.elapsed(),
            status,
            trigger: trigger.to_string(),
            summary,
            differences: outcome.differences,
            unsupported_objects: outcome.unsupported,
        };
        self.comparisons.insert(comparison.clone()).await?;
        Ok(comparison)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::db_source::{ObjectModifyRow, RawLogin, RawSchemaObject, SchemaSource};
    use crate::sync::repository::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeSource {
        objects: Vec<RawSchemaObject>,
        build_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SchemaSource for FakeSource {
        async fn probe_connectivity(&self, _c: &DatabaseConnection, _t: std::time::Duration) -> Result<()> {
            Ok(())
        }
        async fn enumerate_objects(&self, _c: &DatabaseConnection) -> Result<Vec<RawSchemaObject>> {
            self.build_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.objects.clone())
        }
        async fn enumerate_logins(&self, _c: &DatabaseConnection) -> Result<Vec<RawLogin>> {
            Ok(vec![])
        }
        async fn poll_modify_dates(&self, _c: &DatabaseConnection) -> Result<Vec<ObjectModifyRow>> {
            Ok(vec![])
        }
    }

    fn sub_with_folder(root: std::path::PathBuf) -> Subscription {
        Subscription::new(
            "fixture".into(),
            DatabaseConnection {
                server: "localhost".into(),
                database: "db".into(),
                auth_kind: AuthKind::Integrated,
                username: None,
                secret: None,
                trust_certificate: true,
                connect_timeout: std::time::Duration::from_secs(5),
            },
            ProjectFolder {
                root,
                include_patterns: vec![],
                exclude_patterns: vec![],
                layout: LayoutKind::Flat,
            },
            SubscriptionOptions::default(),
        )
    }

    async fn build_orchestrator(
        build_calls: Arc<AtomicUsize>,
    ) -> (ComparisonOrchestrator, Arc<InMemoryStore>, Subscription, tempfile::TempDir) {
        let store = InMemoryStore::new();
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("dbo.Foo.sql"), "CREATE TABLE dbo.Foo (Id INT)").unwrap();
        let sub = sub_with_folder(dir.path().to_path_buf());
        SubscriptionRepository::insert(store.as_ref(), sub.clone()).await.unwrap();

        let source: Arc<dyn SchemaSource> = Arc::new(FakeSource {
            objects: vec![RawSchemaObject {
                schema_name: "dbo".into(),
                object_name: "Foo".into(),
                object_type: ObjectType::Table,
                definition: "CREATE TABLE dbo.Foo (Id INT)".into(),
                modify_instant: None,
            }],
            build_calls,
        });

        let orchestrator = ComparisonOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            Arc::new(DatabaseModelBuilder::new(source)),
            Arc::new(FileModelBuilder::new()),
            RealtimeEventPublisher::new(),
            &Configuration::default(),
        );
        (orchestrator, store, sub, dir)
    }

    #[tokio::test]
    async fn full_comparison_twice_in_a_row_is_idempotent() {
        let (orchestrator, _store, sub, _dir) = build_orchestrator(Arc::new(AtomicUsize::new(0))).await;

        let first = orchestrator.run(sub.id, true, "manual").await.unwrap();
        let second = orchestrator.run(sub.id, true, "manual").await.unwrap();

        assert_eq!(first.status, ComparisonStatus::Synchronized);
        assert_eq!(second.status, ComparisonStatus::Synchronized);
        assert_eq!(first.summary.total_differences, second.summary.total_differences);
        assert!(second.differences.is_empty());
    }

    #[tokio::test]
    async fn second_concurrent_attempt_fails_with_comparison_in_progress() {
        let (orchestrator, _store, sub, _dir) = build_orchestrator(Arc::new(AtomicUsize::new(0))).await;
        let orchestrator = Arc::new(orchestrator);

        let lock = orchestrator.lock_for(sub.id);
        let _held = lock.try_lock().unwrap();

        let err = orchestrator.run(sub.id, true, "manual").await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn unknown_subscription_is_not_found() {
        let (orchestrator, _store, _sub, _dir) = build_orchestrator(Arc::new(AtomicUsize::new(0))).await;
        let err = orchestrator.run(Uuid::new_v4(), true, "manual").await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
