//! `SyncEngine`: constructs every collaborator, spawns the enabled
//! background workers, and exposes the internal API surface that a host
//! process (or the bundled CLI) drives the engine through.

use crate::error::{Result, SyncError};
use crate::sync::config::Configuration;
use crate::sync::db_builder::DatabaseModelBuilder;
use crate::sync::db_source::{SchemaSource, TiberiusSchemaSource};
use crate::sync::debouncer::{BatchListener, Debouncer};
use crate::sync::file_builder::FileModelBuilder;
use crate::sync::model::*;
use crate::sync::orchestrator::ComparisonOrchestrator;
use crate::sync::processor::ChangeProcessor;
use crate::sync::realtime::{EventName, RealtimeEventPublisher};
use crate::sync::repository::{ComparisonRepository, InMemoryStore, PendingChangeRepository, SnapshotRepository, SubscriptionRepository};
use crate::sync::workers::{CacheCleanupWorker, DatabasePollingWorker, FileWatchingWorker, HealthCheckWorker, ReconciliationWorker};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

/// Top-level handle to a running engine instance. Cloning is cheap - every
/// field is an `Arc` or a lightweight handle - but there is normally only
/// ever one, owned by the host process.
pub struct SyncEngine {
    config: Configuration,
    store: Arc<InMemoryStore>,
    realtime: Arc<RealtimeEventPublisher>,
    orchestrator: Arc<ComparisonOrchestrator>,
    debouncer: Arc<Debouncer>,
    shutdown_tx: watch::Sender<bool>,
    worker_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl SyncEngine {
    /// Production entry point: wires `TiberiusSchemaSource` as the
    /// database collaborator.
    pub fn new(config: Configuration) -> Arc<Self> {
        Self::with_source(config, Arc::new(TiberiusSchemaSource::new()))
    }

    /// Test/alternate entry point: takes an injected `SchemaSource`, letting
    /// callers swap in a fake without touching any TDS wire code.
    pub fn with_source(config: Configuration, source: Arc<dyn SchemaSource>) -> Arc<Self> {
        let store = InMemoryStore::new();
        let realtime = RealtimeEventPublisher::new();

        let db_builder = Arc::new(DatabaseModelBuilder::new(source.clone()));
        let file_builder = Arc::new(FileModelBuilder::new());

        let orchestrator = Arc::new(ComparisonOrchestrator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            db_builder,
            file_builder,
            realtime.clone(),
            &config,
        ));

        let processor = ChangeProcessor::new(store.clone(), store.clone(), realtime.clone(), orchestrator.clone());
        let debouncer = Debouncer::new(config.monitoring.file_system_debounce(), processor as Arc<dyn BatchListener>);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut handles = Vec::new();
        if config.workers.database_polling {
            let worker = DatabasePollingWorker::new(store.clone(), source.clone(), debouncer.clone(), realtime.clone(), &config);
            handles.push(worker.spawn(shutdown_rx.clone()));
        }
        if config.workers.file_watching {
            let worker = FileWatchingWorker::new(store.clone(), debouncer.clone(), realtime.clone());
            handles.push(worker.spawn(shutdown_rx.clone()));
        }
        if config.workers.reconciliation {
            let worker = ReconciliationWorker::new(store.clone(), store.clone(), orchestrator.clone(), &config);
            handles.push(worker.spawn(shutdown_rx.clone()));
        }
        if config.workers.cache_cleanup {
            let worker = CacheCleanupWorker::new(store.clone(), store.clone(), &config);
            handles.push(worker.spawn(shutdown_rx.clone()));
        }
        if config.workers.health_check {
            let worker = HealthCheckWorker::new(store.clone(), source.clone(), realtime.clone(), &config);
            handles.push(worker.spawn(shutdown_rx.clone()));
        }

        Arc::new(Self {
            config,
            store,
            realtime,
            orchestrator,
            debouncer,
            shutdown_tx,
            worker_handles: Mutex::new(handles),
        })
    }

    pub fn realtime(&self) -> Arc<RealtimeEventPublisher> {
        self.realtime.clone()
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    // --- Subscription lifecycle ----------------------------------------

    pub async fn create_subscription(
        &self,
        name: String,
        database: DatabaseConnection,
        folder: ProjectFolder,
        options: SubscriptionOptions,
    ) -> Result<Subscription> {
        if let Some(existing) = self.store.get_by_name(&name).await? {
            return Err(SyncError::conflict(format!("subscription named '{}' already exists ({})", name, existing.id)));
        }

        let subscription = Subscription::new(name, database, folder, options);
        SubscriptionRepository::insert(self.store.as_ref(), subscription.clone()).await?;
        self.realtime.emit(EventName::SubscriptionCreated, subscription.id, json!({"name": subscription.name}));
        info!(subscription = %subscription.id, "subscription created");
        Ok(subscription)
    }

    pub async fn get_subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        SubscriptionRepository::get(self.store.as_ref(), id).await?.ok_or_else(|| SyncError::not_found(format!("subscription {id}")))
    }

    pub async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.store.list().await
    }

    pub async fn pause_subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        let mut subscription = self.get_subscription(id).await?;
        if subscription.state != SubscriptionState::Paused {
            subscription.state = SubscriptionState::Paused;
            subscription.timestamps.paused = Some(Utc::now());
            subscription.timestamps.updated = Utc::now();
            self.store.update(subscription.clone()).await?;
            self.realtime.emit(EventName::SubscriptionStateChanged, id, json!({"state": subscription.state}));
        }
        Ok(subscription)
    }

    /// Resume fails with a conflict unless the subscription is currently
    /// paused - unlike pause, which is idempotent.
    pub async fn resume_subscription(&self, id: SubscriptionId) -> Result<Subscription> {
        let mut subscription = self.get_subscription(id).await?;
        if subscription.state != SubscriptionState::Paused {
            return Err(SyncError::conflict(format!("subscription {id} is not paused")));
        }
        subscription.state = SubscriptionState::Active;
        subscription.timestamps.resumed = Some(Utc::now());
        subscription.timestamps.updated = Utc::now();
        self.store.update(subscription.clone()).await?;
        self.realtime.emit(EventName::SubscriptionStateChanged, id, json!({"state": subscription.state}));
        Ok(subscription)
    }

    pub async fn delete_subscription(&self, id: SubscriptionId) -> Result<()> {
        self.get_subscription(id).await?;

        SnapshotRepository::delete_for_subscription(self.store.as_ref(), id).await?;
        ComparisonRepository::delete_for_subscription(self.store.as_ref(), id).await?;
        PendingChangeRepository::delete_for_subscription(self.store.as_ref(), id).await?;
        SubscriptionRepository::delete(self.store.as_ref(), id).await?;

        self.debouncer.remove_subscription(id);
        self.realtime.emit(EventName::SubscriptionDeleted, id, json!({}));
        self.realtime.remove_subscription(id);
        info!(subscription = %id, "subscription deleted");
        Ok(())
    }

    // --- Comparisons ------------------------------------------------------

    pub async fn trigger_comparison(&self, id: SubscriptionId, full: bool) -> Result<ComparisonResult> {
        self.orchestrator.run(id, full, "manual").await
    }

    pub async fn list_comparisons(&self, subscription_id: SubscriptionId) -> Result<Vec<ComparisonResult>> {
        ComparisonRepository::list_for(self.store.as_ref(), subscription_id).await
    }

    pub async fn get_comparison(&self, id: ComparisonId) -> Result<ComparisonResult> {
        ComparisonRepository::get(self.store.as_ref(), id).await?.ok_or_else(|| SyncError::not_found(format!("comparison {id}")))
    }

    pub async fn list_differences(&self, comparison_id: ComparisonId) -> Result<Vec<SchemaDifference>> {
        Ok(self.get_comparison(comparison_id).await?.differences)
    }

    pub async fn list_unsupported(&self, comparison_id: ComparisonId) -> Result<Vec<UnsupportedObject>> {
        Ok(self.get_comparison(comparison_id).await?.unsupported_objects)
    }

    // --- Lifecycle ----------------------------------------------------

    /// Emits `service-shutting-down`, stops every worker, and cancels
    /// outstanding debounce timers. Does not emit `service-reconnected` -
    /// that event, if it ever fires, comes from the realtime transport
    /// layer reconnecting a client, not from the engine.
    pub async fn shutdown(&self) {
        self.realtime.emit_global(EventName::ServiceShuttingDown, json!({}));
        let _ = self.shutdown_tx.send(true);
        self.debouncer.dispose();

        let mut handles = self.worker_handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("engine shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::db_source::{ObjectModifyRow, RawLogin, RawSchemaObject};
    use async_trait::async_trait;

    struct EmptySource;
    #[async_trait]
    impl SchemaSource for EmptySource {
        async fn probe_connectivity(&self, _c: &DatabaseConnection, _t: std::time::Duration) -> Result<()> {
            Ok(())
        }
        async fn enumerate_objects(&self, _c: &DatabaseConnection) -> Result<Vec<RawSchemaObject>> {
            Ok(vec![])
        }
        async fn enumerate_logins(&self, _c: &DatabaseConnection) -> Result<Vec<RawLogin>> {
            Ok(vec![])
        }
        async fn poll_modify_dates(&self, _c: &DatabaseConnection) -> Result<Vec<ObjectModifyRow>> {
            Ok(vec![])
        }
    }

    fn test_config() -> Configuration {
        let mut config = Configuration::default();
        config.workers = crate::sync::config::WorkerEnableFlags {
            database_polling: false,
            file_watching: false,
            reconciliation: false,
            cache_cleanup: false,
            health_check: false,
        };
        config
    }

    fn folder() -> ProjectFolder {
        ProjectFolder { root: std::env::temp_dir(), include_patterns: vec![], exclude_patterns: vec![], layout: LayoutKind::Flat }
    }

    fn connection() -> DatabaseConnection {
        DatabaseConnection {
            server: "localhost".into(),
            database: "db".into(),
            auth_kind: AuthKind::Integrated,
            username: None,
            secret: None,
            trust_certificate: true,
            connect_timeout: std::time::Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn create_then_pause_then_resume_round_trips() {
        let engine = SyncEngine::with_source(test_config(), Arc::new(EmptySource));
        let subscription = engine
            .create_subscription("Inventory".into(), connection(), folder(), SubscriptionOptions::default())
            .await
            .unwrap();

        let paused = engine.pause_subscription(subscription.id).await.unwrap();
        assert_eq!(paused.state, SubscriptionState::Paused);

        let resumed = engine.resume_subscription(subscription.id).await.unwrap();
        assert_eq!(resumed.state, SubscriptionState::Active);
    }

    /// Resume applied to an already-active subscription fails with a
    /// conflict error.
    #[tokio::test]
    async fn resume_on_active_subscription_is_conflict() {
        let engine = SyncEngine::with_source(test_config(), Arc::new(EmptySource));
        let subscription = engine
            .create_subscription("Inventory".into(), connection(), folder(), SubscriptionOptions::default())
            .await
            .unwrap();

        let err = engine.resume_subscription(subscription.id).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn duplicate_subscription_name_is_conflict() {
        let engine = SyncEngine::with_source(test_config(), Arc::new(EmptySource));
        engine.create_subscription("Inventory".into(), connection(), folder(), SubscriptionOptions::default()).await.unwrap();

        let err = engine.create_subscription("Inventory".into(), connection(), folder(), SubscriptionOptions::default()).await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
    }

    #[tokio::test]
    async fn delete_removes_subscription_and_history() {
        let engine = SyncEngine::with_source(test_config(), Arc::new(EmptySource));
        let subscription = engine
            .create_subscription("Inventory".into(), connection(), folder(), SubscriptionOptions::default())
            .await
            .unwrap();

        engine.delete_subscription(subscription.id).await.unwrap();
        let err = engine.get_subscription(subscription.id).await.unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }

    #[tokio::test]
    async fn trigger_comparison_runs_against_empty_folder() {
        let engine = SyncEngine::with_source(test_config(), Arc::new(EmptySource));
        let subscription = engine
            .create_subscription("Inventory".into(), connection(), folder(), SubscriptionOptions::default())
            .await
            .unwrap();

        let result = engine.trigger_comparison(subscription.id, true).await.unwrap();
        assert_eq!(result.status, ComparisonStatus::Synchronized);

        let comparisons = engine.list_comparisons(subscription.id).await.unwrap();
        assert_eq!(comparisons.len(), 1);
    }
}
