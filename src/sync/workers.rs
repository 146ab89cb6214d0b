//! The five background workers. Each is a long-lived task driven by its own
//! timer, observes only active subscriptions, and stops cleanly when told
//! to via a shared shutdown signal.

use crate::sync::config::Configuration;
use crate::sync::db_source::SchemaSource;
use crate::sync::debouncer::Debouncer;
use crate::sync::model::*;
use crate::sync::orchestrator::ComparisonOrchestrator;
use crate::sync::realtime::{EventName, RealtimeEventPublisher};
use crate::sync::repository::{InMemoryStore, PendingChangeRepository, SubscriptionRepository};
use dashmap::DashMap;
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use rand::Rng;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Shared shutdown signal: workers stop their loop once the value turns `true`.
pub type ShutdownSignal = watch::Receiver<bool>;

fn stopping(signal: &ShutdownSignal) -> bool {
    *signal.borrow()
}

/// Tracks the last observed `modify_date` per (subscription, object) so
/// only genuine changes - not the first observation - produce a
/// `DetectedChange` (P9).
pub struct DatabasePollingWorker {
    subscriptions: Arc<dyn SubscriptionRepository>,
    source: Arc<dyn SchemaSource>,
    debouncer: Arc<Debouncer>,
    realtime: Arc<RealtimeEventPublisher>,
    poll_interval: Duration,
    last_seen: DashMap<(SubscriptionId, String, ObjectType), chrono::DateTime<chrono::Utc>>,
}

impl DatabasePollingWorker {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        source: Arc<dyn SchemaSource>,
        debouncer: Arc<Debouncer>,
        realtime: Arc<RealtimeEventPublisher>,
        config: &Configuration,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscriptions,
            source,
            debouncer,
            realtime,
            poll_interval: config.monitoring.database_poll_interval(),
            last_seen: DashMap::new(),
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.poll_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.poll_once().await,
                    _ = shutdown.changed() => {
                        if stopping(&shutdown) {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn poll_once(&self) {
        let subscriptions = match self.subscriptions.list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "database polling worker failed to list subscriptions");
                return;
            }
        };

        for subscription in subscriptions
            .into_iter()
            .filter(Subscription::is_active)
            .filter(|s| s.options.compare_on_database_change)
        {
            match self.source.poll_modify_dates(&subscription.database).await {
                Ok(rows) => self.apply_rows(&subscription, rows),
                Err(e) => warn!(subscription = %subscription.id, error = %e, "poll_modify_dates failed"),
            }
        }
    }

    fn apply_rows(&self, subscription: &Subscription, rows: Vec<crate::sync::db_source::ObjectModifyRow>) {
        for row in rows {
            let identifier = format!("{}.{}", row.schema_name, row.object_name);
            let key = (subscription.id, identifier.clone(), row.object_type);

            let changed = match self.last_seen.get(&key) {
                None => false,
                Some(previous) => row.modify_instant > *previous,
            };
            self.last_seen.insert(key, row.modify_instant);

            if changed {
                self.debouncer.record(
                    subscription.id,
                    identifier.clone(),
                    ChangeSource::Database,
                    ChangeKind::Modified,
                    Some(row.object_type),
                );
                self.realtime.emit(
                    EventName::DatabaseChanged,
                    subscription.id,
                    json!({"object": identifier, "object_type": row.object_type}),
                );
            }
        }
    }
}

/// Maintains one `notify` watcher per active subscription for low-latency
/// detection, backed by a periodic full rescan that catches events a
/// watcher backend missed (editor atomic saves, watch overflow).
pub struct FileWatchingWorker {
    subscriptions: Arc<dyn SubscriptionRepository>,
    debouncer: Arc<Debouncer>,
    realtime: Arc<RealtimeEventPublisher>,
    watchers: DashMap<SubscriptionId, RecommendedWatcher>,
    known_files: DashMap<SubscriptionId, HashMap<PathBuf, SystemTime>>,
    watcher_backoff: DashMap<SubscriptionId, (u32, std::time::Instant)>,
}

const RECONCILE_SCAN_INTERVAL: Duration = Duration::from_secs(30);
const WATCHER_MAINTENANCE_INTERVAL: Duration = Duration::from_secs(5);
const WATCHER_MAX_BACKOFF_SECS: u64 = 300;

impl FileWatchingWorker {
    pub fn new(subscriptions: Arc<dyn SubscriptionRepository>, debouncer: Arc<Debouncer>, realtime: Arc<RealtimeEventPublisher>) -> Arc<Self> {
        Arc::new(Self {
            subscriptions,
            debouncer,
            realtime,
            watchers: DashMap::new(),
            known_files: DashMap::new(),
            watcher_backoff: DashMap::new(),
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let (tx, mut rx) = mpsc::unbounded_channel::<(SubscriptionId, notify::Event)>();
            let mut maintenance = tokio::time::interval(WATCHER_MAINTENANCE_INTERVAL);
            let mut reconcile = tokio::time::interval(RECONCILE_SCAN_INTERVAL);

            loop {
                tokio::select! {
                    _ = maintenance.tick() => self.sync_watchers(&tx).await,
                    _ = reconcile.tick() => self.reconciliation_scan().await,
                    Some((subscription_id, event)) = rx.recv() => self.handle_event(subscription_id, event),
                    _ = shutdown.changed() => {
                        if stopping(&shutdown) {
                            break;
                        }
                    }
                }
            }
            self.watchers.clear();
        })
    }

    async fn sync_watchers(&self, tx: &mpsc::UnboundedSender<(SubscriptionId, notify::Event)>) {
        let subscriptions = match self.subscriptions.list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "file watching worker failed to list subscriptions");
                return;
            }
        };

        let active_ids: HashSet<SubscriptionId> = subscriptions.iter().filter(|s| s.is_active()).map(|s| s.id).collect();
        self.watchers.retain(|id, _| active_ids.contains(id));

        for subscription in subscriptions.iter().filter(|s| s.is_active()) {
            if self.watchers.contains_key(&subscription.id) {
                continue;
            }

            if let Some(entry) = self.watcher_backoff.get(&subscription.id) {
                let (_, retry_at) = *entry;
                if std::time::Instant::now() < retry_at {
                    continue;
                }
            }

            let subscription_id = subscription.id;
            let sender = tx.clone();
            let watcher_result = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
                if let Ok(event) = res {
                    let _ = sender.send((subscription_id, event));
                }
            });

            let mut watcher = match watcher_result {
                Ok(w) => w,
                Err(e) => {
                    self.bump_backoff(subscription.id);
                    warn!(subscription = %subscription.id, error = %e, "failed to create file watcher");
                    continue;
                }
            };

            if let Err(e) = watcher.watch(&subscription.folder.root, RecursiveMode::Recursive) {
                self.bump_backoff(subscription.id);
                warn!(subscription = %subscription.id, error = %e, "failed to watch project folder");
                continue;
            }

            self.watcher_backoff.remove(&subscription.id);
            self.watchers.insert(subscription.id, watcher);
            debug!(subscription = %subscription.id, "file watcher established");
        }
    }

    fn bump_backoff(&self, subscription_id: SubscriptionId) {
        let next_secs = self
            .watcher_backoff
            .get(&subscription_id)
            .map(|entry| (entry.0 * 2).min(WATCHER_MAX_BACKOFF_SECS as u32))
            .unwrap_or(1);
        self.watcher_backoff
            .insert(subscription_id, (next_secs, std::time::Instant::now() + Duration::from_secs(next_secs as u64)));
    }

    fn handle_event(&self, subscription_id: SubscriptionId, event: notify::Event) {
        use notify::event::{ModifyKind, RenameMode};
        use notify::EventKind;

        match event.kind {
            EventKind::Create(_) => {
                for path in &event.paths {
                    self.maybe_record(subscription_id, path, ChangeKind::Created);
                }
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
                // A rename is modeled as delete(old) + create(new) (B1).
                self.maybe_record(subscription_id, &event.paths[0], ChangeKind::Deleted);
                self.maybe_record(subscription_id, &event.paths[1], ChangeKind::Created);
            }
            EventKind::Modify(_) => {
                for path in &event.paths {
                    self.maybe_record(subscription_id, path, ChangeKind::Modified);
                }
            }
            EventKind::Remove(_) => {
                for path in &event.paths {
                    self.maybe_record(subscription_id, path, ChangeKind::Deleted);
                }
            }
            _ => {}
        }
    }

    fn maybe_record(&self, subscription_id: SubscriptionId, path: &Path, kind: ChangeKind) {
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            return;
        }
        let identifier = path.to_string_lossy().into_owned();
        self.debouncer.record(subscription_id, identifier.clone(), ChangeSource::Filesystem, kind, None);
        self.realtime.emit(EventName::FileChanged, subscription_id, json!({"path": identifier, "kind": kind}));
    }

    async fn reconciliation_scan(&self) {
        let subscriptions = match self.subscriptions.list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "file watching worker reconciliation scan failed to list subscriptions");
                return;
            }
        };

        let active_ids: HashSet<SubscriptionId> = subscriptions.iter().filter(|s| s.is_active()).map(|s| s.id).collect();
        self.known_files.retain(|id, _| active_ids.contains(id));

        for subscription in subscriptions.iter().filter(|s| s.is_active()) {
            self.scan_one(subscription).await;
        }
    }

    async fn scan_one(&self, subscription: &Subscription) {
        let root = subscription.folder.root.clone();
        let current = tokio::task::spawn_blocking(move || scan_sql_files(&root)).await.unwrap_or_default();

        match self.known_files.get(&subscription.id) {
            None => {
                // First observation seeds the baseline; a folder that
                // already has files at monitoring start is not itself a
                // change.
                self.known_files.insert(subscription.id, current);
            }
            Some(previous_ref) => {
                let previous = previous_ref.clone();
                drop(previous_ref);

                for (path, modified) in &current {
                    match previous.get(path) {
                        None => self.maybe_record(subscription.id, path, ChangeKind::Created),
                        Some(previous_modified) if previous_modified != modified => {
                            self.maybe_record(subscription.id, path, ChangeKind::Modified)
                        }
                        _ => {}
                    }
                }
                for path in previous.keys() {
                    if !current.contains_key(path) {
                        self.maybe_record(subscription.id, path, ChangeKind::Deleted);
                    }
                }

                self.known_files.insert(subscription.id, current);
            }
        }
    }
}

fn scan_sql_files(root: &Path) -> HashMap<PathBuf, SystemTime> {
    let mut map = HashMap::new();
    if !root.exists() {
        return map;
    }
    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("sql") {
            continue;
        }
        if let Ok(metadata) = entry.metadata() {
            if let Ok(modified) = metadata.modified() {
                map.insert(path.to_path_buf(), modified);
            }
        }
    }
    map
}

/// Periodically runs a full comparison per active subscription as a
/// backstop against missed incremental events, and clears any pending
/// changes the debounced path left unprocessed.
pub struct ReconciliationWorker {
    subscriptions: Arc<dyn SubscriptionRepository>,
    pending_changes: Arc<InMemoryStore>,
    orchestrator: Arc<ComparisonOrchestrator>,
    interval: Duration,
}

const RECONCILIATION_STARTUP_DELAY: Duration = Duration::from_secs(60);
const RECONCILIATION_MAX_JITTER_SECS: u64 = 30;

impl ReconciliationWorker {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        pending_changes: Arc<InMemoryStore>,
        orchestrator: Arc<ComparisonOrchestrator>,
        config: &Configuration,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscriptions,
            pending_changes,
            orchestrator,
            interval: config.monitoring.full_reconciliation_interval(),
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(RECONCILIATION_STARTUP_DELAY) => {}
                _ = shutdown.changed() => {
                    if stopping(&shutdown) {
                        return;
                    }
                }
            }

            let mut ticker = tokio::time::interval(self.interval);
            ticker.tick().await; // consume the immediate first tick; startup delay already covered it
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_round().await,
                    _ = shutdown.changed() => {
                        if stopping(&shutdown) {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn run_round(&self) {
        let subscriptions = match self.subscriptions.list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "reconciliation worker failed to list subscriptions");
                return;
            }
        };

        let now = chrono::Utc::now();
        let interval = self.interval;

        for subscription in subscriptions.into_iter().filter(|s| s.is_active() && s.options.auto_compare) {
            if let Some(last_compared) = subscription.timestamps.last_compared {
                if now - last_compared < chrono::Duration::from_std(interval).unwrap_or_default() {
                    debug!(subscription = %subscription.id, "skipping reconciliation, compared within the last interval");
                    continue;
                }
            }

            let orchestrator = self.orchestrator.clone();
            let pending_changes = self.pending_changes.clone();
            tokio::spawn(async move {
                let jitter = rand::rng().random_range(0..=RECONCILIATION_MAX_JITTER_SECS);
                tokio::time::sleep(Duration::from_secs(jitter)).await;

                match orchestrator.run(subscription.id, true, "reconciliation").await {
                    Ok(result) => {
                        if let Err(e) = pending_changes.mark_all_processed_for(subscription.id).await {
                            warn!(subscription = %subscription.id, error = %e, "failed to clear pending changes after reconciliation");
                        }
                        info!(subscription = %subscription.id, status = ?result.status, "reconciliation pass complete");
                    }
                    Err(crate::error::SyncError::Conflict(_)) => {
                        debug!(subscription = %subscription.id, "reconciliation skipped, comparison already in progress");
                    }
                    Err(e) => {
                        warn!(subscription = %subscription.id, error = %e, "reconciliation pass failed");
                    }
                }
            });
        }
    }
}

/// Periodically enforces the retention policy across all four collections.
pub struct CacheCleanupWorker {
    store: Arc<InMemoryStore>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    snapshot_retention: Duration,
    max_cached_snapshots_per_subscription: usize,
    comparison_history_retention: Duration,
    pending_change_retention: Duration,
}

const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(3600);

impl CacheCleanupWorker {
    pub fn new(store: Arc<InMemoryStore>, subscriptions: Arc<dyn SubscriptionRepository>, config: &Configuration) -> Arc<Self> {
        Arc::new(Self {
            store,
            subscriptions,
            snapshot_retention: config.cache.snapshot_retention(),
            max_cached_snapshots_per_subscription: config.cache.max_cached_snapshots_per_subscription,
            comparison_history_retention: config.cache.comparison_history_retention(),
            pending_change_retention: config.cache.pending_change_retention(),
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.run_once().await,
                    _ = shutdown.changed() => {
                        if stopping(&shutdown) {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn run_once(&self) {
        let now = chrono::Utc::now();

        let snapshots_removed = self.store.prune_snapshots_older_than(now - chrono::Duration::from_std(self.snapshot_retention).unwrap_or_default());
        let comparisons_removed =
            self.store.prune_comparisons_older_than(now - chrono::Duration::from_std(self.comparison_history_retention).unwrap_or_default());
        let pending_removed =
            self.store.prune_processed_pending_changes_older_than(now - chrono::Duration::from_std(self.pending_change_retention).unwrap_or_default());

        let mut capped = 0;
        if let Ok(subscriptions) = self.subscriptions.list().await {
            for subscription in subscriptions {
                capped += self.store.enforce_snapshot_cap(subscription.id, self.max_cached_snapshots_per_subscription);
            }
        }

        info!(
            snapshots_removed,
            comparisons_removed, pending_removed, capped, "cache cleanup pass complete"
        );
    }
}

/// Derives and persists `SubscriptionHealth` per active subscription, and
/// emits `subscription-health-changed` only when the derived status
/// actually changes (S6).
pub struct HealthCheckWorker {
    subscriptions: Arc<dyn SubscriptionRepository>,
    source: Arc<dyn SchemaSource>,
    realtime: Arc<RealtimeEventPublisher>,
    interval: Duration,
    probe_timeout: Duration,
}

impl HealthCheckWorker {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionRepository>,
        source: Arc<dyn SchemaSource>,
        realtime: Arc<RealtimeEventPublisher>,
        config: &Configuration,
    ) -> Arc<Self> {
        Arc::new(Self {
            subscriptions,
            source,
            realtime,
            interval: config.monitoring.health_check_interval(),
            probe_timeout: Duration::from_secs(5),
        })
    }

    pub fn spawn(self: Arc<Self>, mut shutdown: ShutdownSignal) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.check_all().await,
                    _ = shutdown.changed() => {
                        if stopping(&shutdown) {
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn check_all(&self) {
        let subscriptions = match self.subscriptions.list().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "health check worker failed to list subscriptions");
                return;
            }
        };

        for subscription in subscriptions.into_iter().filter(|s| s.is_active()) {
            self.check_one(subscription).await;
        }
    }

    async fn check_one(&self, mut subscription: Subscription) {
        let previous_status = subscription.health.overall_status;
        let now = chrono::Utc::now();

        let db_result = self.source.probe_connectivity(&subscription.database, self.probe_timeout).await;
        let db_ok = db_result.is_ok();

        let folder_ok = std::fs::metadata(&subscription.folder.root).map(|m| m.is_dir()).unwrap_or(false);

        let files_present = folder_ok
            && walkdir::WalkDir::new(&subscription.folder.root)
                .into_iter()
                .filter_map(|e| e.ok())
                .any(|e| e.file_type().is_file() && e.path().extension().and_then(|x| x.to_str()) == Some("sql"));

        let mut issues = Vec::new();
        if !db_ok {
            let message = db_result.err().map(|e| e.to_string()).unwrap_or_else(|| "connectivity probe failed".into());
            issues.push(HealthIssue { kind: HealthIssueKind::Database, message, since: now });
        }
        if !folder_ok {
            issues.push(HealthIssue {
                kind: HealthIssueKind::Folder,
                message: format!("project folder not accessible: {}", subscription.folder.root.display()),
                since: now,
            });
        } else if !files_present {
            issues.push(HealthIssue { kind: HealthIssueKind::Files, message: "no .sql files found in project folder".into(), since: now });
        }

        let status = SubscriptionHealth::derive_status(db_ok, folder_ok, files_present);

        subscription.health.database_connectable = db_ok;
        subscription.health.folder_accessible = folder_ok;
        subscription.health.files_present = files_present;
        subscription.health.last_checked = Some(now);
        subscription.health.last_error = issues.first().map(|i| i.message.clone());
        subscription.health.overall_status = status;
        if !issues.is_empty() {
            subscription.health.push_issues(issues);
        }
        subscription.timestamps.updated = now;

        let subscription_id = subscription.id;
        if let Err(e) = self.subscriptions.update(subscription).await {
            warn!(subscription = %subscription_id, error = %e, "failed to persist health check result");
            return;
        }

        if status != previous_status {
            self.realtime.emit(
                EventName::SubscriptionHealthChanged,
                subscription_id,
                json!({"previous_status": previous_status, "status": status}),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::db_source::{ObjectModifyRow, RawLogin, RawSchemaObject};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sub(root: std::path::PathBuf) -> Subscription {
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
            ProjectFolder { root, include_patterns: vec![], exclude_patterns: vec![], layout: LayoutKind::Flat },
            SubscriptionOptions::default(),
        )
    }

    struct RowSource {
        rows: Vec<ObjectModifyRow>,
    }

    #[async_trait]
    impl SchemaSource for RowSource {
        async fn probe_connectivity(&self, _c: &DatabaseConnection, _t: std::time::Duration) -> crate::error::Result<()> {
            Ok(())
        }
        async fn enumerate_objects(&self, _c: &DatabaseConnection) -> crate::error::Result<Vec<RawSchemaObject>> {
            Ok(vec![])
        }
        async fn enumerate_logins(&self, _c: &DatabaseConnection) -> crate::error::Result<Vec<RawLogin>> {
            Ok(vec![])
        }
        async fn poll_modify_dates(&self, _c: &DatabaseConnection) -> crate::error::Result<Vec<ObjectModifyRow>> {
            Ok(self.rows.clone())
        }
    }

    /// P9/S4: the first observation of an object only seeds the tracking
    /// map; it must not itself be reported as a change.
    #[tokio::test]
    async fn first_poll_seeds_without_emitting_change() {
        let store = InMemoryStore::new();
        let subscription = sub(std::env::temp_dir());
        SubscriptionRepository::insert(store.as_ref(), subscription.clone()).await.unwrap();

        let build_calls = Arc::new(AtomicUsize::new(0));
        let _ = build_calls;
        let realtime = RealtimeEventPublisher::new();
        let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Collector(Arc<std::sync::Mutex<Vec<PendingChangeBatch>>>);
        impl crate::sync::debouncer::BatchListener for Collector {
            fn on_batch(&self, batch: PendingChangeBatch) {
                self.0.lock().unwrap().push(batch);
            }
        }
        let debouncer = Debouncer::new(Duration::from_millis(10), Arc::new(Collector(batches.clone())));

        let modify_instant = chrono::Utc::now();
        let source: Arc<dyn SchemaSource> = Arc::new(RowSource {
            rows: vec![ObjectModifyRow {
                schema_name: "dbo".into(),
                object_name: "Foo".into(),
                object_type: ObjectType::Table,
                modify_instant,
            }],
        });

        let worker = DatabasePollingWorker::new(store.clone(), source, debouncer, realtime, &Configuration::default());
        worker.poll_once().await;

        assert!(worker.last_seen.contains_key(&(subscription.id, "dbo.Foo".to_string(), ObjectType::Table)));
        assert!(batches.lock().unwrap().is_empty(), "first observation must not produce a debounced batch");
    }

    /// A later poll with a newer `modify_date` than the seeded value does
    /// produce a change.
    #[tokio::test]
    async fn later_poll_with_newer_modify_date_emits_change() {
        let store = InMemoryStore::new();
        let subscription = sub(std::env::temp_dir());
        SubscriptionRepository::insert(store.as_ref(), subscription.clone()).await.unwrap();

        let realtime = RealtimeEventPublisher::new();
        let batches = Arc::new(std::sync::Mutex::new(Vec::new()));
        struct Collector(Arc<std::sync::Mutex<Vec<PendingChangeBatch>>>);
        impl crate::sync::debouncer::BatchListener for Collector {
            fn on_batch(&self, batch: PendingChangeBatch) {
                self.0.lock().unwrap().push(batch);
            }
        }
        let debouncer = Debouncer::new(Duration::from_millis(10), Arc::new(Collector(batches.clone())));

        let first_instant = chrono::Utc::now();
        let source = Arc::new(std::sync::Mutex::new(first_instant));
        struct MutableRowSource(Arc<std::sync::Mutex<chrono::DateTime<chrono::Utc>>>);
        #[async_trait]
        impl SchemaSource for MutableRowSource {
            async fn probe_connectivity(&self, _c: &DatabaseConnection, _t: std::time::Duration) -> crate::error::Result<()> {
                Ok(())
            }
            async fn enumerate_objects(&self, _c: &DatabaseConnection) -> crate::error::Result<Vec<RawSchemaObject>> {
                Ok(vec![])
            }
            async fn enumerate_logins(&self, _c: &DatabaseConnection) -> crate::error::Result<Vec<RawLogin>> {
                Ok(vec![])
            }
            async fn poll_modify_dates(&self, _c: &DatabaseConnection) -> crate::error::Result<Vec<ObjectModifyRow>> {
                let instant = *self.0.lock().unwrap();
                Ok(vec![ObjectModifyRow { schema_name: "dbo".into(), object_name: "Foo".into(), object_type: ObjectType::Table, modify_instant: instant }])
            }
        }

        let worker = DatabasePollingWorker::new(store.clone(), Arc::new(MutableRowSource(source.clone())), debouncer, realtime, &Configuration::default());
        worker.poll_once().await;
        assert!(batches.lock().unwrap().is_empty());

        *source.lock().unwrap() = first_instant + chrono::Duration::seconds(5);
        worker.poll_once().await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[test]
    fn scan_sql_files_ignores_non_sql_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.sql"), "CREATE TABLE a (id INT)").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignore me").unwrap();

        let found = scan_sql_files(dir.path());
        assert_eq!(found.len(), 1);
        assert!(found.keys().next().unwrap().ends_with("a.sql"));
    }
}
