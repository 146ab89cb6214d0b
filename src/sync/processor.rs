//! `ChangeProcessor`: the debounced-batch consumer. Persists the
//! batch, emits `changes-detected`, decides whether to trigger a
//! comparison, and on success marks the batch's members processed.

use crate::error::SyncError;
use crate::sync::debouncer::BatchListener;
use crate::sync::model::{ChangeSource, PendingChangeBatch, SubscriptionState};
use crate::sync::orchestrator::ComparisonOrchestrator;
use crate::sync::realtime::{EventName, RealtimeEventPublisher};
use crate::sync::repository::{PendingChangeRepository, SubscriptionRepository};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct ChangeProcessor {
    pending_changes: Arc<dyn PendingChangeRepository>,
    subscriptions: Arc<dyn SubscriptionRepository>,
    realtime: Arc<RealtimeEventPublisher>,
    orchestrator: Arc<ComparisonOrchestrator>,
}

impl ChangeProcessor {
    pub fn new(
        pending_changes: Arc<dyn PendingChangeRepository>,
        subscriptions: Arc<dyn SubscriptionRepository>,
        realtime: Arc<RealtimeEventPublisher>,
        orchestrator: Arc<ComparisonOrchestrator>,
    ) -> Arc<Self> {
        Arc::new(Self {
            pending_changes,
            subscriptions,
            realtime,
            orchestrator,
        })
    }

    /// Persists the batch, decides whether to trigger a comparison, and
    /// marks the batch's changes processed on success.
    pub async fn process(&self, batch: PendingChangeBatch) {
        let subscription_id = batch.subscription_id;
        let change_ids: Vec<_> = batch.changes.iter().map(|c| c.id).collect();

        if let Err(e) = self.pending_changes.insert_many(batch.changes.clone()).await {
            warn!(subscription = %subscription_id, error = %e, "failed to persist pending change batch");
            return;
        }

        let subscription = match self.subscriptions.get(subscription_id).await {
            Ok(Some(s)) if s.state == SubscriptionState::Active => s,
            Ok(_) => {
                debug!(subscription = %subscription_id, "subscription missing or inactive, batch persisted only");
                return;
            }
            Err(e) => {
                warn!(subscription = %subscription_id, error = %e, "failed to load subscription for batch");
                return;
            }
        };

        self.realtime.emit(
            EventName::ChangesDetected,
            subscription_id,
            json!({"change_count": change_ids.len()}),
        );

        let has_fs = batch.changes.iter().any(|c| c.source == ChangeSource::Filesystem);
        let has_db = batch.changes.iter().any(|c| c.source == ChangeSource::Database);
        let options = &subscription.options;

        // Whichever source dominates; if both, file-change wins.
        let trigger = if options.auto_compare && has_fs && options.compare_on_file_change {
            Some("file-change")
        } else if options.auto_compare && has_db && options.compare_on_database_change {
            Some("database-change")
        } else {
            None
        };

        let Some(trigger) = trigger else {
            return;
        };

        match self.orchestrator.run(subscription_id, false, trigger).await {
            Ok(_) => {
                if let Err(e) = self.pending_changes.mark_processed(&change_ids).await {
                    warn!(subscription = %subscription_id, error = %e, "failed to mark batch processed after successful comparison");
                }
            }
            Err(SyncError::Conflict(_)) => {
                // Another comparison is already running; leave members
                // unprocessed for the reconciler to mop up.
                debug!(subscription = %subscription_id, "comparison already in progress, leaving batch for reconciliation");
            }
            Err(e) => {
                warn!(subscription = %subscription_id, error = %e, "triggered comparison failed, leaving batch unprocessed");
            }
        }
    }
}

impl BatchListener for ChangeProcessor {
    /// The debouncer's listener contract requires a non-blocking call; we
    /// spawn the actual work and return immediately.
    fn on_batch(&self, batch: PendingChangeBatch) {
        let this = self.clone();
        tokio::spawn(async move { this.process(batch).await });
    }
}
