use std::{future::Future, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::sync::Mutex;

use crate::{
    control::ControlManager,
    db::models::ControlWithItems,
    error::{HseqError, HseqResult},
    log_error, log_info, log_warn,
};

use super::queue::{FailedAttempt, PassOutcome, PendingQueue};

const ENABLE_LOGS: bool = true;

/// Destination of replayed controls. Submitting the same snapshot twice must
/// be harmless: a timed-out submission may still have landed.
pub trait ControlSink: Send + Sync {
    fn submit(&self, control: &ControlWithItems) -> impl Future<Output = HseqResult<()>> + Send;
}

impl ControlSink for ControlManager {
    async fn submit(&self, control: &ControlWithItems) -> HseqResult<()> {
        self.import_session(control).await.map(|_| ())
    }
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub synced: usize,
    pub still_pending: usize,
    pub dead_lettered: usize,
    /// Another pass was already running; nothing was attempted.
    pub skipped: bool,
    pub last_error: Option<String>,
}

/// Replays queued controls in capture order.
///
/// A pass stops at the first failure so later captures never overtake an
/// earlier one for the same vehicle. Only one pass runs at a time.
pub struct SyncEngine<S> {
    queue: Arc<PendingQueue>,
    sink: S,
    in_flight: Mutex<()>,
    submit_timeout: Duration,
    max_attempts: u32,
}

impl<S: ControlSink> SyncEngine<S> {
    pub fn new(queue: Arc<PendingQueue>, sink: S, submit_timeout: Duration, max_attempts: u32) -> Self {
        Self {
            queue,
            sink,
            in_flight: Mutex::new(()),
            submit_timeout,
            max_attempts,
        }
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    pub async fn sync(&self) -> HseqResult<SyncReport> {
        let Ok(_pass) = self.in_flight.try_lock() else {
            return Ok(SyncReport {
                still_pending: self.queue.len().await,
                skipped: true,
                ..Default::default()
            });
        };

        let batch = self.queue.pending().await;
        if batch.is_empty() {
            return Ok(SyncReport::default());
        }

        let mut outcome = PassOutcome::default();
        for entry in batch {
            let result = match tokio::time::timeout(self.submit_timeout, self.sink.submit(&entry.control)).await {
                Ok(result) => result,
                Err(_) => Err(HseqError::Timeout {
                    operation: "submit pending control",
                }),
            };

            match result {
                Ok(()) => outcome.synced.push((entry.id, entry.revision)),
                Err(err) => {
                    log_warn!(
                        "Sync of control {} stopped at attempt {}: {}",
                        entry.control.session.id,
                        entry.attempts + 1,
                        err
                    );
                    outcome.failure = Some(FailedAttempt {
                        entry_id: entry.id,
                        permanent: matches!(err, HseqError::Validation(_)),
                        error: err.to_string(),
                    });
                    break;
                }
            }
        }

        let synced = outcome.synced.len();
        let last_error = outcome.failure.as_ref().map(|f| f.error.clone());
        let dead_lettered = match self.queue.apply_pass(outcome, self.max_attempts).await {
            Ok(count) => count,
            Err(err) => {
                // Submitted controls stay queued; replaying them is harmless.
                log_error!("Failed to record sync pass: {:#}", err);
                return Err(HseqError::SyncFailure(format!(
                    "failed to update pending queue: {err}"
                )));
            }
        };

        let report = SyncReport {
            synced,
            still_pending: self.queue.len().await,
            dead_lettered,
            skipped: false,
            last_error,
        };
        log_info!(
            "Sync pass: {} synced, {} pending, {} dead-lettered",
            report.synced,
            report.still_pending,
            report.dead_lettered
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, sync::Mutex as StdMutex};

    use chrono::Utc;
    use tokio::sync::Notify;

    use crate::{
        catalog::Catalog,
        control::draft_control,
        db::{
            models::{ControlStatus, ImportOutcome, ItemUpdate, NewControl},
            Database,
        },
        eligibility::EligibilityGate,
        nc::{EscalationPolicy, NcTracker},
        offline::PendingControl,
    };

    #[derive(Default)]
    struct RecordingSink {
        submitted: StdMutex<Vec<String>>,
        failing: StdMutex<HashSet<String>>,
    }

    impl RecordingSink {
        fn fail_vehicle(&self, vehicle: &str) {
            self.failing.lock().unwrap().insert(vehicle.to_string());
        }

        fn heal(&self) {
            self.failing.lock().unwrap().clear();
        }

        fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    impl ControlSink for Arc<RecordingSink> {
        async fn submit(&self, control: &ControlWithItems) -> HseqResult<()> {
            let vehicle = control.session.vehicle_id.clone();
            if self.failing.lock().unwrap().contains(&vehicle) {
                return Err(HseqError::SyncFailure(format!("backend rejected {vehicle}")));
            }
            self.submitted.lock().unwrap().push(vehicle);
            Ok(())
        }
    }

    struct BlockingSink {
        entered: Arc<Notify>,
        release: Arc<Notify>,
    }

    impl ControlSink for BlockingSink {
        async fn submit(&self, _control: &ControlWithItems) -> HseqResult<()> {
            self.entered.notify_one();
            self.release.notified().await;
            Ok(())
        }
    }

    struct SlowSink;

    impl ControlSink for SlowSink {
        async fn submit(&self, _control: &ControlWithItems) -> HseqResult<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    fn snapshot(vehicle: &str) -> ControlWithItems {
        draft_control(
            &Catalog::builtin(),
            NewControl {
                vehicle_id: vehicle.into(),
                driver_id: "D1".into(),
                inspector_id: "I1".into(),
                ..Default::default()
            },
            Utc::now(),
        )
        .unwrap()
    }

    async fn queue_with(dir: &tempfile::TempDir, vehicles: &[&str]) -> Arc<PendingQueue> {
        let queue = Arc::new(PendingQueue::open(dir.path().join("pending_controls.json")).unwrap());
        for vehicle in vehicles {
            queue.enqueue(snapshot(vehicle)).await.unwrap();
        }
        queue
    }

    fn pending_vehicles(entries: Vec<PendingControl>) -> Vec<String> {
        entries.into_iter().map(|e| e.control.session.vehicle_id).collect()
    }

    #[tokio::test]
    async fn failure_stops_the_pass_and_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1", "V2", "V3", "V4", "V5"]).await;
        let sink = Arc::new(RecordingSink::default());
        sink.fail_vehicle("V3");
        let engine = SyncEngine::new(queue.clone(), sink.clone(), Duration::from_secs(1), 10);

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 2);
        assert_eq!(report.still_pending, 3);
        assert!(report.last_error.unwrap().contains("V3"));
        assert_eq!(pending_vehicles(queue.pending().await), vec!["V3", "V4", "V5"]);
        assert_eq!(queue.pending().await[0].attempts, 1);

        sink.heal();
        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 3);
        assert_eq!(report.still_pending, 0);
        assert_eq!(sink.submitted(), vec!["V1", "V2", "V3", "V4", "V5"]);
    }

    #[tokio::test]
    async fn entry_is_dead_lettered_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1", "V2"]).await;
        let sink = Arc::new(RecordingSink::default());
        sink.fail_vehicle("V1");
        let engine = SyncEngine::new(queue.clone(), sink.clone(), Duration::from_secs(1), 2);

        assert_eq!(engine.sync().await.unwrap().dead_lettered, 0);
        let report = engine.sync().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.still_pending, 1);

        // The dead letter no longer blocks the entries behind it.
        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert_eq!(sink.submitted(), vec!["V2"]);
        assert_eq!(pending_vehicles(queue.dead_letters().await), vec!["V1"]);
    }

    #[tokio::test]
    async fn zero_max_attempts_retries_forever() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let sink = Arc::new(RecordingSink::default());
        sink.fail_vehicle("V1");
        let engine = SyncEngine::new(queue.clone(), sink, Duration::from_secs(1), 0);

        for _ in 0..5 {
            assert_eq!(engine.sync().await.unwrap().dead_lettered, 0);
        }
        assert_eq!(queue.pending().await[0].attempts, 5);
    }

    #[tokio::test]
    async fn concurrent_sync_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let engine = Arc::new(SyncEngine::new(
            queue,
            BlockingSink {
                entered: entered.clone(),
                release: release.clone(),
            },
            Duration::from_secs(5),
            10,
        ));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync().await })
        };
        entered.notified().await;

        let second = engine.sync().await.unwrap();
        assert!(second.skipped);
        assert_eq!(second.still_pending, 1);

        release.notify_one();
        let first = first.await.unwrap().unwrap();
        assert_eq!(first.synced, 1);
        assert!(!first.skipped);
    }

    #[tokio::test]
    async fn slow_sink_times_out_and_entry_stays_queued() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let engine = SyncEngine::new(queue.clone(), SlowSink, Duration::from_millis(20), 10);

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 0);
        assert_eq!(report.still_pending, 1);
        assert!(report.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn replay_into_store_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let control = queue.pending().await[0].control.clone();

        let db = Database::in_memory().unwrap();
        let manager = ControlManager::new(
            db,
            Arc::new(Catalog::builtin()),
            EscalationPolicy::default(),
            Duration::from_secs(5),
        );
        // An earlier attempt landed but its acknowledgement was lost.
        assert_eq!(manager.import_session(&control).await.unwrap(), ImportOutcome::Inserted);

        let engine = SyncEngine::new(queue.clone(), manager.clone(), Duration::from_secs(5), 10);
        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(queue.is_empty().await);

        let stored = manager.list_sessions_for_vehicle("V1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, control.session.id);
    }

    #[tokio::test]
    async fn malformed_snapshot_is_dead_lettered_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(PendingQueue::open(dir.path().join("pending_controls.json")).unwrap());
        let mut broken = snapshot("V1");
        broken.items.clear();
        queue.enqueue(broken).await.unwrap();
        queue.enqueue(snapshot("V2")).await.unwrap();

        let manager = ControlManager::new(
            Database::in_memory().unwrap(),
            Arc::new(Catalog::builtin()),
            EscalationPolicy::default(),
            Duration::from_secs(5),
        );
        let engine = SyncEngine::new(queue.clone(), manager, Duration::from_secs(5), 10);

        let report = engine.sync().await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(report.still_pending, 1);

        let report = engine.sync().await.unwrap();
        assert_eq!(report.synced, 1);
        assert!(queue.is_empty().await);
    }

    fn manager_on(db: &Database) -> ControlManager {
        ControlManager::new(
            db.clone(),
            Arc::new(Catalog::builtin()),
            EscalationPolicy::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn claimed_final_status_must_match_the_checklist() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(PendingQueue::open(dir.path().join("pending_controls.json")).unwrap());

        let mut failed_critical = snapshot("V1");
        for item in &mut failed_critical.items {
            item.is_conforme = Some(!item.is_critical);
        }
        failed_critical.session.status = ControlStatus::Conforme;
        failed_critical.session.finalized_at = Some(failed_critical.session.created_at);
        queue.enqueue(failed_critical).await.unwrap();

        let mut unevaluated = snapshot("V1");
        unevaluated.session.status = ControlStatus::Conforme;
        unevaluated.session.finalized_at = Some(unevaluated.session.created_at);
        queue.enqueue(unevaluated).await.unwrap();

        let db = Database::in_memory().unwrap();
        let manager = manager_on(&db);
        let engine = SyncEngine::new(queue.clone(), manager.clone(), Duration::from_secs(5), 10);

        assert_eq!(engine.sync().await.unwrap().dead_lettered, 1);
        assert_eq!(engine.sync().await.unwrap().dead_lettered, 1);
        assert!(queue.is_empty().await);
        assert_eq!(queue.dead_letters().await.len(), 2);

        assert!(manager.list_sessions_for_vehicle("V1").await.unwrap().is_empty());
        let gate = EligibilityGate::new(db.clone(), Duration::from_secs(5));
        assert!(!gate.is_eligible("V1").await);
        let stats = NcTracker::new(db, Duration::from_secs(5))
            .compute_stats(None)
            .await
            .unwrap();
        assert_eq!(stats.conformes, 0);
    }

    #[tokio::test]
    async fn finalized_snapshot_escalates_on_import() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let control = queue.pending().await[0].control.clone();
        let control_id = control.session.id.clone();
        for item in &control.items {
            queue
                .update_item(
                    &control_id,
                    &item.id,
                    ItemUpdate {
                        is_conforme: Some(!item.is_critical),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(queue.finalize(&control_id).await.unwrap(), ControlStatus::Refuse);
        let finalized = queue.get(&control_id).await.unwrap().control;

        let db = Database::in_memory().unwrap();
        let manager = manager_on(&db);
        let engine = SyncEngine::new(queue.clone(), manager.clone(), Duration::from_secs(5), 10);
        assert_eq!(engine.sync().await.unwrap().synced, 1);

        let tracker = NcTracker::new(db.clone(), Duration::from_secs(5));
        let raised = tracker.list_by_filters(Default::default()).await.unwrap();
        let critical = control.items.iter().filter(|i| i.is_critical).count();
        assert_eq!(raised.len(), critical);
        assert!(raised
            .iter()
            .all(|nc| nc.created_by == "I1" && nc.source_control_id.as_deref() == Some(control_id.as_str())));

        // Replaying the same snapshot raises nothing new.
        assert_eq!(manager.import_session(&finalized).await.unwrap(), ImportOutcome::AlreadyStored);
        assert_eq!(manager.get_session(&control_id).await.unwrap(), finalized);
        assert_eq!(tracker.list_by_filters(Default::default()).await.unwrap().len(), critical);
        assert!(!EligibilityGate::new(db, Duration::from_secs(5)).is_eligible("V1").await);
    }

    #[tokio::test]
    async fn newer_revision_of_in_progress_control_replaces_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let db = Database::in_memory().unwrap();
        let manager = manager_on(&db);

        let first = queue.pending().await[0].control.clone();
        assert_eq!(manager.import_session(&first).await.unwrap(), ImportOutcome::Inserted);

        let control_id = first.session.id.clone();
        let item_id = first.items[0].id.clone();
        queue
            .update_item(
                &control_id,
                &item_id,
                ItemUpdate {
                    is_conforme: Some(false),
                    comment: Some("feu cassé".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let second = queue.get(&control_id).await.unwrap().control;

        assert_eq!(manager.import_session(&second).await.unwrap(), ImportOutcome::Updated);
        assert_eq!(manager.import_session(&first).await.unwrap(), ImportOutcome::AlreadyStored);

        let stored = manager.get_session(&control_id).await.unwrap();
        assert_eq!(stored.items[0].is_conforme, Some(false));
        assert_eq!(stored.items[0].comment.as_deref(), Some("feu cassé"));
        assert_eq!(stored.session.status, ControlStatus::InProgress);
    }

    #[tokio::test]
    async fn entry_edited_during_a_pass_stays_queued() {
        let dir = tempfile::tempdir().unwrap();
        let queue = queue_with(&dir, &["V1"]).await;
        let control = queue.pending().await[0].control.clone();
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        let engine = Arc::new(SyncEngine::new(
            queue.clone(),
            BlockingSink {
                entered: entered.clone(),
                release: release.clone(),
            },
            Duration::from_secs(5),
            10,
        ));

        let pass = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.sync().await })
        };
        entered.notified().await;
        queue
            .update_observations(&control.session.id, Some("bâche déchirée".into()))
            .await
            .unwrap();
        release.notify_one();
        pass.await.unwrap().unwrap();

        let pending = queue.pending().await;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].revision, 1);
        assert_eq!(pending[0].attempts, 0);
        assert_eq!(
            pending[0].control.session.observations.as_deref(),
            Some("bâche déchirée")
        );
    }
}
