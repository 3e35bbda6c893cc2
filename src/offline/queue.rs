use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    control::{apply_item_update, finalize_snapshot, set_observations, sign_snapshot},
    db::models::{ControlItem, ControlSession, ControlStatus, ControlWithItems, ItemUpdate, SignatureRole},
    error::{HseqError, HseqResult},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    /// Reported only; synced entries are removed from the queue.
    Synced,
    /// Dead letter: kept on disk for review, no longer replayed.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingControl {
    pub id: String,
    pub control: ControlWithItems,
    pub sync_status: SyncStatus,
    #[serde(default)]
    pub attempts: u32,
    /// Bumped on every offline edit.
    #[serde(default)]
    pub revision: u32,
    pub last_error: Option<String>,
    pub queued_at: DateTime<Utc>,
}

/// Result of one replay attempt, applied to the queue in a single write.
#[derive(Debug, Default)]
pub(crate) struct PassOutcome {
    /// Entry id and the revision that was submitted.
    pub synced: Vec<(String, u32)>,
    pub failure: Option<FailedAttempt>,
}

#[derive(Debug)]
pub(crate) struct FailedAttempt {
    pub entry_id: String,
    pub error: String,
    /// The entry can never succeed as is; dead-letter it right away.
    pub permanent: bool,
}

/// Controls captured offline, persisted as one JSON blob.
///
/// Every mutation is a read-modify-write of the whole list under the mutex,
/// so enqueues from several tasks and an ongoing sync never lose entries.
pub struct PendingQueue {
    path: PathBuf,
    entries: Mutex<Vec<PendingControl>>,
}

impl PendingQueue {
    pub fn open(path: PathBuf) -> Result<Self> {
        let entries = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read pending controls from {}", path.display()))?;
            // A corrupt queue is an error, not an empty queue: it holds
            // inspections that exist nowhere else.
            serde_json::from_str(&contents).with_context(|| {
                format!("Failed to parse pending controls in {}", path.display())
            })?
        } else {
            Vec::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub async fn enqueue(&self, control: ControlWithItems) -> Result<PendingControl> {
        let entry = PendingControl {
            id: Uuid::new_v4().to_string(),
            control,
            sync_status: SyncStatus::Pending,
            attempts: 0,
            revision: 0,
            last_error: None,
            queued_at: Utc::now(),
        };

        let mut guard = self.entries.lock().await;
        guard.push(entry.clone());
        if let Err(err) = self.persist(&guard) {
            guard.pop();
            return Err(err);
        }
        Ok(entry)
    }

    /// Entries awaiting replay, oldest first.
    pub async fn pending(&self) -> Vec<PendingControl> {
        self.with_status(SyncStatus::Pending).await
    }

    pub async fn dead_letters(&self) -> Vec<PendingControl> {
        self.with_status(SyncStatus::Failed).await
    }

    pub async fn len(&self) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.sync_status == SyncStatus::Pending)
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Puts dead letters back in the replay path at their original position.
    pub async fn requeue_dead_letters(&self) -> Result<usize> {
        let mut guard = self.entries.lock().await;
        let mut updated = guard.clone();
        let mut count = 0;
        for entry in updated
            .iter_mut()
            .filter(|e| e.sync_status == SyncStatus::Failed)
        {
            entry.sync_status = SyncStatus::Pending;
            entry.attempts = 0;
            count += 1;
        }
        if count > 0 {
            self.persist(&updated)?;
            *guard = updated;
        }
        Ok(count)
    }

    async fn with_status(&self, status: SyncStatus) -> Vec<PendingControl> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.sync_status == status)
            .cloned()
            .collect()
    }

    pub async fn get(&self, control_id: &str) -> Option<PendingControl> {
        self.entries
            .lock()
            .await
            .iter()
            .find(|e| e.control.session.id == control_id)
            .cloned()
    }

    pub async fn update_item(
        &self,
        control_id: &str,
        item_id: &str,
        update: ItemUpdate,
    ) -> HseqResult<ControlItem> {
        self.edit(control_id, |control, now| apply_item_update(control, item_id, update, now))
            .await
    }

    /// Derives the status from the queued checklist. Non-conformities are
    /// raised when the control reaches the store.
    pub async fn finalize(&self, control_id: &str) -> HseqResult<ControlStatus> {
        self.edit(control_id, finalize_snapshot).await
    }

    pub async fn sign(
        &self,
        control_id: &str,
        role: SignatureRole,
        signature_url: Option<String>,
    ) -> HseqResult<ControlSession> {
        self.edit(control_id, |control, now| {
            sign_snapshot(control, role, signature_url, now);
            Ok(control.session.clone())
        })
        .await
    }

    pub async fn update_observations(
        &self,
        control_id: &str,
        observations: Option<String>,
    ) -> HseqResult<ControlSession> {
        self.edit(control_id, |control, now| {
            set_observations(control, observations, now)?;
            Ok(control.session.clone())
        })
        .await
    }

    /// Applies `edit` to a pending control and persists it. Each edit moves
    /// `updated_at` strictly forward so the store can tell revisions apart.
    async fn edit<T, F>(&self, control_id: &str, edit: F) -> HseqResult<T>
    where
        F: FnOnce(&mut ControlWithItems, DateTime<Utc>) -> HseqResult<T>,
    {
        let mut guard = self.entries.lock().await;
        let index = guard
            .iter()
            .position(|e| e.sync_status == SyncStatus::Pending && e.control.session.id == control_id)
            .ok_or_else(|| HseqError::not_found("pending control", control_id))?;

        let mut control = guard[index].control.clone();
        let now = Utc::now()
            .trunc_subsecs(6)
            .max(control.session.updated_at + Duration::microseconds(1));
        let result = edit(&mut control, now)?;

        let previous = std::mem::replace(&mut guard[index].control, control);
        guard[index].revision = guard[index].revision.saturating_add(1);
        if let Err(err) = self.persist(&guard) {
            guard[index].control = previous;
            guard[index].revision -= 1;
            return Err(err.into());
        }
        Ok(result)
    }

    /// Drops entries synced at their current revision and records the failed
    /// attempt, if any. Entries edited while the pass ran stay pending.
    /// Returns how many entries were dead-lettered. `max_attempts == 0` never
    /// dead-letters transient failures.
    pub(crate) async fn apply_pass(&self, outcome: PassOutcome, max_attempts: u32) -> Result<usize> {
        let mut guard = self.entries.lock().await;
        let mut updated: Vec<PendingControl> = guard
            .iter()
            .filter(|e| {
                !outcome
                    .synced
                    .iter()
                    .any(|(id, revision)| *id == e.id && *revision == e.revision)
            })
            .cloned()
            .collect();

        let mut dead_lettered = 0;
        if let Some(failure) = outcome.failure {
            if let Some(entry) = updated.iter_mut().find(|e| e.id == failure.entry_id) {
                entry.attempts = entry.attempts.saturating_add(1);
                entry.last_error = Some(failure.error);
                let exhausted = max_attempts > 0 && entry.attempts >= max_attempts;
                if failure.permanent || exhausted {
                    entry.sync_status = SyncStatus::Failed;
                    dead_lettered += 1;
                }
            }
        }

        self.persist(&updated)?;
        *guard = updated;
        Ok(dead_lettered)
    }

    fn persist(&self, entries: &[PendingControl]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create queue directory {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serialized)
            .with_context(|| format!("Failed to write pending controls to {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{catalog::Catalog, control::draft_control, db::models::NewControl};

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

    #[tokio::test]
    async fn entries_survive_reopen_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_controls.json");

        let queue = PendingQueue::open(path.clone()).unwrap();
        for vehicle in ["V1", "V2", "V3"] {
            queue.enqueue(snapshot(vehicle)).await.unwrap();
        }
        drop(queue);

        let reopened = PendingQueue::open(path).unwrap();
        let vehicles: Vec<String> = reopened
            .pending()
            .await
            .into_iter()
            .map(|e| e.control.session.vehicle_id)
            .collect();
        assert_eq!(vehicles, vec!["V1", "V2", "V3"]);
    }

    #[tokio::test]
    async fn corrupt_queue_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_controls.json");
        fs::write(&path, "{not json").unwrap();
        assert!(PendingQueue::open(path).is_err());
    }

    #[tokio::test]
    async fn concurrent_enqueues_are_all_kept() {
        let dir = tempfile::tempdir().unwrap();
        let queue = std::sync::Arc::new(
            PendingQueue::open(dir.path().join("pending_controls.json")).unwrap(),
        );

        let mut handles = Vec::new();
        for i in 0..8 {
            let queue = queue.clone();
            handles.push(tokio::spawn(async move {
                queue.enqueue(snapshot(&format!("V{i}"))).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(queue.len().await, 8);
    }

    #[tokio::test]
    async fn exhausted_entries_become_dead_letters_and_can_be_requeued() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PendingQueue::open(dir.path().join("pending_controls.json")).unwrap();
        let entry = queue.enqueue(snapshot("V1")).await.unwrap();

        for attempt in 1..=2 {
            let dead = queue
                .apply_pass(
                    PassOutcome {
                        synced: Vec::new(),
                        failure: Some(FailedAttempt {
                            entry_id: entry.id.clone(),
                            error: "vehicle unknown".into(),
                            permanent: false,
                        }),
                    },
                    2,
                )
                .await
                .unwrap();
            assert_eq!(dead, if attempt == 2 { 1 } else { 0 });
        }

        assert!(queue.is_empty().await);
        let dead = queue.dead_letters().await;
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 2);
        assert_eq!(dead[0].last_error.as_deref(), Some("vehicle unknown"));

        assert_eq!(queue.requeue_dead_letters().await.unwrap(), 1);
        assert_eq!(queue.len().await, 1);
        assert!(queue.dead_letters().await.is_empty());
    }

    #[tokio::test]
    async fn offline_edits_persist_and_bump_the_revision() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pending_controls.json");
        let queue = PendingQueue::open(path.clone()).unwrap();
        let entry = queue.enqueue(snapshot("V1")).await.unwrap();
        let control_id = entry.control.session.id.clone();

        for item in &entry.control.items {
            queue
                .update_item(
                    &control_id,
                    &item.id,
                    ItemUpdate {
                        is_conforme: Some(true),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(queue.finalize(&control_id).await.unwrap(), ControlStatus::Conforme);
        queue
            .sign(&control_id, SignatureRole::Inspector, Some("https://cdn/sig.png".into()))
            .await
            .unwrap();
        drop(queue);

        let reopened = PendingQueue::open(path).unwrap();
        let stored = reopened.get(&control_id).await.unwrap();
        assert_eq!(stored.revision, entry.control.items.len() as u32 + 2);
        assert_eq!(stored.control.session.status, ControlStatus::Conforme);
        assert!(stored.control.session.inspector_confirmed);
        assert!(stored.control.session.updated_at > entry.control.session.updated_at);
    }

    #[tokio::test]
    async fn rejected_edit_leaves_the_entry_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let queue = PendingQueue::open(dir.path().join("pending_controls.json")).unwrap();
        let entry = queue.enqueue(snapshot("V1")).await.unwrap();
        let control_id = entry.control.session.id.clone();

        let err = queue.finalize(&control_id).await.unwrap_err();
        assert!(matches!(err, HseqError::IncompleteInspection { .. }));
        assert_eq!(queue.get(&control_id).await.unwrap(), entry);

        assert!(matches!(
            queue.finalize("unknown").await,
            Err(HseqError::NotFound { .. })
        ));
    }
}
