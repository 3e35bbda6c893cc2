use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::Serialize;

use crate::{
    catalog::Catalog,
    db::{
        models::{
            ControlItem, ControlSession, ControlStatus, ControlWithItems, ImportOutcome, ItemUpdate,
            NewControl, NonConformite, SignatureRole,
        },
        Database,
    },
    error::HseqResult,
    log_info, log_warn,
    nc::EscalationPolicy,
    utils::with_timeout,
};

use super::{
    draft::{draft_control, validate_snapshot},
    edit::validate_photos,
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeOutcome {
    pub status: ControlStatus,
    /// Non-conformities raised automatically from failed items.
    pub non_conformites: Vec<NonConformite>,
}

/// Creates Safe-to-Load controls from the injected catalog, records item
/// outcomes and signatures, and finalizes them.
#[derive(Clone)]
pub struct ControlManager {
    db: Database,
    catalog: Arc<Catalog>,
    policy: EscalationPolicy,
    store_timeout: Duration,
}

impl ControlManager {
    pub fn new(
        db: Database,
        catalog: Arc<Catalog>,
        policy: EscalationPolicy,
        store_timeout: Duration,
    ) -> Self {
        Self {
            db,
            catalog,
            policy,
            store_timeout,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// In-memory control for offline capture; see `HseqService::capture_offline`.
    pub fn draft_session(&self, input: NewControl) -> HseqResult<ControlWithItems> {
        draft_control(&self.catalog, input, Utc::now())
    }

    /// Drafts and stores a new control.
    ///
    /// A `Timeout` does not mean nothing was written: the insert may still
    /// commit on the database thread, and calling this again creates a second
    /// control. Callers that retry should draft once with `draft_session` and
    /// replay that snapshot through `import_session`, which is idempotent.
    pub async fn create_session(&self, input: NewControl) -> HseqResult<ControlWithItems> {
        let control = self.draft_session(input)?;
        match with_timeout(
            "create control",
            self.store_timeout,
            self.db.insert_control(&control),
        )
        .await
        {
            Ok(()) => {
                log_info!(
                    "Control {} created for vehicle {} with {} checkpoints",
                    control.session.id,
                    control.session.vehicle_id,
                    control.items.len()
                );
                Ok(control)
            }
            Err(err) => {
                log_warn!("Control creation for vehicle {} failed: {}", control.session.vehicle_id, err);
                Err(err)
            }
        }
    }

    /// Persists a complete snapshot. A final status is accepted only when the
    /// checklist derives it, and it escalates failed items like `finalize`.
    pub async fn import_session(&self, snapshot: &ControlWithItems) -> HseqResult<ImportOutcome> {
        validate_snapshot(snapshot)?;
        let (outcome, raised) = with_timeout(
            "import control",
            self.store_timeout,
            self.db.import_control(snapshot, self.policy),
        )
        .await?;
        match outcome {
            ImportOutcome::AlreadyStored => {
                log_info!("Control {} already stored, skipping", snapshot.session.id)
            }
            _ => log_info!(
                "Control {} imported as {} ({} non-conformities raised)",
                snapshot.session.id,
                snapshot.session.status.as_str(),
                raised.len()
            ),
        }
        Ok(outcome)
    }

    pub async fn get_session(&self, control_id: &str) -> HseqResult<ControlWithItems> {
        with_timeout("load control", self.store_timeout, self.db.get_control(control_id)).await
    }

    pub async fn list_sessions_for_vehicle(
        &self,
        vehicle_id: &str,
    ) -> HseqResult<Vec<ControlSession>> {
        with_timeout(
            "list controls",
            self.store_timeout,
            self.db.list_controls_for_vehicle(vehicle_id),
        )
        .await
    }

    /// Last write wins; items may be evaluated in any order until finalize.
    pub async fn update_item(&self, item_id: &str, update: ItemUpdate) -> HseqResult<ControlItem> {
        validate_photos(update.photos.as_ref())?;
        with_timeout(
            "update checklist item",
            self.store_timeout,
            self.db.update_control_item(item_id, update),
        )
        .await
    }

    pub async fn finalize(&self, control_id: &str, actor: &str) -> HseqResult<FinalizeOutcome> {
        let (status, non_conformites) = with_timeout(
            "finalize control",
            self.store_timeout,
            self.db.finalize_control(control_id, actor, self.policy),
        )
        .await?;

        log_info!(
            "Control {} finalized as {} ({} non-conformities raised)",
            control_id,
            status.as_str(),
            non_conformites.len()
        );

        Ok(FinalizeOutcome {
            status,
            non_conformites,
        })
    }

    /// Signatures attest the control; they do not gate finalization.
    pub async fn sign(
        &self,
        control_id: &str,
        role: SignatureRole,
        signature_url: Option<String>,
    ) -> HseqResult<ControlSession> {
        let signature_url = signature_url.filter(|url| !url.trim().is_empty());
        with_timeout(
            "sign control",
            self.store_timeout,
            self.db.sign_control(control_id, role, signature_url),
        )
        .await
    }

    pub async fn update_observations(
        &self,
        control_id: &str,
        observations: Option<String>,
    ) -> HseqResult<ControlSession> {
        let observations = observations.filter(|text| !text.trim().is_empty());
        with_timeout(
            "update observations",
            self.store_timeout,
            self.db.update_control_observations(control_id, observations),
        )
        .await
    }
}
