use std::time::Duration;

use crate::{
    db::{
        models::{
            DateRange, HseqStats, NcDetailsUpdate, NcFilter, NcHistoryEntry, NcStatus, NcType,
            NewNonConformite, NonConformite,
        },
        Database,
    },
    error::{HseqError, HseqResult},
    log_info, log_warn,
    utils::with_timeout,
};

use super::auto_create_from_item;

const ENABLE_LOGS: bool = true;

#[derive(Clone)]
pub struct NcTracker {
    db: Database,
    store_timeout: Duration,
}

impl NcTracker {
    pub fn new(db: Database, store_timeout: Duration) -> Self {
        Self { db, store_timeout }
    }

    /// Manual path. Severity is whatever the caller reports.
    pub async fn create(&self, new_nc: NewNonConformite) -> HseqResult<NonConformite> {
        if new_nc.description.trim().is_empty() {
            return Err(HseqError::Validation("description is required".into()));
        }
        if new_nc.created_by.trim().is_empty() {
            return Err(HseqError::Validation("createdBy is required".into()));
        }

        let created = with_timeout(
            "create non-conformity",
            self.store_timeout,
            self.db.create_non_conformite(&new_nc),
        )
        .await?;
        log_info!(
            "Non-conformity {} ({}) raised by {}",
            created.numero,
            created.nc_type.as_str(),
            created.created_by
        );
        Ok(created)
    }

    /// Raises a non-conformity from a failed item of a stored control.
    pub async fn escalate_item(
        &self,
        item_id: &str,
        severity: NcType,
        actor: &str,
    ) -> HseqResult<NonConformite> {
        let (item, session) = with_timeout(
            "load checklist item",
            self.store_timeout,
            self.db.get_control_item(item_id),
        )
        .await?;
        if !item.is_failed() {
            return Err(HseqError::Validation(format!(
                "checkpoint {} is not marked non conforme",
                item.checkpoint_code
            )));
        }
        self.create(auto_create_from_item(&item, &session, severity, actor))
            .await
    }

    pub async fn update_status(
        &self,
        nc_id: &str,
        new_status: NcStatus,
        actor: &str,
    ) -> HseqResult<NonConformite> {
        if actor.trim().is_empty() {
            return Err(HseqError::Validation("actor is required".into()));
        }

        let result = with_timeout(
            "update non-conformity status",
            self.store_timeout,
            self.db.update_non_conformite_status(nc_id, new_status, actor),
        )
        .await;

        match &result {
            Ok(nc) => log_info!(
                "Non-conformity {} moved to {} by {}",
                nc.numero,
                nc.status.as_str(),
                actor
            ),
            Err(err @ HseqError::AuditWriteFailure { .. }) => {
                log_warn!("Status change rolled back: {}", err)
            }
            Err(_) => {}
        }
        result
    }

    pub async fn update_details(
        &self,
        nc_id: &str,
        update: NcDetailsUpdate,
        actor: &str,
    ) -> HseqResult<NonConformite> {
        if actor.trim().is_empty() {
            return Err(HseqError::Validation("actor is required".into()));
        }
        with_timeout(
            "update non-conformity",
            self.store_timeout,
            self.db.update_non_conformite_details(nc_id, update, actor),
        )
        .await
    }

    pub async fn get(&self, nc_id: &str) -> HseqResult<NonConformite> {
        with_timeout(
            "load non-conformity",
            self.store_timeout,
            self.db.get_non_conformite(nc_id),
        )
        .await
    }

    pub async fn history(&self, nc_id: &str) -> HseqResult<Vec<NcHistoryEntry>> {
        with_timeout(
            "load non-conformity history",
            self.store_timeout,
            self.db.non_conformite_history(nc_id),
        )
        .await
    }

    pub async fn list_by_filters(&self, filter: NcFilter) -> HseqResult<Vec<NonConformite>> {
        with_timeout(
            "list non-conformities",
            self.store_timeout,
            self.db.list_non_conformites(filter),
        )
        .await
    }

    pub async fn compute_stats(&self, range: Option<DateRange>) -> HseqResult<HseqStats> {
        with_timeout(
            "compute stats",
            self.store_timeout,
            self.db.compute_stats(range.unwrap_or_default()),
        )
        .await
    }
}
