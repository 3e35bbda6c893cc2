use std::collections::HashSet;

use chrono::{DateTime, SubsecRound, Utc};
use uuid::Uuid;

use crate::{
    catalog::Catalog,
    db::models::{ControlItem, ControlSession, ControlStatus, ControlWithItems, NewControl},
    error::{HseqError, HseqResult},
};

use super::status::derive_status;

fn require(value: &str, field: &str) -> HseqResult<()> {
    if value.trim().is_empty() {
        return Err(HseqError::Validation(format!("{field} is required")));
    }
    Ok(())
}

pub(crate) fn validate_new_control(input: &NewControl) -> HseqResult<()> {
    require(&input.vehicle_id, "vehicleId")?;
    require(&input.driver_id, "driverId")?;
    require(&input.inspector_id, "inspectorId")?;
    Ok(())
}

/// Builds an in-progress control with one unevaluated item per catalog
/// checkpoint, in catalog order. Nothing is persisted.
pub fn draft_control(
    catalog: &Catalog,
    input: NewControl,
    now: DateTime<Utc>,
) -> HseqResult<ControlWithItems> {
    validate_new_control(&input)?;
    // Stored timestamps carry microseconds.
    let now = now.trunc_subsecs(6);

    let control_id = Uuid::new_v4().to_string();
    let items = catalog
        .checkpoints()
        .enumerate()
        .map(|(position, entry)| ControlItem {
            id: Uuid::new_v4().to_string(),
            control_id: control_id.clone(),
            category: entry.category.code.clone(),
            checkpoint_code: entry.checkpoint.code.clone(),
            label: entry.checkpoint.label.clone(),
            is_critical: entry.checkpoint.is_critical,
            is_conforme: None,
            comment: None,
            photos: Vec::new(),
            position: position as u32,
        })
        .collect();

    let session = ControlSession {
        id: control_id,
        vehicle_id: input.vehicle_id,
        driver_id: input.driver_id,
        inspector_id: input.inspector_id,
        location: input.location,
        status: ControlStatus::InProgress,
        inspector_signature: None,
        driver_signature: None,
        inspector_confirmed: false,
        driver_confirmed: false,
        observations: input.observations,
        created_at: now,
        updated_at: now,
        finalized_at: None,
    };

    Ok(ControlWithItems { session, items })
}

/// Checks on a snapshot captured offline before it is replayed. A final
/// status must be the one its checklist derives.
pub(crate) fn validate_snapshot(snapshot: &ControlWithItems) -> HseqResult<()> {
    let session = &snapshot.session;
    require(&session.id, "id")?;
    require(&session.vehicle_id, "vehicleId")?;
    require(&session.driver_id, "driverId")?;
    require(&session.inspector_id, "inspectorId")?;

    if snapshot.items.is_empty() {
        return Err(HseqError::Validation(format!(
            "control {} has no checklist items",
            session.id
        )));
    }

    let mut codes = HashSet::new();
    for item in &snapshot.items {
        if item.control_id != session.id {
            return Err(HseqError::Validation(format!(
                "item {} belongs to control {}, not {}",
                item.id, item.control_id, session.id
            )));
        }
        if !codes.insert(item.checkpoint_code.as_str()) {
            return Err(HseqError::Validation(format!(
                "duplicate checkpoint {} in control {}",
                item.checkpoint_code, session.id
            )));
        }
    }

    match (session.status, session.finalized_at) {
        (ControlStatus::InProgress, None) => Ok(()),
        (ControlStatus::InProgress, Some(_)) => Err(HseqError::Validation(format!(
            "control {} is in progress but carries a finalization time",
            session.id
        ))),
        (_, None) => Err(HseqError::Validation(format!(
            "control {} is marked {} without a finalization time",
            session.id,
            session.status.as_str()
        ))),
        (claimed, Some(_)) => {
            let derived = derive_status(&session.id, &snapshot.items).map_err(|err| {
                HseqError::Validation(format!(
                    "control {} is marked {}: {err}",
                    session.id,
                    claimed.as_str()
                ))
            })?;
            if derived != claimed {
                return Err(HseqError::Validation(format!(
                    "control {} is marked {} but its checklist gives {}",
                    session.id,
                    claimed.as_str(),
                    derived.as_str()
                )));
            }
            Ok(())
        }
    }
}
