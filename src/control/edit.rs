//! Checklist edits applied to an in-memory control, for inspections carried
//! on while offline. Same rules as the stored path: last write wins on
//! items, finalized controls are closed, and the status is always derived.

use chrono::{DateTime, Utc};

use crate::{
    db::models::{ControlItem, ControlStatus, ControlWithItems, ItemUpdate, Signature, SignatureRole},
    error::{HseqError, HseqResult},
};

use super::status::derive_status;

pub(crate) fn validate_photos(photos: Option<&Vec<String>>) -> HseqResult<()> {
    if photos.is_some_and(|urls| urls.iter().any(|url| url.trim().is_empty())) {
        return Err(HseqError::Validation("photo URLs must not be blank".into()));
    }
    Ok(())
}

fn ensure_open(control: &ControlWithItems) -> HseqResult<()> {
    if control.session.status.is_final() {
        return Err(HseqError::SessionClosed(control.session.id.clone()));
    }
    Ok(())
}

pub(crate) fn apply_item_update(
    control: &mut ControlWithItems,
    item_id: &str,
    update: ItemUpdate,
    now: DateTime<Utc>,
) -> HseqResult<ControlItem> {
    ensure_open(control)?;
    validate_photos(update.photos.as_ref())?;

    let item = control
        .items
        .iter_mut()
        .find(|item| item.id == item_id)
        .ok_or_else(|| HseqError::not_found("control item", item_id))?;
    if let Some(is_conforme) = update.is_conforme {
        item.is_conforme = Some(is_conforme);
    }
    if let Some(comment) = update.comment {
        item.comment = Some(comment).filter(|c| !c.trim().is_empty());
    }
    if let Some(photos) = update.photos {
        item.photos = photos;
    }
    let updated = item.clone();
    control.session.updated_at = now;
    Ok(updated)
}

pub(crate) fn finalize_snapshot(
    control: &mut ControlWithItems,
    now: DateTime<Utc>,
) -> HseqResult<ControlStatus> {
    ensure_open(control)?;
    let status = derive_status(&control.session.id, &control.items)?;
    control.session.status = status;
    control.session.finalized_at = Some(now);
    control.session.updated_at = now;
    Ok(status)
}

pub(crate) fn sign_snapshot(
    control: &mut ControlWithItems,
    role: SignatureRole,
    signature_url: Option<String>,
    now: DateTime<Utc>,
) {
    let signature = Some(Signature {
        url: signature_url.filter(|url| !url.trim().is_empty()),
        signed_at: now,
    });
    match role {
        SignatureRole::Inspector => {
            control.session.inspector_signature = signature;
            control.session.inspector_confirmed = true;
        }
        SignatureRole::Driver => {
            control.session.driver_signature = signature;
            control.session.driver_confirmed = true;
        }
    }
    control.session.updated_at = now;
}

pub(crate) fn set_observations(
    control: &mut ControlWithItems,
    observations: Option<String>,
    now: DateTime<Utc>,
) -> HseqResult<()> {
    ensure_open(control)?;
    control.session.observations = observations.filter(|text| !text.trim().is_empty());
    control.session.updated_at = now;
    Ok(())
}
