use serde::{Deserialize, Serialize};

use crate::db::models::{ControlItem, ControlSession, NcType, NewNonConformite};

/// Which failed items raise a non-conformity when a control is finalized.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct EscalationPolicy {
    /// Failed critical items raise a `critique` non-conformity.
    pub critical: bool,
    /// Severity for failed non-critical items; `None` leaves them to manual
    /// escalation.
    pub non_critical: Option<NcType>,
}

impl Default for EscalationPolicy {
    fn default() -> Self {
        Self {
            critical: true,
            non_critical: None,
        }
    }
}

impl EscalationPolicy {
    pub fn severity_for(&self, item: &ControlItem) -> Option<NcType> {
        if item.is_critical {
            self.critical.then_some(NcType::Critique)
        } else {
            self.non_critical
        }
    }
}

/// Non-conformity for a failed checklist item. Critical items are always
/// `critique`; `severity` applies to the others.
pub fn auto_create_from_item(
    item: &ControlItem,
    session: &ControlSession,
    severity: NcType,
    created_by: &str,
) -> NewNonConformite {
    let nc_type = if item.is_critical {
        NcType::Critique
    } else {
        severity
    };

    let mut description = format!("Point de contrôle « {} » non conforme", item.label);
    if let Some(comment) = item.comment.as_deref().filter(|c| !c.trim().is_empty()) {
        description.push_str(" : ");
        description.push_str(comment.trim());
    }

    NewNonConformite {
        source_control_id: Some(session.id.clone()),
        source_item_id: Some(item.id.clone()),
        vehicle_id: Some(session.vehicle_id.clone()),
        driver_id: Some(session.driver_id.clone()),
        nc_type,
        category: Some(item.category.clone()),
        description,
        responsible_service: None,
        due_date: None,
        photos: item.photos.clone(),
        created_by: created_by.to_string(),
    }
}
