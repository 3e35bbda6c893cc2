//! Safe-to-Load control session and checklist item models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlStatus {
    InProgress,
    Conforme,
    NonConforme,
    Refuse,
}

impl ControlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlStatus::InProgress => "in_progress",
            ControlStatus::Conforme => "conforme",
            ControlStatus::NonConforme => "non_conforme",
            ControlStatus::Refuse => "refuse",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, ControlStatus::InProgress)
    }
}

impl Default for ControlStatus {
    fn default() -> Self {
        ControlStatus::InProgress
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    pub label: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Signature {
    pub url: Option<String>,
    pub signed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureRole {
    Inspector,
    Driver,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlSession {
    pub id: String,
    pub vehicle_id: String,
    pub driver_id: String,
    pub inspector_id: String,
    pub location: Option<Location>,
    pub status: ControlStatus,
    pub inspector_signature: Option<Signature>,
    pub driver_signature: Option<Signature>,
    pub inspector_confirmed: bool,
    pub driver_confirmed: bool,
    pub observations: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlItem {
    pub id: String,
    pub control_id: String,
    pub category: String,
    pub checkpoint_code: String,
    pub label: String,
    pub is_critical: bool,
    /// `None` until the inspector evaluates the checkpoint.
    pub is_conforme: Option<bool>,
    pub comment: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
    pub position: u32,
}

impl ControlItem {
    pub fn is_failed(&self) -> bool {
        self.is_conforme == Some(false)
    }
}

/// A session with its full checklist, the unit written and read atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ControlWithItems {
    pub session: ControlSession,
    pub items: Vec<ControlItem>,
}

impl ControlWithItems {
    /// Finalized and attested by both parties. Printed compliance reports
    /// treat anything else as incomplete.
    pub fn is_compliance_complete(&self) -> bool {
        self.session.status.is_final()
            && self.session.inspector_confirmed
            && self.session.driver_confirmed
    }
}

/// What an import did with a snapshot.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ImportOutcome {
    Inserted,
    /// A newer revision of a stored in-progress control replaced its
    /// checklist outcomes.
    Updated,
    /// Already stored at this revision or finalized; nothing written.
    AlreadyStored,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewControl {
    pub vehicle_id: String,
    pub driver_id: String,
    pub inspector_id: String,
    pub location: Option<Location>,
    pub observations: Option<String>,
}

/// Partial item update; `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemUpdate {
    pub is_conforme: Option<bool>,
    pub comment: Option<String>,
    pub photos: Option<Vec<String>>,
}
