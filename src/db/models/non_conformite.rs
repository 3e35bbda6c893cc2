//! Non-conformity models and their append-only history records.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NcType {
    Critique,
    Majeure,
    Mineure,
}

impl NcType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NcType::Critique => "critique",
            NcType::Majeure => "majeure",
            NcType::Mineure => "mineure",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NcStatus {
    Ouverte,
    EnCours,
    Fermee,
}

impl NcStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NcStatus::Ouverte => "ouverte",
            NcStatus::EnCours => "en_cours",
            NcStatus::Fermee => "fermee",
        }
    }
}

impl Default for NcStatus {
    fn default() -> Self {
        NcStatus::Ouverte
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NonConformite {
    pub id: String,
    /// Human-facing reference, `NC-<year>-<sequence>`.
    pub numero: String,
    pub source_control_id: Option<String>,
    pub source_item_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub driver_id: Option<String>,
    pub nc_type: NcType,
    pub category: Option<String>,
    pub description: String,
    pub responsible_service: Option<String>,
    pub status: NcStatus,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub photos: Vec<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

/// Fields supplied when raising a non-conformity. The numero, status and
/// timestamps are assigned on insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewNonConformite {
    pub source_control_id: Option<String>,
    pub source_item_id: Option<String>,
    pub vehicle_id: Option<String>,
    pub driver_id: Option<String>,
    pub nc_type: NcType,
    pub category: Option<String>,
    pub description: String,
    pub responsible_service: Option<String>,
    pub due_date: Option<NaiveDate>,
    #[serde(default)]
    pub photos: Vec<String>,
    pub created_by: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NcDetailsUpdate {
    pub description: Option<String>,
    pub responsible_service: Option<String>,
    pub due_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NcHistoryEntry {
    pub id: i64,
    pub nc_id: String,
    pub field: String,
    pub previous_value: Option<String>,
    pub new_value: Option<String>,
    pub actor: String,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NcFilter {
    pub vehicle_id: Option<String>,
    pub nc_type: Option<NcType>,
    pub status: Option<NcStatus>,
}
