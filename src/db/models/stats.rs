use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Half-open `[from, to)` window on creation timestamps. Open ends are
/// unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HseqStats {
    pub total_controles: u64,
    pub conformes: u64,
    pub non_conformes: u64,
    pub refuses: u64,
    pub en_cours: u64,
    /// Percentage of conforme sessions, 0 when there are none.
    pub taux_conformite: f64,
    pub nc_ouvertes: u64,
    pub nc_en_cours: u64,
    pub nc_fermees: u64,
    pub nc_critiques: u64,
}

impl HseqStats {
    pub fn compliance_rate(conformes: u64, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            conformes as f64 / total as f64 * 100.0
        }
    }
}
