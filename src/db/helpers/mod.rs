use std::convert::TryFrom;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};

use crate::db::models::{ControlStatus, NcStatus, NcType};

const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn to_u32(value: i64, field: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| anyhow!("{field} out of range: {value}"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

/// Fixed-width UTC timestamps so lexical order in SQLite matches time order.
pub fn format_datetime(value: &DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn format_optional_datetime(value: Option<&DateTime<Utc>>) -> Option<String> {
    value.map(format_datetime)
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

pub fn parse_optional_datetime(
    value: Option<String>,
    field: &str,
) -> Result<Option<DateTime<Utc>>> {
    match value {
        Some(raw) => parse_datetime(&raw, field).map(Some),
        None => Ok(None),
    }
}

pub fn format_date(value: &NaiveDate) -> String {
    value.format(DATE_FORMAT).to_string()
}

pub fn parse_optional_date(value: Option<String>, field: &str) -> Result<Option<NaiveDate>> {
    match value {
        Some(raw) => NaiveDate::parse_from_str(&raw, DATE_FORMAT)
            .map(Some)
            .with_context(|| format!("failed to parse {field}")),
        None => Ok(None),
    }
}

pub fn encode_photos(photos: &[String]) -> Result<String> {
    serde_json::to_string(photos).context("failed to encode photo list")
}

pub fn decode_photos(raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw).context("failed to decode photo list")
}

pub fn parse_control_status(value: &str) -> Result<ControlStatus> {
    match value {
        "in_progress" => Ok(ControlStatus::InProgress),
        "conforme" => Ok(ControlStatus::Conforme),
        "non_conforme" => Ok(ControlStatus::NonConforme),
        "refuse" => Ok(ControlStatus::Refuse),
        other => Err(anyhow!("unknown control status {other}")),
    }
}

pub fn parse_nc_type(value: &str) -> Result<NcType> {
    match value {
        "critique" => Ok(NcType::Critique),
        "majeure" => Ok(NcType::Majeure),
        "mineure" => Ok(NcType::Mineure),
        other => Err(anyhow!("unknown non-conformity type {other}")),
    }
}

pub fn parse_nc_status(value: &str) -> Result<NcStatus> {
    match value {
        "ouverte" => Ok(NcStatus::Ouverte),
        "en_cours" => Ok(NcStatus::EnCours),
        "fermee" => Ok(NcStatus::Fermee),
        other => Err(anyhow!("unknown non-conformity status {other}")),
    }
}
