use std::{fs, path::{Path, PathBuf}, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    catalog::Catalog,
    error::{HseqError, HseqResult},
    nc::EscalationPolicy,
};

pub const ENV_DB_PATH: &str = "HSEQ_DB_PATH";
pub const ENV_QUEUE_PATH: &str = "HSEQ_QUEUE_PATH";
pub const ENV_CATALOG_PATH: &str = "HSEQ_CATALOG_PATH";
pub const ENV_STORE_TIMEOUT_MS: &str = "HSEQ_STORE_TIMEOUT_MS";
pub const ENV_MAX_SYNC_ATTEMPTS: &str = "HSEQ_MAX_SYNC_ATTEMPTS";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct HseqConfig {
    pub database_path: PathBuf,
    pub queue_path: PathBuf,
    /// JSON checklist replacing the built-in one.
    pub catalog_path: Option<PathBuf>,
    pub store_timeout_ms: u64,
    pub geolocation_timeout_ms: u64,
    /// Failed replays before a pending control is dead-lettered; 0 retries
    /// forever.
    pub max_sync_attempts: u32,
    pub escalation: EscalationPolicy,
}

impl Default for HseqConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("fleet_hseq.db"),
            queue_path: PathBuf::from("pending_controls.json"),
            catalog_path: None,
            store_timeout_ms: 5_000,
            geolocation_timeout_ms: 10_000,
            max_sync_attempts: 10,
            escalation: EscalationPolicy::default(),
        }
    }
}

impl HseqConfig {
    /// Reads the optional JSON file, then applies `HSEQ_*` environment
    /// overrides. A missing file means defaults; an unreadable one is an error.
    pub fn load(path: Option<&Path>) -> HseqResult<Self> {
        let mut config = match path {
            Some(path) if path.exists() => {
                let contents = fs::read_to_string(path).map_err(|err| {
                    HseqError::Config(format!("failed to read {}: {err}", path.display()))
                })?;
                serde_json::from_str(&contents).map_err(|err| {
                    HseqError::Config(format!("failed to parse {}: {err}", path.display()))
                })?
            }
            _ => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> HseqResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DB_PATH) {
            self.database_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_QUEUE_PATH) {
            self.queue_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_CATALOG_PATH) {
            self.catalog_path = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup(ENV_STORE_TIMEOUT_MS) {
            self.store_timeout_ms = parse_number(ENV_STORE_TIMEOUT_MS, &value)?;
        }
        if let Some(value) = lookup(ENV_MAX_SYNC_ATTEMPTS) {
            self.max_sync_attempts = parse_number(ENV_MAX_SYNC_ATTEMPTS, &value)?;
        }
        Ok(())
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn geolocation_timeout(&self) -> Duration {
        Duration::from_millis(self.geolocation_timeout_ms)
    }

    pub fn catalog(&self) -> HseqResult<Catalog> {
        match &self.catalog_path {
            Some(path) => Catalog::from_json_file(path),
            None => Ok(Catalog::builtin()),
        }
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> HseqResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HseqError::Config(format!("{key} must be a non-negative integer, got {value:?}")))
}
