use std::{future::Future, time::Duration};

use anyhow::Result;

use crate::{db::models::Location, log_debug};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One-shot position read from the device.
pub trait Geolocator: Send + Sync {
    fn current_position(&self) -> impl Future<Output = Result<Coordinates>> + Send;
}

/// Combines the typed place name with a device fix when one is available in
/// time. A missing fix never blocks the inspection.
pub async fn resolve_location<G: Geolocator>(
    label: Option<String>,
    geolocator: &G,
    limit: Duration,
) -> Option<Location> {
    let label = label.filter(|text| !text.trim().is_empty());
    let fix = match tokio::time::timeout(limit, geolocator.current_position()).await {
        Ok(Ok(coords)) => Some(coords),
        Ok(Err(err)) => {
            log_debug!("Geolocation unavailable: {}", err);
            None
        }
        Err(_) => {
            log_debug!("Geolocation timed out after {:?}", limit);
            None
        }
    };

    if label.is_none() && fix.is_none() {
        return None;
    }
    Some(Location {
        label,
        latitude: fix.map(|c| c.latitude),
        longitude: fix.map(|c| c.longitude),
    })
}
