pub mod catalog;
pub mod config;
pub mod control;
pub mod db;
pub mod eligibility;
pub mod error;
pub mod geo;
pub mod nc;
pub mod offline;
pub mod utils;

use std::{fs, sync::Arc};

use catalog::Catalog;
use config::HseqConfig;
use control::ControlManager;
use db::{
    models::{Location, NewControl},
    Database,
};
use eligibility::EligibilityGate;
use geo::Geolocator;
use nc::NcTracker;
use offline::{PendingControl, PendingQueue, SyncEngine, SyncReport};

pub use error::{HseqError, HseqResult};
pub use utils::init_logging;

const ENABLE_LOGS: bool = true;

/// Everything the inspection screens need, wired from one configuration.
pub struct HseqService {
    config: HseqConfig,
    db: Database,
    controls: ControlManager,
    non_conformites: NcTracker,
    eligibility: EligibilityGate,
    sync: SyncEngine<ControlManager>,
}

impl HseqService {
    pub fn open(config: HseqConfig) -> HseqResult<Self> {
        init_logging();

        for path in [&config.database_path, &config.queue_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|err| {
                    HseqError::Config(format!("failed to create {}: {err}", parent.display()))
                })?;
            }
        }

        let catalog = Arc::new(config.catalog()?);
        let db = Database::new(config.database_path.clone())?;
        let queue = Arc::new(PendingQueue::open(config.queue_path.clone())?);
        Ok(Self::assemble(config, db, catalog, queue))
    }

    fn assemble(
        config: HseqConfig,
        db: Database,
        catalog: Arc<Catalog>,
        queue: Arc<PendingQueue>,
    ) -> Self {
        let store_timeout = config.store_timeout();
        let controls = ControlManager::new(db.clone(), catalog, config.escalation, store_timeout);
        let sync = SyncEngine::new(
            queue,
            controls.clone(),
            store_timeout,
            config.max_sync_attempts,
        );
        log_info!(
            "HSEQ service ready ({} checkpoints, database {})",
            controls.catalog().len(),
            config.database_path.display()
        );

        Self {
            non_conformites: NcTracker::new(db.clone(), store_timeout),
            eligibility: EligibilityGate::new(db.clone(), store_timeout),
            config,
            db,
            controls,
            sync,
        }
    }

    pub fn config(&self) -> &HseqConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn controls(&self) -> &ControlManager {
        &self.controls
    }

    pub fn non_conformites(&self) -> &NcTracker {
        &self.non_conformites
    }

    pub fn eligibility(&self) -> &EligibilityGate {
        &self.eligibility
    }

    /// Controls captured offline. Their checklist, observations, signatures
    /// and finalization are edited here until they sync.
    pub fn pending(&self) -> &PendingQueue {
        self.sync.queue()
    }

    /// Drafts a control and stores it locally until the next sync. Succeeds
    /// without touching the database.
    pub async fn capture_offline(&self, input: NewControl) -> HseqResult<PendingControl> {
        let draft = self.controls.draft_session(input)?;
        let entry = self.sync.queue().enqueue(draft).await?;
        log_info!(
            "Control {} for vehicle {} queued for sync",
            entry.control.session.id,
            entry.control.session.vehicle_id
        );
        Ok(entry)
    }

    pub async fn sync_pending(&self) -> HseqResult<SyncReport> {
        self.sync.sync().await
    }

    pub async fn locate<G: Geolocator>(&self, label: Option<String>, geolocator: &G) -> Option<Location> {
        geo::resolve_location(label, geolocator, self.config.geolocation_timeout()).await
    }
}
