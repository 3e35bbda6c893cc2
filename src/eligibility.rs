//! Mission eligibility from the latest finalized Safe-to-Load control.
//!
//! Fail-closed: no control, an unfinished one, a failed one, or any error
//! reading the store all mean "not eligible".

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    db::{models::ControlStatus, Database},
    log_warn,
    utils::with_timeout,
};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Eligibility {
    pub vehicle_id: String,
    pub eligible: bool,
    pub latest_status: Option<ControlStatus>,
    pub latest_control_id: Option<String>,
    pub checked_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct EligibilityGate {
    db: Database,
    store_timeout: Duration,
}

impl EligibilityGate {
    pub fn new(db: Database, store_timeout: Duration) -> Self {
        Self { db, store_timeout }
    }

    pub async fn is_eligible(&self, vehicle_id: &str) -> bool {
        self.eligibility(vehicle_id).await.eligible
    }

    pub async fn eligibility(&self, vehicle_id: &str) -> Eligibility {
        let checked_at = Utc::now();
        let latest = with_timeout(
            "eligibility check",
            self.store_timeout,
            self.db.latest_finalized_control(vehicle_id),
        )
        .await;

        match latest {
            Ok(Some(control)) => Eligibility {
                vehicle_id: vehicle_id.to_string(),
                eligible: control.status == ControlStatus::Conforme,
                latest_status: Some(control.status),
                latest_control_id: Some(control.id),
                checked_at,
            },
            Ok(None) => Eligibility {
                vehicle_id: vehicle_id.to_string(),
                eligible: false,
                latest_status: None,
                latest_control_id: None,
                checked_at,
            },
            Err(err) => {
                log_warn!(
                    "Eligibility check for vehicle {} failed, treating as not eligible: {}",
                    vehicle_id,
                    err
                );
                Eligibility {
                    vehicle_id: vehicle_id.to_string(),
                    eligible: false,
                    latest_status: None,
                    latest_control_id: None,
                    checked_at,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        catalog::{Catalog, Category, Checkpoint},
        control::ControlManager,
        db::models::{ControlWithItems, ItemUpdate, NcType, NewControl},
        nc::{EscalationPolicy, NcTracker},
    };

    fn catalog() -> Catalog {
        Catalog::new(vec![Category {
            code: "securite".into(),
            label: "Sécurité".into(),
            checkpoints: vec![
                Checkpoint {
                    code: "extincteur".into(),
                    label: "Extincteur".into(),
                    is_critical: true,
                },
                Checkpoint {
                    code: "triangle".into(),
                    label: "Triangle".into(),
                    is_critical: false,
                },
                Checkpoint {
                    code: "trousse".into(),
                    label: "Trousse de secours".into(),
                    is_critical: false,
                },
            ],
        }])
        .unwrap()
    }

    fn setup() -> (ControlManager, EligibilityGate, NcTracker) {
        let db = Database::in_memory().unwrap();
        let timeout = Duration::from_secs(5);
        (
            ControlManager::new(
                db.clone(),
                Arc::new(catalog()),
                EscalationPolicy::default(),
                timeout,
            ),
            EligibilityGate::new(db.clone(), timeout),
            NcTracker::new(db, timeout),
        )
    }

    async fn inspect(manager: &ControlManager, vehicle: &str, failing: &[&str]) -> ControlWithItems {
        let control = manager
            .create_session(NewControl {
                vehicle_id: vehicle.into(),
                driver_id: "D1".into(),
                inspector_id: "I1".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        for item in &control.items {
            manager
                .update_item(
                    &item.id,
                    ItemUpdate {
                        is_conforme: Some(!failing.contains(&item.checkpoint_code.as_str())),
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
        }
        control
    }

    #[tokio::test]
    async fn vehicle_without_controls_is_not_eligible() {
        let (_, gate, _) = setup();
        assert!(!gate.is_eligible("V0").await);
        let detail = gate.eligibility("V0").await;
        assert_eq!(detail.latest_status, None);
    }

    #[tokio::test]
    async fn only_latest_conforme_control_clears_the_vehicle() {
        let (manager, gate, _) = setup();

        let first = inspect(&manager, "V1", &[]).await;
        assert!(!gate.is_eligible("V1").await, "in-progress control does not count");
        manager.finalize(&first.session.id, "I1").await.unwrap();
        assert!(gate.is_eligible("V1").await);

        let second = inspect(&manager, "V1", &["triangle"]).await;
        manager.finalize(&second.session.id, "I1").await.unwrap();
        let detail = gate.eligibility("V1").await;
        assert!(!detail.eligible);
        assert_eq!(detail.latest_status, Some(ControlStatus::NonConforme));
        assert_eq!(detail.latest_control_id.as_deref(), Some(second.session.id.as_str()));

        let third = inspect(&manager, "V1", &[]).await;
        manager.finalize(&third.session.id, "I1").await.unwrap();
        assert!(gate.is_eligible("V1").await);
    }

    #[tokio::test]
    async fn refused_vehicle_is_blocked_with_critical_non_conformity() {
        let (manager, gate, tracker) = setup();

        let control = inspect(&manager, "V1", &["extincteur"]).await;
        let outcome = manager.finalize(&control.session.id, "I1").await.unwrap();
        assert_eq!(outcome.status, ControlStatus::Refuse);
        assert_eq!(outcome.non_conformites.len(), 1);
        assert_eq!(outcome.non_conformites[0].nc_type, NcType::Critique);
        assert_eq!(
            outcome.non_conformites[0].source_control_id.as_deref(),
            Some(control.session.id.as_str())
        );

        let stats = tracker.compute_stats(None).await.unwrap();
        assert_eq!(stats.nc_critiques, 1);
        assert!(!gate.is_eligible("V1").await);
    }

    #[tokio::test]
    async fn store_failure_fails_closed() {
        let (manager, gate, _) = setup();
        let control = inspect(&manager, "V1", &[]).await;
        manager.finalize(&control.session.id, "I1").await.unwrap();
        assert!(gate.is_eligible("V1").await);

        gate.db
            .execute(|conn| {
                conn.execute_batch("ALTER TABLE controls RENAME TO controls_archived")?;
                Ok(())
            })
            .await
            .unwrap();
        assert!(!gate.is_eligible("V1").await);
    }
}
