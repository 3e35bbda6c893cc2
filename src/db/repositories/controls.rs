use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::{
    control::derive_status,
    db::{
        helpers::{
            decode_photos, encode_photos, format_datetime, format_optional_datetime,
            parse_control_status, parse_datetime, parse_optional_datetime, to_u32,
        },
        models::{
            ControlItem, ControlSession, ControlStatus, ControlWithItems, ImportOutcome, ItemUpdate,
            Location, NonConformite, Signature, SignatureRole,
        },
        repositories::non_conformites::insert_nc,
        Database,
    },
    error::HseqError,
    nc::{auto_create_from_item, EscalationPolicy},
};

const SESSION_COLUMNS: &str = "id, vehicle_id, driver_id, inspector_id, location_label, latitude, longitude, status,
     inspector_signature_url, inspector_signed_at, driver_signature_url, driver_signed_at,
     inspector_confirmed, driver_confirmed, observations, created_at, updated_at, finalized_at";

const ITEM_COLUMNS: &str =
    "id, control_id, category, checkpoint_code, label, is_critical, is_conforme, comment, photos, position";

fn row_to_session(row: &Row) -> Result<ControlSession> {
    let location_label: Option<String> = row.get("location_label")?;
    let latitude: Option<f64> = row.get("latitude")?;
    let longitude: Option<f64> = row.get("longitude")?;
    let location = if location_label.is_none() && latitude.is_none() && longitude.is_none() {
        None
    } else {
        Some(Location {
            label: location_label,
            latitude,
            longitude,
        })
    };

    let signature = |url_col: &str, at_col: &str| -> Result<Option<Signature>> {
        let url: Option<String> = row.get(url_col)?;
        let signed_at = parse_optional_datetime(row.get(at_col)?, at_col)?;
        Ok(signed_at.map(|signed_at| Signature { url, signed_at }))
    };

    let status: String = row.get("status")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(ControlSession {
        id: row.get("id")?,
        vehicle_id: row.get("vehicle_id")?,
        driver_id: row.get("driver_id")?,
        inspector_id: row.get("inspector_id")?,
        location,
        status: parse_control_status(&status)?,
        inspector_signature: signature("inspector_signature_url", "inspector_signed_at")?,
        driver_signature: signature("driver_signature_url", "driver_signed_at")?,
        inspector_confirmed: row.get("inspector_confirmed")?,
        driver_confirmed: row.get("driver_confirmed")?,
        observations: row.get("observations")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        finalized_at: parse_optional_datetime(row.get("finalized_at")?, "finalized_at")?,
    })
}

fn row_to_item(row: &Row) -> Result<ControlItem> {
    let photos: String = row.get("photos")?;
    let position: i64 = row.get("position")?;

    Ok(ControlItem {
        id: row.get("id")?,
        control_id: row.get("control_id")?,
        category: row.get("category")?,
        checkpoint_code: row.get("checkpoint_code")?,
        label: row.get("label")?,
        is_critical: row.get("is_critical")?,
        is_conforme: row.get("is_conforme")?,
        comment: row.get("comment")?,
        photos: decode_photos(&photos)?,
        position: to_u32(position, "position")?,
    })
}

fn find_session(conn: &Connection, control_id: &str) -> Result<Option<ControlSession>> {
    let sql = format!("SELECT {SESSION_COLUMNS} FROM controls WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![control_id])?;
    match rows.next()? {
        Some(row) => row_to_session(row).map(Some),
        None => Ok(None),
    }
}

fn load_session(conn: &Connection, control_id: &str) -> Result<ControlSession> {
    find_session(conn, control_id)?
        .ok_or_else(|| HseqError::not_found("control", control_id).into())
}

fn load_items(conn: &Connection, control_id: &str) -> Result<Vec<ControlItem>> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM control_items WHERE control_id = ?1 ORDER BY position ASC");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![control_id])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(row_to_item(row)?);
    }
    Ok(items)
}

fn load_item(conn: &Connection, item_id: &str) -> Result<ControlItem> {
    let sql = format!("SELECT {ITEM_COLUMNS} FROM control_items WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![item_id])?;
    match rows.next()? {
        Some(row) => row_to_item(row),
        None => Err(HseqError::not_found("control item", item_id).into()),
    }
}

fn insert_session_row(conn: &Connection, session: &ControlSession) -> Result<()> {
    let location = session.location.clone().unwrap_or_default();
    let (inspector_url, inspector_at) = signature_columns(session.inspector_signature.as_ref());
    let (driver_url, driver_at) = signature_columns(session.driver_signature.as_ref());

    conn.execute(
        "INSERT INTO controls (id, vehicle_id, driver_id, inspector_id, location_label, latitude, longitude, status,
             inspector_signature_url, inspector_signed_at, driver_signature_url, driver_signed_at,
             inspector_confirmed, driver_confirmed, observations, created_at, updated_at, finalized_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            session.id,
            session.vehicle_id,
            session.driver_id,
            session.inspector_id,
            location.label,
            location.latitude,
            location.longitude,
            session.status.as_str(),
            inspector_url,
            inspector_at,
            driver_url,
            driver_at,
            session.inspector_confirmed,
            session.driver_confirmed,
            session.observations,
            format_datetime(&session.created_at),
            format_datetime(&session.updated_at),
            format_optional_datetime(session.finalized_at.as_ref()),
        ],
    )
    .with_context(|| format!("failed to insert control {}", session.id))?;
    Ok(())
}

fn signature_columns(signature: Option<&Signature>) -> (Option<String>, Option<String>) {
    match signature {
        Some(sig) => (sig.url.clone(), Some(format_datetime(&sig.signed_at))),
        None => (None, None),
    }
}

fn insert_item_rows(conn: &Connection, items: &[ControlItem]) -> Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO control_items (id, control_id, category, checkpoint_code, label, is_critical, is_conforme, comment, photos, position)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
    )?;
    for item in items {
        stmt.execute(params![
            item.id,
            item.control_id,
            item.category,
            item.checkpoint_code,
            item.label,
            item.is_critical,
            item.is_conforme,
            item.comment,
            encode_photos(&item.photos)?,
            item.position,
        ])
        .with_context(|| format!("failed to insert checklist item {}", item.checkpoint_code))?;
    }
    Ok(())
}

// Session row and checklist commit together or not at all.
fn write_control(conn: &mut Connection, control: &ControlWithItems) -> Result<()> {
    let tx = conn.transaction()?;
    insert_session_row(&tx, &control.session)?;
    if let Err(err) = insert_item_rows(&tx, &control.items) {
        // Dropping `tx` rolls the session row back.
        return Err(HseqError::PartialCreationFailure {
            control_id: control.session.id.clone(),
            reason: format!("{err:#}"),
        }
        .into());
    }
    tx.commit()?;
    Ok(())
}

fn update_session_row(conn: &Connection, session: &ControlSession) -> Result<()> {
    let location = session.location.clone().unwrap_or_default();
    let (inspector_url, inspector_at) = signature_columns(session.inspector_signature.as_ref());
    let (driver_url, driver_at) = signature_columns(session.driver_signature.as_ref());

    conn.execute(
        "UPDATE controls
         SET location_label = ?1, latitude = ?2, longitude = ?3, status = ?4,
             inspector_signature_url = ?5, inspector_signed_at = ?6,
             driver_signature_url = ?7, driver_signed_at = ?8,
             inspector_confirmed = ?9, driver_confirmed = ?10,
             observations = ?11, updated_at = ?12, finalized_at = ?13
         WHERE id = ?14",
        params![
            location.label,
            location.latitude,
            location.longitude,
            session.status.as_str(),
            inspector_url,
            inspector_at,
            driver_url,
            driver_at,
            session.inspector_confirmed,
            session.driver_confirmed,
            session.observations,
            format_datetime(&session.updated_at),
            format_optional_datetime(session.finalized_at.as_ref()),
            session.id,
        ],
    )
    .with_context(|| format!("failed to update control {}", session.id))?;
    Ok(())
}

fn signatures_differ(stored: &ControlSession, incoming: &ControlSession) -> bool {
    stored.inspector_signature != incoming.inspector_signature
        || stored.driver_signature != incoming.driver_signature
        || stored.inspector_confirmed != incoming.inspector_confirmed
        || stored.driver_confirmed != incoming.driver_confirmed
}

fn update_signature_columns(conn: &Connection, session: &ControlSession) -> Result<()> {
    let (inspector_url, inspector_at) = signature_columns(session.inspector_signature.as_ref());
    let (driver_url, driver_at) = signature_columns(session.driver_signature.as_ref());
    conn.execute(
        "UPDATE controls
         SET inspector_signature_url = ?1, inspector_signed_at = ?2,
             driver_signature_url = ?3, driver_signed_at = ?4,
             inspector_confirmed = ?5, driver_confirmed = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            inspector_url,
            inspector_at,
            driver_url,
            driver_at,
            session.inspector_confirmed,
            session.driver_confirmed,
            format_datetime(&session.updated_at),
            session.id,
        ],
    )?;
    Ok(())
}

// Items keep their ids across revisions; only outcomes change.
fn update_item_outcomes(conn: &Connection, items: &[ControlItem]) -> Result<()> {
    let mut stmt = conn.prepare(
        "UPDATE control_items
         SET is_conforme = ?1, comment = ?2, photos = ?3
         WHERE id = ?4 AND control_id = ?5",
    )?;
    for item in items {
        let rows_affected = stmt.execute(params![
            item.is_conforme,
            item.comment,
            encode_photos(&item.photos)?,
            item.id,
            item.control_id,
        ])?;
        if rows_affected == 0 {
            return Err(HseqError::Validation(format!(
                "item {} is not part of stored control {}",
                item.id, item.control_id
            ))
            .into());
        }
    }
    Ok(())
}

/// Raises the non-conformities the policy asks for on a finalized checklist.
fn escalate_failed_items(
    conn: &Connection,
    session: &ControlSession,
    items: &[ControlItem],
    policy: EscalationPolicy,
    actor: &str,
    now: &DateTime<Utc>,
) -> Result<Vec<NonConformite>> {
    let mut raised = Vec::new();
    for item in items.iter().filter(|item| item.is_failed()) {
        if let Some(severity) = policy.severity_for(item) {
            let new_nc = auto_create_from_item(item, session, severity, actor);
            raised.push(insert_nc(conn, &new_nc, now)?);
        }
    }
    Ok(raised)
}

fn import_snapshot(
    conn: &mut Connection,
    control: &ControlWithItems,
    policy: EscalationPolicy,
) -> Result<(ImportOutcome, Vec<NonConformite>)> {
    let session = &control.session;
    let tx = conn.transaction()?;

    let stored = find_session(&tx, &session.id)?;
    let outcome = match stored {
        None => {
            insert_session_row(&tx, session)?;
            if let Err(err) = insert_item_rows(&tx, &control.items) {
                return Err(HseqError::PartialCreationFailure {
                    control_id: session.id.clone(),
                    reason: format!("{err:#}"),
                }
                .into());
            }
            ImportOutcome::Inserted
        }
        Some(stored) if session.updated_at <= stored.updated_at => {
            return Ok((ImportOutcome::AlreadyStored, Vec::new()));
        }
        // A finalized control only takes signatures collected after it synced.
        Some(stored) if stored.status.is_final() => {
            if !signatures_differ(&stored, session) {
                return Ok((ImportOutcome::AlreadyStored, Vec::new()));
            }
            update_signature_columns(&tx, session)?;
            tx.commit()?;
            return Ok((ImportOutcome::Updated, Vec::new()));
        }
        Some(_) => {
            update_session_row(&tx, session)?;
            update_item_outcomes(&tx, &control.items)?;
            ImportOutcome::Updated
        }
    };

    let raised = match session.finalized_at {
        Some(finalized_at) if session.status.is_final() => escalate_failed_items(
            &tx,
            session,
            &control.items,
            policy,
            &session.inspector_id,
            &finalized_at,
        )?,
        _ => Vec::new(),
    };

    tx.commit()?;
    Ok((outcome, raised))
}

fn touch_control(conn: &Connection, control_id: &str, now: &DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE controls SET updated_at = ?1 WHERE id = ?2",
        params![format_datetime(now), control_id],
    )?;
    Ok(())
}

impl Database {
    pub async fn insert_control(&self, control: &ControlWithItems) -> Result<()> {
        let record = control.clone();
        self.execute(move |conn| write_control(conn, &record)).await
    }

    /// Writes a snapshot captured elsewhere. Replaying the same snapshot is a
    /// no-op. A newer revision of a control still in progress replaces its
    /// outcomes. A finalized snapshot raises its non-conformities in the same
    /// transaction, attributed to the inspector.
    pub async fn import_control(
        &self,
        control: &ControlWithItems,
        policy: EscalationPolicy,
    ) -> Result<(ImportOutcome, Vec<NonConformite>)> {
        let record = control.clone();
        self.execute(move |conn| import_snapshot(conn, &record, policy))
            .await
    }

    pub async fn get_control(&self, control_id: &str) -> Result<ControlWithItems> {
        let control_id = control_id.to_string();
        self.execute(move |conn| {
            let session = load_session(conn, &control_id)?;
            let items = load_items(conn, &control_id)?;
            Ok(ControlWithItems { session, items })
        })
        .await
    }

    pub async fn update_control_item(
        &self,
        item_id: &str,
        update: ItemUpdate,
    ) -> Result<ControlItem> {
        let item_id = item_id.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let mut item = load_item(&tx, &item_id)?;
            let session = load_session(&tx, &item.control_id)?;
            if session.status.is_final() {
                return Err(HseqError::SessionClosed(session.id).into());
            }

            if let Some(is_conforme) = update.is_conforme {
                item.is_conforme = Some(is_conforme);
            }
            if let Some(comment) = update.comment {
                item.comment = Some(comment).filter(|c| !c.trim().is_empty());
            }
            if let Some(photos) = update.photos {
                item.photos = photos;
            }

            tx.execute(
                "UPDATE control_items
                 SET is_conforme = ?1,
                     comment = ?2,
                     photos = ?3
                 WHERE id = ?4",
                params![
                    item.is_conforme,
                    item.comment,
                    encode_photos(&item.photos)?,
                    item.id,
                ],
            )?;
            touch_control(&tx, &item.control_id, &Utc::now())?;
            tx.commit()?;
            Ok(item)
        })
        .await
    }

    /// Derives the final status, writes it and, in the same transaction,
    /// raises the non-conformities the escalation policy asks for.
    pub async fn finalize_control(
        &self,
        control_id: &str,
        actor: &str,
        policy: EscalationPolicy,
    ) -> Result<(ControlStatus, Vec<NonConformite>)> {
        let control_id = control_id.to_string();
        let actor = actor.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let session = load_session(&tx, &control_id)?;
            if session.status.is_final() {
                return Err(HseqError::SessionClosed(session.id).into());
            }
            let items = load_items(&tx, &control_id)?;
            let status = derive_status(&control_id, &items)?;
            let now = Utc::now();

            tx.execute(
                "UPDATE controls
                 SET status = ?1,
                     finalized_at = ?2,
                     updated_at = ?2
                 WHERE id = ?3",
                params![status.as_str(), format_datetime(&now), control_id],
            )?;

            let raised = escalate_failed_items(&tx, &session, &items, policy, &actor, &now)?;
            tx.commit()?;
            Ok((status, raised))
        })
        .await
    }

    pub async fn sign_control(
        &self,
        control_id: &str,
        role: SignatureRole,
        signature_url: Option<String>,
    ) -> Result<ControlSession> {
        let control_id = control_id.to_string();
        self.execute(move |conn| {
            let now = format_datetime(&Utc::now());
            let sql = match role {
                SignatureRole::Inspector => {
                    "UPDATE controls
                     SET inspector_signature_url = ?1,
                         inspector_signed_at = ?2,
                         inspector_confirmed = 1,
                         updated_at = ?2
                     WHERE id = ?3"
                }
                SignatureRole::Driver => {
                    "UPDATE controls
                     SET driver_signature_url = ?1,
                         driver_signed_at = ?2,
                         driver_confirmed = 1,
                         updated_at = ?2
                     WHERE id = ?3"
                }
            };

            let rows_affected = conn.execute(sql, params![signature_url, now, control_id])?;
            if rows_affected == 0 {
                return Err(HseqError::not_found("control", control_id).into());
            }
            load_session(conn, &control_id)
        })
        .await
    }

    pub async fn update_control_observations(
        &self,
        control_id: &str,
        observations: Option<String>,
    ) -> Result<ControlSession> {
        let control_id = control_id.to_string();
        self.execute(move |conn| {
            let session = load_session(conn, &control_id)?;
            if session.status.is_final() {
                return Err(HseqError::SessionClosed(session.id).into());
            }
            conn.execute(
                "UPDATE controls
                 SET observations = ?1,
                     updated_at = ?2
                 WHERE id = ?3",
                params![observations, format_datetime(&Utc::now()), control_id],
            )?;
            load_session(conn, &control_id)
        })
        .await
    }

    pub async fn get_control_item(&self, item_id: &str) -> Result<(ControlItem, ControlSession)> {
        let item_id = item_id.to_string();
        self.execute(move |conn| {
            let item = load_item(conn, &item_id)?;
            let session = load_session(conn, &item.control_id)?;
            Ok((item, session))
        })
        .await
    }

    /// Newest first.
    pub async fn list_controls_for_vehicle(&self, vehicle_id: &str) -> Result<Vec<ControlSession>> {
        let vehicle_id = vehicle_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM controls
                 WHERE vehicle_id = ?1
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![vehicle_id])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                sessions.push(row_to_session(row)?);
            }
            Ok(sessions)
        })
        .await
    }

    /// Most recent control that reached a final status.
    pub async fn latest_finalized_control(
        &self,
        vehicle_id: &str,
    ) -> Result<Option<ControlSession>> {
        let vehicle_id = vehicle_id.to_string();
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {SESSION_COLUMNS} FROM controls
                 WHERE vehicle_id = ?1 AND status != 'in_progress'
                 ORDER BY created_at DESC, rowid DESC
                 LIMIT 1"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![vehicle_id])?;
            let session = match rows.next()? {
                Some(row) => Some(row_to_session(row)?),
                None => None,
            };
            Ok(session)
        })
        .await
    }
}
