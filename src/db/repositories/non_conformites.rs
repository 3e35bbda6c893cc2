use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, SubsecRound, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use crate::{
    db::{
        helpers::{
            decode_photos, encode_photos, format_date, format_datetime, parse_datetime,
            parse_nc_status, parse_nc_type, parse_optional_date, parse_optional_datetime,
        },
        models::{
            NcDetailsUpdate, NcFilter, NcHistoryEntry, NcStatus, NewNonConformite, NonConformite,
        },
        Database,
    },
    error::HseqError,
    nc::check_transition,
};

pub const NC_NUMERO_PREFIX: &str = "NC";

const NC_COLUMNS: &str = "id, numero, source_control_id, source_item_id, vehicle_id, driver_id, nc_type, category,
     description, responsible_service, status, due_date, photos, created_by, created_at, updated_at, closed_at";

fn row_to_nc(row: &Row) -> Result<NonConformite> {
    let nc_type: String = row.get("nc_type")?;
    let status: String = row.get("status")?;
    let photos: String = row.get("photos")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(NonConformite {
        id: row.get("id")?,
        numero: row.get("numero")?,
        source_control_id: row.get("source_control_id")?,
        source_item_id: row.get("source_item_id")?,
        vehicle_id: row.get("vehicle_id")?,
        driver_id: row.get("driver_id")?,
        nc_type: parse_nc_type(&nc_type)?,
        category: row.get("category")?,
        description: row.get("description")?,
        responsible_service: row.get("responsible_service")?,
        status: parse_nc_status(&status)?,
        due_date: parse_optional_date(row.get("due_date")?, "due_date")?,
        photos: decode_photos(&photos)?,
        created_by: row.get("created_by")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
        closed_at: parse_optional_datetime(row.get("closed_at")?, "closed_at")?,
    })
}

fn row_to_history(row: &Row) -> Result<NcHistoryEntry> {
    let changed_at: String = row.get("changed_at")?;
    Ok(NcHistoryEntry {
        id: row.get("id")?,
        nc_id: row.get("nc_id")?,
        field: row.get("field")?,
        previous_value: row.get("previous_value")?,
        new_value: row.get("new_value")?,
        actor: row.get("actor")?,
        changed_at: parse_datetime(&changed_at, "changed_at")?,
    })
}

fn load_nc(conn: &Connection, nc_id: &str) -> Result<NonConformite> {
    let sql = format!("SELECT {NC_COLUMNS} FROM non_conformites WHERE id = ?1");
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query(params![nc_id])?;
    match rows.next()? {
        Some(row) => row_to_nc(row),
        None => Err(HseqError::not_found("non-conformity", nc_id).into()),
    }
}

/// `NC-<year>-<sequence>`, sequence restarting every year.
fn next_numero(conn: &Connection, now: &DateTime<Utc>) -> Result<String> {
    let prefix = format!("{NC_NUMERO_PREFIX}-{}-", now.year());
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(substr(numero, ?2) AS INTEGER))
         FROM non_conformites
         WHERE numero LIKE ?1 || '%'",
        params![prefix, prefix.len() as i64 + 1],
        |row| row.get(0),
    )?;
    Ok(format!("{prefix}{:04}", last.unwrap_or(0) + 1))
}

/// Inserts a non-conformity on an existing connection or transaction, so the
/// finalize path can raise one inside its own transaction.
pub(crate) fn insert_nc(
    conn: &Connection,
    new_nc: &NewNonConformite,
    now: &DateTime<Utc>,
) -> Result<NonConformite> {
    let now = now.trunc_subsecs(6);
    let record = NonConformite {
        id: Uuid::new_v4().to_string(),
        numero: next_numero(conn, &now)?,
        source_control_id: new_nc.source_control_id.clone(),
        source_item_id: new_nc.source_item_id.clone(),
        vehicle_id: new_nc.vehicle_id.clone(),
        driver_id: new_nc.driver_id.clone(),
        nc_type: new_nc.nc_type,
        category: new_nc.category.clone(),
        description: new_nc.description.clone(),
        responsible_service: new_nc.responsible_service.clone(),
        status: NcStatus::Ouverte,
        due_date: new_nc.due_date,
        photos: new_nc.photos.clone(),
        created_by: new_nc.created_by.clone(),
        created_at: now,
        updated_at: now,
        closed_at: None,
    };

    conn.execute(
        "INSERT INTO non_conformites (id, numero, source_control_id, source_item_id, vehicle_id, driver_id, nc_type,
             category, description, responsible_service, status, due_date, photos, created_by, created_at, updated_at, closed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, NULL)",
        params![
            record.id,
            record.numero,
            record.source_control_id,
            record.source_item_id,
            record.vehicle_id,
            record.driver_id,
            record.nc_type.as_str(),
            record.category,
            record.description,
            record.responsible_service,
            record.status.as_str(),
            record.due_date.as_ref().map(format_date),
            encode_photos(&record.photos)?,
            record.created_by,
            format_datetime(&record.created_at),
            format_datetime(&record.updated_at),
        ],
    )
    .with_context(|| format!("failed to insert non-conformity {}", record.numero))?;

    Ok(record)
}

fn append_history(
    conn: &Connection,
    nc_id: &str,
    field: &str,
    previous_value: Option<&str>,
    new_value: Option<&str>,
    actor: &str,
    changed_at: &DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO nc_history (nc_id, field, previous_value, new_value, actor, changed_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            nc_id,
            field,
            previous_value,
            new_value,
            actor,
            format_datetime(changed_at)
        ],
    )
    .map_err(|err| HseqError::AuditWriteFailure {
        nc_id: nc_id.to_string(),
        reason: err.to_string(),
    })?;
    Ok(())
}

impl Database {
    pub async fn create_non_conformite(&self, new_nc: &NewNonConformite) -> Result<NonConformite> {
        let record = new_nc.clone();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let created = insert_nc(&tx, &record, &Utc::now())?;
            tx.commit()?;
            Ok(created)
        })
        .await
    }

    pub async fn get_non_conformite(&self, nc_id: &str) -> Result<NonConformite> {
        let nc_id = nc_id.to_string();
        self.execute(move |conn| load_nc(conn, &nc_id)).await
    }

    /// Status change and its history entry commit together. A failed history
    /// insert surfaces as `AuditWriteFailure` and leaves the status untouched.
    pub async fn update_non_conformite_status(
        &self,
        nc_id: &str,
        new_status: NcStatus,
        actor: &str,
    ) -> Result<NonConformite> {
        let nc_id = nc_id.to_string();
        let actor = actor.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let current = load_nc(&tx, &nc_id)?;
            check_transition(current.status, new_status)?;

            let now = Utc::now();
            let closed_at = (new_status == NcStatus::Fermee).then(|| format_datetime(&now));
            tx.execute(
                "UPDATE non_conformites
                 SET status = ?1,
                     updated_at = ?2,
                     closed_at = COALESCE(?3, closed_at)
                 WHERE id = ?4",
                params![new_status.as_str(), format_datetime(&now), closed_at, nc_id],
            )?;
            append_history(
                &tx,
                &nc_id,
                "status",
                Some(current.status.as_str()),
                Some(new_status.as_str()),
                &actor,
                &now,
            )?;

            let updated = load_nc(&tx, &nc_id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    /// One history entry per field that actually changes.
    pub async fn update_non_conformite_details(
        &self,
        nc_id: &str,
        update: NcDetailsUpdate,
        actor: &str,
    ) -> Result<NonConformite> {
        let nc_id = nc_id.to_string();
        let actor = actor.to_string();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let current = load_nc(&tx, &nc_id)?;
            if current.status == NcStatus::Fermee {
                return Err(HseqError::Validation(format!(
                    "non-conformity {} is closed",
                    current.numero
                ))
                .into());
            }

            let now = Utc::now();
            let mut changes: Vec<(&str, Option<String>, Option<String>)> = Vec::new();
            if let Some(description) = update.description {
                if description.trim().is_empty() {
                    return Err(HseqError::Validation("description must not be blank".into()).into());
                }
                if description != current.description {
                    changes.push(("description", Some(current.description.clone()), Some(description)));
                }
            }
            if let Some(service) = update.responsible_service {
                if Some(&service) != current.responsible_service.as_ref() {
                    changes.push((
                        "responsible_service",
                        current.responsible_service.clone(),
                        Some(service),
                    ));
                }
            }
            if let Some(due_date) = update.due_date {
                if Some(due_date) != current.due_date {
                    changes.push((
                        "due_date",
                        current.due_date.as_ref().map(format_date),
                        Some(format_date(&due_date)),
                    ));
                }
            }

            if changes.is_empty() {
                return Ok(current);
            }

            for (field, previous, new_value) in &changes {
                // Column names come from the fixed list above.
                let sql = format!("UPDATE non_conformites SET {field} = ?1, updated_at = ?2 WHERE id = ?3");
                tx.execute(&sql, params![new_value, format_datetime(&now), nc_id])?;
                append_history(
                    &tx,
                    &nc_id,
                    field,
                    previous.as_deref(),
                    new_value.as_deref(),
                    &actor,
                    &now,
                )?;
            }

            let updated = load_nc(&tx, &nc_id)?;
            tx.commit()?;
            Ok(updated)
        })
        .await
    }

    /// Newest first.
    pub async fn list_non_conformites(&self, filter: NcFilter) -> Result<Vec<NonConformite>> {
        self.execute(move |conn| {
            let sql = format!(
                "SELECT {NC_COLUMNS} FROM non_conformites
                 WHERE (?1 IS NULL OR vehicle_id = ?1)
                   AND (?2 IS NULL OR nc_type = ?2)
                   AND (?3 IS NULL OR status = ?3)
                 ORDER BY created_at DESC, rowid DESC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut rows = stmt.query(params![
                filter.vehicle_id,
                filter.nc_type.map(|t| t.as_str()),
                filter.status.map(|s| s.as_str()),
            ])?;
            let mut records = Vec::new();
            while let Some(row) = rows.next()? {
                records.push(row_to_nc(row)?);
            }
            Ok(records)
        })
        .await
    }

    /// Oldest first.
    pub async fn non_conformite_history(&self, nc_id: &str) -> Result<Vec<NcHistoryEntry>> {
        let nc_id = nc_id.to_string();
        self.execute(move |conn| {
            load_nc(conn, &nc_id)?;
            let mut stmt = conn.prepare(
                "SELECT id, nc_id, field, previous_value, new_value, actor, changed_at
                 FROM nc_history
                 WHERE nc_id = ?1
                 ORDER BY id ASC",
            )?;
            let mut rows = stmt.query(params![nc_id])?;
            let mut entries = Vec::new();
            while let Some(row) = rows.next()? {
                entries.push(row_to_history(row)?);
            }
            Ok(entries)
        })
        .await
    }
}
