use anyhow::Result;
use rusqlite::params;

use crate::db::{
    helpers::{format_optional_datetime, parse_control_status, parse_nc_status, to_u64},
    models::{ControlStatus, DateRange, HseqStats, NcStatus},
    Database,
};

impl Database {
    pub async fn compute_stats(&self, range: DateRange) -> Result<HseqStats> {
        self.execute(move |conn| {
            let from = format_optional_datetime(range.from.as_ref());
            let to = format_optional_datetime(range.to.as_ref());
            let mut stats = HseqStats::default();

            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*) FROM controls
                 WHERE (?1 IS NULL OR created_at >= ?1)
                   AND (?2 IS NULL OR created_at < ?2)
                 GROUP BY status",
            )?;
            let mut rows = stmt.query(params![from, to])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count = to_u64(row.get(1)?, "control count")?;
                stats.total_controles += count;
                match parse_control_status(&status)? {
                    ControlStatus::Conforme => stats.conformes += count,
                    ControlStatus::NonConforme => stats.non_conformes += count,
                    ControlStatus::Refuse => stats.refuses += count,
                    ControlStatus::InProgress => stats.en_cours += count,
                }
            }

            let mut stmt = conn.prepare(
                "SELECT status, COUNT(*), SUM(CASE WHEN nc_type = 'critique' THEN 1 ELSE 0 END)
                 FROM non_conformites
                 WHERE (?1 IS NULL OR created_at >= ?1)
                   AND (?2 IS NULL OR created_at < ?2)
                 GROUP BY status",
            )?;
            let mut rows = stmt.query(params![from, to])?;
            while let Some(row) = rows.next()? {
                let status: String = row.get(0)?;
                let count = to_u64(row.get(1)?, "non-conformity count")?;
                let critical = to_u64(row.get(2)?, "critical count")?;
                match parse_nc_status(&status)? {
                    NcStatus::Ouverte => stats.nc_ouvertes += count,
                    NcStatus::EnCours => stats.nc_en_cours += count,
                    NcStatus::Fermee => {
                        stats.nc_fermees += count;
                        continue;
                    }
                }
                stats.nc_critiques += critical;
            }

            stats.taux_conformite = HseqStats::compliance_rate(stats.conformes, stats.total_controles);
            Ok(stats)
        })
        .await
    }
}
