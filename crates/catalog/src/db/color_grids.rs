use crate::db::{
    from_json, parse_datetime, query_optional, to_json, to_rfc3339, DbHandle, DbResult,
};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use core_types::{ColorGrid, Fingerprint};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// One down-sampled color grid, keyed by `(fingerprint, segments)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridRow {
    pub fingerprint: Fingerprint,
    pub grid: ColorGrid,
    pub cached_at: DateTime<Utc>,
}

impl GridRow {
    pub fn upsert<H: DbHandle>(&self, db: &H) -> DbResult<()> {
        db.execute(
            "INSERT INTO color_grids (fingerprint, segments, grid_json, cached_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(fingerprint, segments) DO UPDATE SET
                grid_json = excluded.grid_json,
                cached_at = excluded.cached_at",
            params![
                self.fingerprint.as_str(),
                self.grid.segments(),
                to_json(&self.grid)?,
                to_rfc3339(self.cached_at)
            ],
        )
        .with_context(|| {
            format!(
                "failed to upsert {0}x{0} grid for fingerprint={1}",
                self.grid.segments(),
                self.fingerprint
            )
        })?;
        Ok(())
    }

    pub fn find<H: DbHandle>(
        db: &H,
        fingerprint: &Fingerprint,
        segments: u32,
    ) -> DbResult<Option<Self>> {
        let row = query_optional(
            db,
            "SELECT fingerprint, grid_json, cached_at
             FROM color_grids WHERE fingerprint = ?1 AND segments = ?2",
            params![fingerprint.as_str(), segments],
            GridRow::from_row,
        )
        .with_context(|| format!("failed to load grid for fingerprint={fingerprint}"))?;

        match row {
            Some(row) if row.grid.segments() != segments => Err(anyhow!(
                "grid stored under {segments} segments holds {} segments",
                row.grid.segments()
            )),
            other => Ok(other),
        }
    }

    fn from_row(row: &rusqlite::Row<'_>) -> DbResult<Self> {
        let grid: ColorGrid = from_json(&row.get::<_, String>(1)?)?;
        if !grid.is_valid() {
            return Err(anyhow!("stored grid has a wrong cell count"));
        }
        Ok(Self {
            fingerprint: Fingerprint::new(row.get::<_, String>(0)?),
            grid,
            cached_at: parse_datetime(row.get::<_, String>(2)?, "cached_at")?,
        })
    }
}
