use crate::db::{
    from_json, parse_datetime, query_optional, to_json, to_rfc3339, DbHandle, DbResult,
};
use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use core_types::{Fingerprint, Orientation, Rgb};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Per-image metadata keyed by content fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRow {
    pub fingerprint: Fingerprint,
    /// Last path the content was seen at. Informational; not part of the key.
    pub file_path: String,
    pub width: u32,
    pub height: u32,
    pub ratio: f64,
    pub average_color: Rgb,
    pub orientation: Orientation,
    pub cached_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "SELECT fingerprint, file_path, width, height, ratio,
        average_color, orientation, cached_at
     FROM images";

impl ImageRow {
    pub fn upsert<H: DbHandle>(&self, db: &H) -> DbResult<()> {
        db.execute(
            "INSERT INTO images (
                fingerprint, file_path, width, height, ratio, average_color, orientation, cached_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT(fingerprint) DO UPDATE SET
                file_path = excluded.file_path,
                width = excluded.width,
                height = excluded.height,
                ratio = excluded.ratio,
                average_color = excluded.average_color,
                orientation = excluded.orientation,
                cached_at = excluded.cached_at",
            params![
                self.fingerprint.as_str(),
                self.file_path,
                self.width,
                self.height,
                self.ratio,
                to_json(&self.average_color)?,
                i64::from(self.orientation.degrees()),
                to_rfc3339(self.cached_at)
            ],
        )
        .with_context(|| format!("failed to upsert image fingerprint={}", self.fingerprint))?;
        Ok(())
    }

    pub fn find<H: DbHandle>(db: &H, fingerprint: &Fingerprint) -> DbResult<Option<Self>> {
        query_optional(
            db,
            &format!("{SELECT_COLUMNS} WHERE fingerprint = ?1"),
            params![fingerprint.as_str()],
            ImageRow::from_row,
        )
        .with_context(|| format!("failed to load image fingerprint={fingerprint}"))
    }

    pub fn update_path<H: DbHandle>(db: &H, fingerprint: &Fingerprint, path: &str) -> DbResult<()> {
        db.execute(
            "UPDATE images SET file_path = ?1 WHERE fingerprint = ?2",
            params![path, fingerprint.as_str()],
        )
        .with_context(|| format!("failed to update path for fingerprint={fingerprint}"))?;
        Ok(())
    }

    fn from_row(row: &rusqlite::Row<'_>) -> DbResult<Self> {
        let degrees: i64 = row.get(6)?;
        let orientation = Orientation::from_degrees(degrees)
            .ok_or_else(|| anyhow!("invalid orientation {degrees}"))?;
        let width: u32 = row.get(2)?;
        let height: u32 = row.get(3)?;
        if width == 0 || height == 0 {
            return Err(anyhow!("invalid dimensions {width}x{height}"));
        }
        Ok(Self {
            fingerprint: Fingerprint::new(row.get::<_, String>(0)?),
            file_path: row.get(1)?,
            width,
            height,
            ratio: row.get(4)?,
            average_color: from_json(&row.get::<_, String>(5)?)?,
            orientation,
            cached_at: parse_datetime(row.get::<_, String>(7)?, "cached_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{query_one, CacheDb};

    fn sample(fingerprint: &str) -> ImageRow {
        ImageRow {
            fingerprint: Fingerprint::from(fingerprint),
            file_path: format!("/photos/{fingerprint}.jpg"),
            width: 400,
            height: 300,
            ratio: 400.0 / 300.0,
            average_color: Rgb::new(12, 34, 56),
            orientation: Orientation::Deg90,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn upsert_then_find() {
        let db = CacheDb::in_memory().unwrap();
        let row = sample("aa");
        row.upsert(&db).unwrap();

        let fetched = ImageRow::find(&db, &row.fingerprint).unwrap().unwrap();
        assert_eq!(fetched.average_color, Rgb::new(12, 34, 56));
        assert_eq!(fetched.orientation, Orientation::Deg90);
        assert_eq!((fetched.width, fetched.height), (400, 300));

        assert!(ImageRow::find(&db, &Fingerprint::from("missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn upsert_twice_keeps_one_row() {
        let db = CacheDb::in_memory().unwrap();
        let row = sample("bb");
        row.upsert(&db).unwrap();
        row.upsert(&db).unwrap();
        ImageRow::update_path(&db, &row.fingerprint, "/moved/bb.jpg").unwrap();

        let count: i64 = query_one(&db, "SELECT COUNT(*) FROM images", [], |row| Ok(row.get(0)?))
            .unwrap();
        assert_eq!(count, 1);
        let fetched = ImageRow::find(&db, &row.fingerprint).unwrap().unwrap();
        assert_eq!(fetched.file_path, "/moved/bb.jpg");
    }

    #[test]
    fn malformed_color_is_an_error() {
        let db = CacheDb::in_memory().unwrap();
        sample("cc").upsert(&db).unwrap();
        db.execute(
            "UPDATE images SET average_color = 'not json' WHERE fingerprint = 'cc'",
            [],
        )
        .unwrap();
        assert!(ImageRow::find(&db, &Fingerprint::from("cc")).is_err());
    }
}
