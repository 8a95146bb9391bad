use crate::db::{
    from_json, parse_datetime, query_optional, to_json, to_rfc3339, DbHandle, DbResult,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use core_types::{Fingerprint, MosaicKey};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// A composed mosaic as an ordered, row-major list of tile fingerprints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MosaicRow {
    pub key: MosaicKey,
    pub tiles: Vec<Fingerprint>,
    pub cached_at: DateTime<Utc>,
}

impl MosaicRow {
    pub fn upsert<H: DbHandle>(&self, db: &H) -> DbResult<()> {
        db.execute(
            "INSERT INTO mosaics (catalog_hash, target, segments, reuse, tiles_json, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(catalog_hash, target, segments, reuse) DO UPDATE SET
                tiles_json = excluded.tiles_json,
                cached_at = excluded.cached_at",
            params![
                self.key.catalog,
                self.key.target.as_str(),
                self.key.segments,
                self.key.reuse,
                to_json(&self.tiles)?,
                to_rfc3339(self.cached_at)
            ],
        )
        .with_context(|| format!("failed to upsert mosaic for target={}", self.key.target))?;
        Ok(())
    }

    pub fn find<H: DbHandle>(db: &H, key: &MosaicKey) -> DbResult<Option<Self>> {
        query_optional(
            db,
            "SELECT tiles_json, cached_at FROM mosaics
             WHERE catalog_hash = ?1 AND target = ?2 AND segments = ?3 AND reuse = ?4",
            params![key.catalog, key.target.as_str(), key.segments, key.reuse],
            |row| {
                Ok(MosaicRow {
                    key: key.clone(),
                    tiles: from_json(&row.get::<_, String>(0)?)?,
                    cached_at: parse_datetime(row.get::<_, String>(1)?, "cached_at")?,
                })
            },
        )
        .with_context(|| format!("failed to load mosaic for target={}", key.target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CacheDb;

    fn key(reuse: bool) -> MosaicKey {
        MosaicKey {
            catalog: "cat".into(),
            target: Fingerprint::from("t"),
            segments: 2,
            reuse,
        }
    }

    #[test]
    fn reuse_flag_is_part_of_the_key() {
        let db = CacheDb::in_memory().unwrap();
        MosaicRow {
            key: key(true),
            tiles: vec![Fingerprint::from("a"); 4],
            cached_at: Utc::now(),
        }
        .upsert(&db)
        .unwrap();

        let hit = MosaicRow::find(&db, &key(true)).unwrap().unwrap();
        assert_eq!(hit.tiles, vec![Fingerprint::from("a"); 4]);
        assert!(MosaicRow::find(&db, &key(false)).unwrap().is_none());
    }
}
