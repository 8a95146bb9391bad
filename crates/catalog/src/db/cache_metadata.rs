use crate::db::{
    parse_datetime, parse_datetime_opt, query_one, to_rfc3339, DbHandle, DbResult,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub schema_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_opened: Option<DateTime<Utc>>,
}

impl CacheMetadata {
    pub fn load_singleton<H: DbHandle>(db: &H) -> DbResult<Self> {
        query_one(
            db,
            "SELECT schema_version, created_at, updated_at, last_opened
             FROM cache_metadata WHERE id = 1",
            [],
            CacheMetadata::from_row,
        )
        .context("failed to load cache_metadata singleton")
    }

    pub fn update_last_opened<H: DbHandle>(db: &H) -> DbResult<()> {
        db.execute(
            "UPDATE cache_metadata SET last_opened = ?1 WHERE id = 1",
            params![to_rfc3339(Utc::now())],
        )
        .with_context(|| "failed to update cache_metadata.last_opened")?;
        Ok(())
    }

    fn from_row(row: &rusqlite::Row<'_>) -> DbResult<Self> {
        Ok(Self {
            schema_version: row.get(0)?,
            created_at: parse_datetime(row.get::<_, String>(1)?, "created_at")?,
            updated_at: parse_datetime(row.get::<_, String>(2)?, "updated_at")?,
            last_opened: parse_datetime_opt(row.get::<_, Option<String>>(3)?, "last_opened")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CacheDb;
    use crate::schema::TARGET_SCHEMA_VERSION;

    #[test]
    fn singleton_exists_after_open() {
        let db = CacheDb::in_memory().unwrap();

        let fetched = CacheMetadata::load_singleton(&db).unwrap();
        assert_eq!(fetched.schema_version, TARGET_SCHEMA_VERSION);
        assert!(fetched.last_opened.is_none());

        CacheMetadata::update_last_opened(&db).unwrap();
        let updated = CacheMetadata::load_singleton(&db).unwrap();
        assert!(updated.last_opened.is_some());
    }
}
