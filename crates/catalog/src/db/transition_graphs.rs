use crate::db::{
    from_json, parse_datetime, query_optional, to_json, to_rfc3339, DbHandle, DbResult,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use core_types::Fingerprint;
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Edge list of a transition graph, keyed like the mosaics it was built from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphRow {
    pub catalog_hash: String,
    pub segments: u32,
    pub reuse: bool,
    /// `(tile, target)` pairs in insertion order.
    pub edges: Vec<(Fingerprint, Fingerprint)>,
    pub cached_at: DateTime<Utc>,
}

impl GraphRow {
    pub fn upsert<H: DbHandle>(&self, db: &H) -> DbResult<()> {
        db.execute(
            "INSERT INTO transition_graphs (catalog_hash, segments, reuse, edges_json, cached_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(catalog_hash, segments, reuse) DO UPDATE SET
                edges_json = excluded.edges_json,
                cached_at = excluded.cached_at",
            params![
                self.catalog_hash,
                self.segments,
                self.reuse,
                to_json(&self.edges)?,
                to_rfc3339(self.cached_at)
            ],
        )
        .with_context(|| format!("failed to upsert graph for catalog={}", self.catalog_hash))?;
        Ok(())
    }

    pub fn find<H: DbHandle>(
        db: &H,
        catalog_hash: &str,
        segments: u32,
        reuse: bool,
    ) -> DbResult<Option<Self>> {
        query_optional(
            db,
            "SELECT edges_json, cached_at FROM transition_graphs
             WHERE catalog_hash = ?1 AND segments = ?2 AND reuse = ?3",
            params![catalog_hash, segments, reuse],
            |row| {
                Ok(GraphRow {
                    catalog_hash: catalog_hash.to_string(),
                    segments,
                    reuse,
                    edges: from_json(&row.get::<_, String>(0)?)?,
                    cached_at: parse_datetime(row.get::<_, String>(1)?, "cached_at")?,
                })
            },
        )
        .with_context(|| format!("failed to load graph for catalog={catalog_hash}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::CacheDb;

    #[test]
    fn edges_survive_storage() {
        let db = CacheDb::in_memory().unwrap();
        let edges = vec![
            (Fingerprint::from("a"), Fingerprint::from("b")),
            (Fingerprint::from("b"), Fingerprint::from("a")),
        ];
        GraphRow {
            catalog_hash: "cat".into(),
            segments: 3,
            reuse: false,
            edges: edges.clone(),
            cached_at: Utc::now(),
        }
        .upsert(&db)
        .unwrap();

        let fetched = GraphRow::find(&db, "cat", 3, false).unwrap().unwrap();
        assert_eq!(fetched.edges, edges);
        assert!(GraphRow::find(&db, "cat", 3, true).unwrap().is_none());
        assert!(GraphRow::find(&db, "cat", 4, false).unwrap().is_none());
    }
}
