use crate::db::DbResult;
use crate::schema::initialize_schema;
use anyhow::Context;
use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

use super::DbHandle;

/// Handle on the persistent derivative cache.
///
/// Opened once per session and handed to every component that reads or
/// writes cached data; [`CacheDb::flush`] is called when the session ends.
#[derive(Debug)]
pub struct CacheDb {
    conn: Connection,
    path: Option<PathBuf>,
}

impl CacheDb {
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create cache directory {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open cache at {}", path.display()))?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Backing file, `None` for in-memory caches.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Checkpoints the write-ahead log into the main database file.
    pub fn flush(&self) -> DbResult<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("failed to checkpoint cache")?;
        self.conn
            .execute_batch("PRAGMA optimize;")
            .context("failed to optimize cache")?;
        Ok(())
    }

    /// Drops composed mosaics and transition graphs, keeping per-image data.
    pub fn clear_derived(&self) -> DbResult<()> {
        self.conn
            .execute_batch("DELETE FROM mosaics; DELETE FROM transition_graphs;")
            .context("failed to clear derived cache entries")?;
        Ok(())
    }
}

impl DbHandle for CacheDb {
    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize> {
        self.conn.execute(sql, params)
    }

    fn prepare<'a>(&'a self, sql: &str) -> rusqlite::Result<rusqlite::Statement<'a>> {
        self.conn.prepare(sql)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::query_one;

    #[test]
    fn open_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");
        let db = CacheDb::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(db.path(), Some(path.as_path()));
        db.flush().unwrap();
    }

    #[test]
    fn clear_derived_keeps_images() {
        let db = CacheDb::in_memory().unwrap();
        db.execute(
            "INSERT INTO images (fingerprint, file_path, width, height, ratio, average_color, orientation, cached_at)
             VALUES ('abc', '/a.png', 4, 3, 1.333, '[1,2,3]', 0, '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        db.execute(
            "INSERT INTO mosaics (catalog_hash, target, segments, reuse, tiles_json, cached_at)
             VALUES ('c', 'abc', 1, 1, '[\"abc\"]', '2024-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();

        db.clear_derived().unwrap();

        let images: i64 =
            query_one(&db, "SELECT COUNT(*) FROM images", [], |row| Ok(row.get(0)?)).unwrap();
        let mosaics: i64 =
            query_one(&db, "SELECT COUNT(*) FROM mosaics", [], |row| Ok(row.get(0)?)).unwrap();
        assert_eq!(images, 1);
        assert_eq!(mosaics, 0);
    }
}
