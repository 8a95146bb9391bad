//! SQLite schema DDL and helper utilities for cache initialization.

use rusqlite::{Connection, Error as SqliteError, ErrorCode, OptionalExtension};

/// SQLite schema version supported by this build.
pub const TARGET_SCHEMA_VERSION: i64 = 1;

/// Packed SQL definition for the complete cache schema.
pub const CACHE_SCHEMA_SQL: &str = include_str!("../schema/cache_schema.sql");

/// Applies the cache schema (or upgrades an existing cache) on the provided connection.
///
/// The helper enables WAL journaling, runs any pending migrations, ensures the
/// `cache_metadata` row exists, and keeps `PRAGMA user_version` aligned with
/// [`TARGET_SCHEMA_VERSION`]. A cache written by a newer build is refused.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    // In-memory databases answer "memory" here; both are fine.
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;

    let user_version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if user_version > TARGET_SCHEMA_VERSION {
        return Err(newer_schema_error(user_version));
    }
    if user_version < TARGET_SCHEMA_VERSION {
        apply_migrations(conn, user_version)?;
    }

    let current_cache_version: i64 = conn
        .query_row(
            "SELECT schema_version FROM cache_metadata WHERE id = 1",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);
    if current_cache_version > TARGET_SCHEMA_VERSION {
        return Err(newer_schema_error(current_cache_version));
    }

    conn.execute(
        "INSERT INTO cache_metadata (id, schema_version, created_at, updated_at, last_opened)
         VALUES (
            1,
            ?1,
            strftime('%Y-%m-%dT%H:%M:%fZ','now'),
            strftime('%Y-%m-%dT%H:%M:%fZ','now'),
            NULL
         )
         ON CONFLICT(id) DO UPDATE SET
            schema_version = excluded.schema_version,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ','now')",
        [TARGET_SCHEMA_VERSION],
    )?;

    conn.pragma_update(None, "user_version", TARGET_SCHEMA_VERSION)?;
    Ok(())
}

fn apply_migrations(conn: &Connection, from_version: i64) -> rusqlite::Result<()> {
    match from_version {
        0 => conn.execute_batch(CACHE_SCHEMA_SQL),
        _ => Err(newer_schema_error(from_version)),
    }
}

fn newer_schema_error(version: i64) -> SqliteError {
    SqliteError::SqliteFailure(
        rusqlite::ffi::Error {
            code: ErrorCode::DatabaseCorrupt,
            extended_code: 0,
        },
        Some(format!(
            "cache schema version {version} is newer than supported {TARGET_SCHEMA_VERSION}"
        )),
    )
}
