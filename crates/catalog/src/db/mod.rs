//! Row bindings for the cache SQLite schema.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Row;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod cache_metadata;
pub mod color_grids;
pub mod db;
pub mod images;
pub mod mosaics;
pub mod transition_graphs;

pub use cache_metadata::CacheMetadata;
pub use color_grids::GridRow;
pub use db::CacheDb;
pub use images::ImageRow;
pub use mosaics::MosaicRow;
pub use transition_graphs::GraphRow;

pub type DbResult<T> = anyhow::Result<T>;

/// Anything row bindings can run statements against.
pub trait DbHandle {
    fn execute(&self, sql: &str, params: impl rusqlite::Params) -> rusqlite::Result<usize>;
    fn prepare<'a>(&'a self, sql: &str) -> rusqlite::Result<rusqlite::Statement<'a>>;
}

/// Map a single row result to a typed value, returning an error when no rows are present.
pub fn query_one<T, H, P, F>(db: &H, sql: &str, params: P, map: F) -> DbResult<T>
where
    H: DbHandle + ?Sized,
    P: rusqlite::Params,
    F: FnOnce(&Row) -> DbResult<T>,
{
    let mut stmt = db.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let row = rows.next()?.context("query returned no rows")?;
    map(row)
}

/// Map at most one row result to a typed value.
pub fn query_optional<T, H, P, F>(db: &H, sql: &str, params: P, mut map: F) -> DbResult<Option<T>>
where
    H: DbHandle + ?Sized,
    P: rusqlite::Params,
    F: FnMut(&Row) -> DbResult<T>,
{
    let mut stmt = db.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    match rows.next()? {
        Some(row) => Ok(Some(map(row)?)),
        None => Ok(None),
    }
}

pub fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_datetime(raw: String, field: &str) -> DbResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field} timestamp: {raw}"))
}

pub fn parse_datetime_opt(raw: Option<String>, field: &str) -> DbResult<Option<DateTime<Utc>>> {
    raw.map(|value| parse_datetime(value, field)).transpose()
}

pub fn to_json<T: Serialize>(value: &T) -> DbResult<String> {
    serde_json::to_string(value).context("failed to serialize JSON column")
}

pub fn from_json<T: DeserializeOwned>(s: &str) -> DbResult<T> {
    serde_json::from_str(s).context("failed to deserialize JSON column")
}
