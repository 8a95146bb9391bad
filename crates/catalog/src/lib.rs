//! Photo catalog for mosaic composition: folder scanning, content-addressed
//! per-image metadata, lazily derived color grids and the SQLite cache that
//! keeps all of it across sessions.

pub mod catalog;
pub mod db;
pub mod imaging;
pub mod record;
pub mod scanner;
pub mod schema;

use std::path::PathBuf;
use thiserror::Error;

pub use crate::catalog::{ImageCatalog, LoadOptions, LoadReport};
pub use crate::db::CacheDb;
pub use crate::record::ImageRecord;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("Folder not found: {}", .0.display())]
    FolderNotFound(PathBuf),

    #[error("No usable images in {}", folder.display())]
    EmptyCatalog { folder: PathBuf },

    #[error("Invalid image dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Invalid grid size {0}")]
    InvalidGridSize(u32),
}

pub type Result<T> = std::result::Result<T, CatalogError>;
