//! Mosaic composition and presentation sequencing on top of [`catalog`].
//!
//! [`MosaicComposer`] fills an N×N grid with the catalog images whose average
//! colors best match a target's down-sampled colors. [`TransitionGraph`]
//! links every tile to the mosaics it appears in, and [`SequencePlanner`]
//! walks the graph's largest strongly connected part forever, always moving
//! to the least visited neighbor. [`MosaicSession`] ties these together for
//! a presentation loop.

pub mod compose;
pub mod graph;
pub mod mosaic;
pub mod render;
pub mod sequence;
pub mod session;

use app_settings::AppSettingsError;
use catalog::CatalogError;
use core_types::Fingerprint;

pub use crate::compose::{ComposerStats, MosaicComposer};
pub use crate::graph::{CoreGraph, TransitionGraph};
pub use crate::mosaic::MosaicAssignment;
pub use crate::render::render_mosaic;
pub use crate::sequence::SequencePlanner;
pub use crate::session::{MosaicSession, Transition};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("Cache store error: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("Settings error: {0}")]
    Settings(#[from] AppSettingsError),

    #[error(
        "Insufficient tiles: a {segments}x{segments} mosaic without reuse needs {requested} images, the catalog has {available}"
    )]
    InsufficientTiles {
        segments: u32,
        requested: usize,
        available: usize,
    },

    #[error("Grid size must be at least 1")]
    InvalidGridSize,

    #[error("Image {0} is not in the catalog")]
    UnknownImage(Fingerprint),

    #[error("Transition graph has no cycle to walk")]
    EmptyGraph,

    #[error("Tile {tile} does not appear in the mosaic of {target}")]
    TileNotInMosaic {
        tile: Fingerprint,
        target: Fingerprint,
    },

    #[error("Canvas {width}x{height} is too small for {segments} segments")]
    InvalidCanvas {
        width: u32,
        height: u32,
        segments: u32,
    },

    #[error("Render error: {0}")]
    Render(#[from] image::ImageError),

    #[error("No catalog loaded")]
    NoCatalog,
}

pub type Result<T> = std::result::Result<T, EngineError>;
