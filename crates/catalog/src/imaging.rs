//! Pixel-level derivations: content fingerprints, decoding, down-sampled
//! colors and EXIF orientation.

use std::fs;
use std::io::{BufReader, Read};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use blake3::Hasher;
use core_types::{ColorGrid, Fingerprint, Orientation, Rgb};
use exif::{In, Reader, Tag};
use image::DynamicImage;
use tracing::debug;

use crate::{CatalogError, Result};

/// blake3 over the file bytes.
pub fn compute_fingerprint(path: &Path) -> Result<Fingerprint> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Hasher::new();
    let mut buf = [0u8; 8192];

    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(Fingerprint::new(hasher.finalize().to_hex().to_string()))
}

/// Hash identifying a set of images regardless of scan order.
pub fn catalog_identity<'a>(fingerprints: impl IntoIterator<Item = &'a Fingerprint>) -> String {
    let mut sorted: Vec<&Fingerprint> = fingerprints.into_iter().collect();
    sorted.sort();
    sorted.dedup();

    let mut hasher = Hasher::new();
    for fingerprint in sorted {
        hasher.update(fingerprint.as_str().as_bytes());
        hasher.update(b"\n");
    }
    hasher.finalize().to_hex().to_string()
}

pub fn decode_image(path: &Path) -> Result<DynamicImage> {
    match catch_unwind(AssertUnwindSafe(|| image::open(path))) {
        Ok(Ok(img)) => Ok(img),
        Ok(Err(err)) => Err(CatalogError::Decode {
            path: path.to_path_buf(),
            message: err.to_string(),
        }),
        Err(_) => Err(CatalogError::Decode {
            path: path.to_path_buf(),
            message: "decoder panicked".to_string(),
        }),
    }
}

/// Box-filters the whole image down to `segments × segments` in one pass.
pub fn color_grid(img: &DynamicImage, segments: u32) -> Result<ColorGrid> {
    if segments == 0 {
        return Err(CatalogError::InvalidGridSize(segments));
    }
    let small = img.thumbnail_exact(segments, segments).to_rgb8();
    let cells = small.pixels().map(|px| Rgb(px.0)).collect();
    ColorGrid::new(segments, cells).ok_or(CatalogError::InvalidGridSize(segments))
}

pub fn average_color(img: &DynamicImage) -> Result<Rgb> {
    let grid = color_grid(img, 1)?;
    grid.get(0, 0).ok_or(CatalogError::InvalidGridSize(1))
}

/// Rotation from the EXIF `Orientation` tag; no rotation when the tag or the
/// whole EXIF block is missing or unreadable.
pub fn read_orientation(path: &Path) -> Orientation {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(err) => {
            debug!("Cannot open {} for EXIF parsing: {err}", path.display());
            return Orientation::default();
        }
    };
    let mut reader = BufReader::new(file);
    match Reader::new().read_from_container(&mut reader) {
        Ok(exif) => exif
            .get_field(Tag::Orientation, In::PRIMARY)
            .and_then(|field| field.value.get_uint(0))
            .map(Orientation::from_exif)
            .unwrap_or_default(),
        Err(err) => {
            debug!("No EXIF orientation for {}: {err}", path.display());
            Orientation::default()
        }
    }
}
