use std::collections::HashMap;

use catalog::imaging::decode_image;
use core_types::Fingerprint;
use image::imageops::{overlay, FilterType};
use image::{Rgb, RgbImage};
use tracing::debug;

use crate::mosaic::MosaicAssignment;
use crate::{EngineError, Result};

/// Paints `assignment` onto a `width`×`height` canvas.
///
/// Every cell is `width / N` by `height / N` pixels; leftover pixels on the
/// right and bottom edges stay black. Each distinct tile is decoded and
/// resized once.
pub fn render_mosaic(assignment: &MosaicAssignment, width: u32, height: u32) -> Result<RgbImage> {
    let segments = assignment.segments();
    let invalid = EngineError::InvalidCanvas {
        width,
        height,
        segments,
    };
    if segments == 0 {
        return Err(invalid);
    }
    let (cell_w, cell_h) = (width / segments, height / segments);
    if cell_w == 0 || cell_h == 0 {
        return Err(invalid);
    }

    let mut canvas = RgbImage::from_pixel(width, height, Rgb([0, 0, 0]));
    let mut resized: HashMap<&Fingerprint, RgbImage> = HashMap::new();
    for (i, tile) in assignment.tiles().iter().enumerate() {
        let i = i as u32;
        let (col, row) = (i % segments, i / segments);
        if !resized.contains_key(tile.fingerprint()) {
            let img = decode_image(tile.path())?
                .resize_exact(cell_w, cell_h, FilterType::Lanczos3)
                .to_rgb8();
            resized.insert(tile.fingerprint(), img);
        }
        if let Some(img) = resized.get(tile.fingerprint()) {
            overlay(
                &mut canvas,
                img,
                i64::from(col * cell_w),
                i64::from(row * cell_h),
            );
        }
    }
    debug!(
        "Rendered mosaic of {} at {width}x{height} from {} distinct tiles",
        assignment.target(),
        resized.len()
    );
    Ok(canvas)
}
