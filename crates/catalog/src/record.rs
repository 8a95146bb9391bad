use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use core_types::{AspectRatio, ColorGrid, Fingerprint, Orientation, Rgb};
use tracing::{debug, warn};

use crate::db::{CacheDb, GridRow, ImageRow};
use crate::imaging::{average_color, color_grid, decode_image, read_orientation};
use crate::{CatalogError, Result};

/// One source photo, identified by the hash of its bytes.
///
/// Everything except the per-size grid table is fixed at construction.
/// Grids are filled lazily, once per size, and shared behind `Arc`.
pub struct ImageRecord {
    fingerprint: Fingerprint,
    path: PathBuf,
    width: u32,
    height: u32,
    ratio: AspectRatio,
    average_color: Rgb,
    orientation: Orientation,
    grids: Mutex<HashMap<u32, Arc<ColorGrid>>>,
}

impl ImageRecord {
    pub fn new(
        fingerprint: Fingerprint,
        path: impl Into<PathBuf>,
        width: u32,
        height: u32,
        average_color: Rgb,
        orientation: Orientation,
    ) -> Result<Self> {
        let ratio = AspectRatio::new(width, height)
            .ok_or(CatalogError::InvalidDimensions { width, height })?;
        Ok(Self {
            fingerprint,
            path: path.into(),
            width,
            height,
            ratio,
            average_color,
            orientation,
            grids: Mutex::new(HashMap::new()),
        })
    }

    /// Decodes `path` and derives the cached attributes.
    pub fn analyze(path: &Path, fingerprint: Fingerprint) -> Result<Self> {
        let img = decode_image(path)?;
        let average = average_color(&img)?;
        let orientation = read_orientation(path);
        Self::new(
            fingerprint,
            path,
            img.width(),
            img.height(),
            average,
            orientation,
        )
    }

    /// Rebuilds a record from its cache row without touching pixels. `path`
    /// is where the content lives now, which may differ from the stored one.
    pub fn from_row(row: &ImageRow, path: impl Into<PathBuf>) -> Result<Self> {
        Self::new(
            row.fingerprint.clone(),
            path,
            row.width,
            row.height,
            row.average_color,
            row.orientation,
        )
    }

    pub fn to_row(&self) -> ImageRow {
        ImageRow {
            fingerprint: self.fingerprint.clone(),
            file_path: self.path.to_string_lossy().to_string(),
            width: self.width,
            height: self.height,
            ratio: self.ratio.as_f64(),
            average_color: self.average_color,
            orientation: self.orientation,
            cached_at: Utc::now(),
        }
    }

    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn ratio(&self) -> AspectRatio {
        self.ratio
    }

    pub fn average_color(&self) -> Rgb {
        self.average_color
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    /// Grid already held in memory for `segments`, if any.
    pub fn cached_grid(&self, segments: u32) -> Option<Arc<ColorGrid>> {
        self.grids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&segments)
            .cloned()
    }

    /// Installs a grid for its size unless one is already present; the
    /// first grid stored for a size wins.
    pub fn prime_grid(&self, grid: ColorGrid) -> Arc<ColorGrid> {
        let mut grids = self.grids.lock().unwrap_or_else(PoisonError::into_inner);
        grids
            .entry(grid.segments())
            .or_insert_with(|| Arc::new(grid))
            .clone()
    }

    /// Color grid of `segments × segments` cells.
    ///
    /// Looked up in memory, then in the cache database, and only computed
    /// from the decoded file when both miss. A computed grid is written back
    /// to the cache. `segments == 1` is the average color.
    pub fn color_grid(&self, db: &CacheDb, segments: u32) -> Result<Arc<ColorGrid>> {
        if segments == 0 {
            return Err(CatalogError::InvalidGridSize(segments));
        }
        if let Some(grid) = self.cached_grid(segments) {
            return Ok(grid);
        }
        if segments == 1 {
            let grid = ColorGrid::new(1, vec![self.average_color])
                .ok_or(CatalogError::InvalidGridSize(1))?;
            return Ok(self.prime_grid(grid));
        }

        match GridRow::find(db, &self.fingerprint, segments) {
            Ok(Some(row)) => {
                debug!(
                    "Grid cache hit for {} at {segments} segments",
                    self.fingerprint
                );
                return Ok(self.prime_grid(row.grid));
            }
            Ok(None) => {}
            Err(err) => warn!(
                "Discarding unreadable grid for {} at {segments} segments: {err:#}",
                self.fingerprint
            ),
        }

        let img = decode_image(&self.path)?;
        let grid = color_grid(&img, segments)?;
        GridRow {
            fingerprint: self.fingerprint.clone(),
            grid: grid.clone(),
            cached_at: Utc::now(),
        }
        .upsert(db)?;
        Ok(self.prime_grid(grid))
    }
}

impl fmt::Debug for ImageRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRecord")
            .field("fingerprint", &self.fingerprint)
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("average_color", &self.average_color)
            .field("orientation", &self.orientation)
            .finish_non_exhaustive()
    }
}

impl PartialEq for ImageRecord {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint == other.fingerprint
    }
}

impl Eq for ImageRecord {}

impl Hash for ImageRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::compute_fingerprint;
    use image::{Rgb as Pixel, RgbImage};
    use std::fs;
    use tempfile::tempdir;

    fn write_quadrants(path: &Path) {
        let colors = [[0, 0, 0], [255, 255, 255], [255, 0, 0], [0, 255, 0]];
        RgbImage::from_fn(8, 8, |x, y| Pixel(colors[((y / 4) * 2 + x / 4) as usize]))
            .save(path)
            .unwrap();
    }

    #[test]
    fn analyze_reads_dimensions_and_color() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("solid.png");
        RgbImage::from_pixel(40, 30, Pixel([9, 8, 7])).save(&path).unwrap();

        let record = ImageRecord::analyze(&path, compute_fingerprint(&path).unwrap()).unwrap();
        assert_eq!((record.width(), record.height()), (40, 30));
        assert_eq!(record.ratio(), AspectRatio::new(4, 3).unwrap());
        assert_eq!(record.average_color(), Rgb::new(9, 8, 7));
        assert_eq!(record.orientation(), Orientation::Deg0);
    }

    #[test]
    fn zero_dimensions_are_rejected() {
        let result = ImageRecord::new(
            Fingerprint::from("x"),
            "/x.png",
            0,
            10,
            Rgb::BLACK,
            Orientation::Deg0,
        );
        assert!(matches!(
            result,
            Err(CatalogError::InvalidDimensions { .. })
        ));
    }

    #[test]
    fn grid_is_computed_once_then_served_from_cache() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quad.png");
        write_quadrants(&path);
        let db = CacheDb::in_memory().unwrap();

        let record = ImageRecord::analyze(&path, compute_fingerprint(&path).unwrap()).unwrap();
        let first = record.color_grid(&db, 2).unwrap();
        assert_eq!(first.get(1, 0), Some(Rgb::new(255, 0, 0)));

        // Without the file, both the in-memory and the persisted grid must serve.
        fs::remove_file(&path).unwrap();
        let again = record.color_grid(&db, 2).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let reloaded = ImageRecord::from_row(&record.to_row(), &path).unwrap();
        let from_store = reloaded.color_grid(&db, 2).unwrap();
        assert_eq!(*from_store, *first);

        // A size never computed needs the pixels.
        assert!(matches!(
            reloaded.color_grid(&db, 3),
            Err(CatalogError::Decode { .. })
        ));
    }

    #[test]
    fn single_segment_grid_is_the_average_color() {
        let db = CacheDb::in_memory().unwrap();
        let record = ImageRecord::new(
            Fingerprint::from("avg"),
            "/does/not/exist.png",
            4,
            3,
            Rgb::new(1, 2, 3),
            Orientation::Deg0,
        )
        .unwrap();
        let grid = record.color_grid(&db, 1).unwrap();
        assert_eq!(grid.cells(), &[Rgb::new(1, 2, 3)]);
    }

    #[test]
    fn corrupt_grid_entry_is_recomputed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("quad.png");
        write_quadrants(&path);
        let db = CacheDb::in_memory().unwrap();
        let fingerprint = compute_fingerprint(&path).unwrap();

        db.conn()
            .execute(
                "INSERT INTO color_grids (fingerprint, segments, grid_json, cached_at)
                 VALUES (?1, 2, 'garbage', '2024-01-01T00:00:00.000Z')",
                [fingerprint.as_str()],
            )
            .unwrap();

        let record = ImageRecord::analyze(&path, fingerprint.clone()).unwrap();
        let grid = record.color_grid(&db, 2).unwrap();
        assert_eq!(grid.get(0, 1), Some(Rgb::WHITE));

        let rewritten = GridRow::find(&db, &fingerprint, 2).unwrap().unwrap();
        assert_eq!(rewritten.grid, *grid);
    }
}
