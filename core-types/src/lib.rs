use serde::{Deserialize, Serialize};
use std::fmt;

/// Content hash of an image file, hex encoded. The only cache key for per-image data.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Fingerprint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// 8-bit RGB triple. Serialized as `[r, g, b]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Rgb(pub [u8; 3]);

impl Rgb {
    pub const BLACK: Rgb = Rgb([0, 0, 0]);
    pub const WHITE: Rgb = Rgb([255, 255, 255]);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b])
    }

    /// Sum of absolute per-channel differences.
    pub fn l1_distance(self, other: Rgb) -> u32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| u32::from(a.abs_diff(*b)))
            .sum()
    }
}

/// Display rotation derived from EXIF metadata, in clockwise degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// Maps an EXIF `Orientation` tag value. Mirrored variants collapse onto
    /// the rotation they share; unknown values mean no rotation.
    pub fn from_exif(tag: u32) -> Self {
        match tag {
            3 | 4 => Self::Deg180,
            5 | 6 => Self::Deg90,
            7 | 8 => Self::Deg270,
            _ => Self::Deg0,
        }
    }

    pub fn from_degrees(degrees: i64) -> Option<Self> {
        match degrees {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }
}

/// Width:height ratio kept as a reduced fraction so equal ratios compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    /// Returns `None` for degenerate (zero-sized) dimensions.
    pub fn new(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }
        let divisor = gcd(width, height);
        Some(Self {
            width: width / divisor,
            height: height / divisor,
        })
    }

    pub fn as_f64(self) -> f64 {
        f64::from(self.width) / f64::from(self.height)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

/// Square grid of colors, one per mosaic cell, stored row-major from the top.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorGrid {
    segments: u32,
    cells: Vec<Rgb>,
}

impl ColorGrid {
    /// Returns `None` unless `cells` holds exactly `segments²` entries.
    pub fn new(segments: u32, cells: Vec<Rgb>) -> Option<Self> {
        let grid = Self { segments, cells };
        grid.is_valid().then_some(grid)
    }

    /// Deserialized grids are only trusted after this check.
    pub fn is_valid(&self) -> bool {
        self.segments > 0 && self.cells.len() == cell_count(self.segments)
    }

    pub fn segments(&self) -> u32 {
        self.segments
    }

    pub fn cells(&self) -> &[Rgb] {
        &self.cells
    }

    pub fn get(&self, row: u32, col: u32) -> Option<Rgb> {
        cell_index(self.segments, row, col).and_then(|i| self.cells.get(i).copied())
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Rgb]> {
        self.cells.chunks(self.segments.max(1) as usize)
    }
}

/// Number of cells in an `segments × segments` grid.
pub fn cell_count(segments: u32) -> usize {
    let n = segments as usize;
    n * n
}

/// Row-major position of `(row, col)` in a `segments × segments` grid, or
/// `None` outside it. Computed in `usize` so large grids do not wrap.
pub fn cell_index(segments: u32, row: u32, col: u32) -> Option<usize> {
    if row >= segments || col >= segments {
        return None;
    }
    Some(row as usize * segments as usize + col as usize)
}

/// Identity of one composed mosaic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MosaicKey {
    /// Hash over the fingerprints of the catalog the mosaic was drawn from.
    pub catalog: String,
    pub target: Fingerprint,
    pub segments: u32,
    pub reuse: bool,
}
