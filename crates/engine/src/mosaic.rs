use std::collections::HashSet;
use std::sync::Arc;

use catalog::ImageRecord;
use core_types::{cell_index, Fingerprint, MosaicKey};

/// N×N grid of tiles, row-major from the top. Tiles are shared catalog
/// records, never copies.
#[derive(Debug, Clone)]
pub struct MosaicAssignment {
    key: MosaicKey,
    tiles: Vec<Arc<ImageRecord>>,
}

impl MosaicAssignment {
    pub(crate) fn new(key: MosaicKey, tiles: Vec<Arc<ImageRecord>>) -> Self {
        Self { key, tiles }
    }

    pub fn key(&self) -> &MosaicKey {
        &self.key
    }

    pub fn target(&self) -> &Fingerprint {
        &self.key.target
    }

    pub fn segments(&self) -> u32 {
        self.key.segments
    }

    pub fn reuse(&self) -> bool {
        self.key.reuse
    }

    pub fn tiles(&self) -> &[Arc<ImageRecord>] {
        &self.tiles
    }

    pub fn tile(&self, row: u32, col: u32) -> Option<&Arc<ImageRecord>> {
        cell_index(self.segments(), row, col).and_then(|i| self.tiles.get(i))
    }

    pub fn rows(&self) -> impl Iterator<Item = &[Arc<ImageRecord>]> {
        self.tiles.chunks(self.segments().max(1) as usize)
    }

    /// Tile fingerprints in row-major order; the persisted form.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.tiles.iter().map(|t| t.fingerprint().clone()).collect()
    }

    pub fn distinct_tiles(&self) -> usize {
        self.tiles
            .iter()
            .map(|t| t.fingerprint())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.tiles.iter().any(|t| t.fingerprint() == fingerprint)
    }

    /// `(column, row)` of the first cell holding `fingerprint`, rows counted
    /// from the top.
    pub fn locate(&self, fingerprint: &Fingerprint) -> Option<(u32, u32)> {
        let n = self.segments().max(1) as usize;
        self.tiles
            .iter()
            .position(|t| t.fingerprint() == fingerprint)
            .map(|i| ((i % n) as u32, (i / n) as u32))
    }
}
