use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use catalog::db::MosaicRow;
use catalog::{CacheDb, ImageCatalog, ImageRecord};
use chrono::Utc;
use core_types::{cell_count, ColorGrid, MosaicKey, Rgb};
use tracing::{debug, warn};

use crate::mosaic::MosaicAssignment;
use crate::{EngineError, Result};

/// Where the mosaics served by a composer came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComposerStats {
    pub memory_hits: u64,
    pub store_hits: u64,
    pub computed: u64,
}

/// Index of the candidate whose average color is closest to `color` under
/// L1 distance. The earliest candidate wins ties.
pub fn nearest_tile(color: Rgb, candidates: &[Arc<ImageRecord>]) -> Option<usize> {
    let mut best: Option<(usize, u32)> = None;
    for (i, candidate) in candidates.iter().enumerate() {
        let distance = color.l1_distance(candidate.average_color());
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((i, distance));
        }
    }
    best.map(|(i, _)| i)
}

/// Greedy row-major assignment of `candidates` to the cells of `grid`.
///
/// Without reuse each chosen tile leaves the pool, so earlier cells get first
/// pick. The caller checks that the pool is large enough.
pub fn assign_tiles(
    grid: &ColorGrid,
    candidates: &[Arc<ImageRecord>],
    reuse: bool,
) -> Result<Vec<Arc<ImageRecord>>> {
    let requested = grid.cells().len();
    if !reuse && candidates.len() < requested {
        return Err(EngineError::InsufficientTiles {
            segments: grid.segments(),
            requested,
            available: candidates.len(),
        });
    }

    let mut pool = candidates.to_vec();
    let mut tiles = Vec::with_capacity(requested);
    for &cell in grid.cells() {
        let Some(index) = nearest_tile(cell, &pool) else {
            return Err(EngineError::InsufficientTiles {
                segments: grid.segments(),
                requested,
                available: candidates.len(),
            });
        };
        if reuse {
            tiles.push(pool[index].clone());
        } else {
            tiles.push(pool.remove(index));
        }
    }
    Ok(tiles)
}

/// Composes mosaics from one catalog and memoizes them per [`MosaicKey`].
///
/// Lookups go memory first, then the cache store, then a fresh
/// computation that is written back to the store.
pub struct MosaicComposer {
    catalog: Arc<ImageCatalog>,
    memo: HashMap<MosaicKey, Arc<MosaicAssignment>>,
    stats: ComposerStats,
}

impl MosaicComposer {
    pub fn new(catalog: Arc<ImageCatalog>) -> Self {
        Self {
            catalog,
            memo: HashMap::new(),
            stats: ComposerStats::default(),
        }
    }

    pub fn catalog(&self) -> &Arc<ImageCatalog> {
        &self.catalog
    }

    pub fn stats(&self) -> ComposerStats {
        self.stats
    }

    pub fn key_for(&self, target: &ImageRecord, segments: u32, reuse: bool) -> MosaicKey {
        MosaicKey {
            catalog: self.catalog.identity().to_string(),
            target: target.fingerprint().clone(),
            segments,
            reuse,
        }
    }

    /// Drops memoized mosaics; the cache store is left alone.
    pub fn forget(&mut self) {
        self.memo.clear();
    }

    /// Mosaic of `target` with `segments × segments` tiles from this catalog.
    ///
    /// Without reuse the catalog must hold at least `segments²` images;
    /// otherwise this fails before any work is done.
    pub fn compose(
        &mut self,
        db: &CacheDb,
        target: &ImageRecord,
        segments: u32,
        reuse: bool,
    ) -> Result<Arc<MosaicAssignment>> {
        if segments == 0 {
            return Err(EngineError::InvalidGridSize);
        }
        let requested = cell_count(segments);
        if !reuse && requested > self.catalog.len() {
            return Err(EngineError::InsufficientTiles {
                segments,
                requested,
                available: self.catalog.len(),
            });
        }

        let key = self.key_for(target, segments, reuse);
        if let Some(mosaic) = self.memo.get(&key) {
            self.stats.memory_hits += 1;
            return Ok(mosaic.clone());
        }

        let mosaic = match self.load_stored(db, &key) {
            Some(mosaic) => {
                self.stats.store_hits += 1;
                mosaic
            }
            None => {
                let grid = target.color_grid(db, segments)?;
                let tiles = assign_tiles(&grid, self.catalog.records(), reuse)?;
                let mosaic = MosaicAssignment::new(key.clone(), tiles);
                MosaicRow {
                    key: key.clone(),
                    tiles: mosaic.fingerprints(),
                    cached_at: Utc::now(),
                }
                .upsert(db)?;
                self.stats.computed += 1;
                debug!(
                    "Composed mosaic for {} at {segments} segments (reuse={reuse})",
                    key.target
                );
                mosaic
            }
        };

        let mosaic = Arc::new(mosaic);
        self.memo.insert(key, mosaic.clone());
        Ok(mosaic)
    }

    /// Rebuilds a stored mosaic, or `None` when it is absent or no longer
    /// consistent with this catalog.
    fn load_stored(&self, db: &CacheDb, key: &MosaicKey) -> Option<MosaicAssignment> {
        let row = match MosaicRow::find(db, key) {
            Ok(Some(row)) => row,
            Ok(None) => return None,
            Err(err) => {
                warn!("Discarding unreadable mosaic for {}: {err:#}", key.target);
                return None;
            }
        };

        if row.tiles.len() != cell_count(key.segments) {
            warn!(
                "Discarding stored mosaic for {}: {} tiles, expected {}",
                key.target,
                row.tiles.len(),
                cell_count(key.segments)
            );
            return None;
        }
        if !key.reuse {
            let distinct: HashSet<_> = row.tiles.iter().collect();
            if distinct.len() != row.tiles.len() {
                warn!("Discarding stored mosaic for {} with repeated tiles", key.target);
                return None;
            }
        }

        let mut tiles = Vec::with_capacity(row.tiles.len());
        for fingerprint in &row.tiles {
            match self.catalog.get(fingerprint) {
                Some(record) => tiles.push(record.clone()),
                None => {
                    warn!(
                        "Discarding stored mosaic for {} with unknown tile {fingerprint}",
                        key.target
                    );
                    return None;
                }
            }
        }
        Some(MosaicAssignment::new(key.clone(), tiles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Fingerprint, Orientation};
    use std::path::Path;

    const RED: Rgb = Rgb([255, 0, 0]);
    const GREEN: Rgb = Rgb([0, 255, 0]);

    fn record(fp: &str, color: Rgb) -> Arc<ImageRecord> {
        Arc::new(
            ImageRecord::new(
                Fingerprint::from(fp),
                format!("/virtual/{fp}.png"),
                8,
                8,
                color,
                Orientation::Deg0,
            )
            .unwrap(),
        )
    }

    fn catalog(records: Vec<Arc<ImageRecord>>) -> Arc<ImageCatalog> {
        Arc::new(ImageCatalog::from_records(Path::new("/virtual"), records).unwrap())
    }

    fn quadrant_target() -> Arc<ImageRecord> {
        let target = record("target", Rgb([128, 128, 64]));
        target.prime_grid(ColorGrid::new(2, vec![Rgb::BLACK, Rgb::WHITE, RED, GREEN]).unwrap());
        target
    }

    fn four_colors() -> Vec<Arc<ImageRecord>> {
        vec![
            record("red", RED),
            record("white", Rgb::WHITE),
            record("green", GREEN),
            record("black", Rgb::BLACK),
        ]
    }

    fn tile_names(mosaic: &MosaicAssignment) -> Vec<String> {
        mosaic
            .tiles()
            .iter()
            .map(|t| t.fingerprint().as_str().to_string())
            .collect()
    }

    #[test]
    fn nearest_tile_prefers_first_on_ties() {
        let pool = vec![record("a", Rgb([10, 0, 0])), record("b", Rgb([0, 10, 0]))];
        assert_eq!(nearest_tile(Rgb::BLACK, &pool), Some(0));
        assert_eq!(nearest_tile(Rgb([0, 9, 0]), &pool), Some(1));
        assert_eq!(nearest_tile(Rgb::BLACK, &[]), None);
    }

    #[test]
    fn exact_color_matches_fill_each_quadrant() {
        let db = CacheDb::in_memory().unwrap();
        let mut composer = MosaicComposer::new(catalog(four_colors()));
        let target = quadrant_target();

        for reuse in [false, true] {
            let mosaic = composer.compose(&db, &target, 2, reuse).unwrap();
            assert_eq!(tile_names(&mosaic), ["black", "white", "red", "green"]);
        }
    }

    #[test]
    fn reuse_repeats_the_best_tile() {
        let db = CacheDb::in_memory().unwrap();
        let mut composer = MosaicComposer::new(catalog(vec![
            record("dark", Rgb([5, 5, 5])),
            record("light", Rgb([250, 250, 250])),
        ]));
        let target = record("target", Rgb::BLACK);
        target.prime_grid(ColorGrid::new(2, vec![Rgb::BLACK; 4]).unwrap());

        let mosaic = composer.compose(&db, &target, 2, true).unwrap();
        assert_eq!(tile_names(&mosaic), ["dark"; 4]);
        assert_eq!(mosaic.distinct_tiles(), 1);
    }

    #[test]
    fn without_reuse_every_tile_is_distinct() {
        let db = CacheDb::in_memory().unwrap();
        let records: Vec<_> = (0..9u8)
            .map(|i| record(&format!("img{i}"), Rgb([i * 20, 0, 0])))
            .collect();
        let mut composer = MosaicComposer::new(catalog(records));
        let target = record("target", Rgb::BLACK);
        target.prime_grid(ColorGrid::new(3, vec![Rgb::BLACK; 9]).unwrap());

        let mosaic = composer.compose(&db, &target, 3, false).unwrap();
        assert_eq!(mosaic.distinct_tiles(), 9);
        // Earlier cells take the closest colors first.
        assert_eq!(mosaic.tiles()[0].fingerprint().as_str(), "img0");
        assert_eq!(mosaic.tiles()[8].fingerprint().as_str(), "img8");
    }

    #[test]
    fn too_small_catalog_without_reuse_fails_up_front() {
        let db = CacheDb::in_memory().unwrap();
        let records: Vec<_> = (0..9u8)
            .map(|i| record(&format!("img{i}"), Rgb([i, i, i])))
            .collect();
        let target = records[0].clone();
        let mut composer = MosaicComposer::new(catalog(records));

        let err = composer.compose(&db, &target, 4, false).unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientTiles {
                segments: 4,
                requested: 16,
                available: 9
            }
        ));
        assert!(matches!(
            composer.compose(&db, &target, 0, true),
            Err(EngineError::InvalidGridSize)
        ));
    }

    #[test]
    fn repeated_requests_share_one_assignment() {
        let db = CacheDb::in_memory().unwrap();
        let mut composer = MosaicComposer::new(catalog(four_colors()));
        let target = quadrant_target();

        let first = composer.compose(&db, &target, 2, false).unwrap();
        let second = composer.compose(&db, &target, 2, false).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(
            composer.stats(),
            ComposerStats {
                memory_hits: 1,
                store_hits: 0,
                computed: 1
            }
        );
    }

    #[test]
    fn stored_mosaic_is_served_to_a_fresh_composer() {
        let db = CacheDb::in_memory().unwrap();
        let records = four_colors();
        let target = quadrant_target();

        let mut first = MosaicComposer::new(catalog(records.clone()));
        let original = first.compose(&db, &target, 2, false).unwrap();

        // A target without a primed grid would need its file if recomputed.
        let bare_target = record("target", Rgb::BLACK);
        let mut second = MosaicComposer::new(catalog(records));
        let restored = second.compose(&db, &bare_target, 2, false).unwrap();
        assert_eq!(restored.fingerprints(), original.fingerprints());
        assert_eq!(second.stats().store_hits, 1);
        assert_eq!(second.stats().computed, 0);
    }

    #[test]
    fn inconsistent_stored_mosaic_is_recomputed() {
        let db = CacheDb::in_memory().unwrap();
        let mut composer = MosaicComposer::new(catalog(four_colors()));
        let target = quadrant_target();
        let key = composer.key_for(&target, 2, false);

        MosaicRow {
            key: key.clone(),
            tiles: vec![Fingerprint::from("black"), Fingerprint::from("ghost")],
            cached_at: Utc::now(),
        }
        .upsert(&db)
        .unwrap();

        let mosaic = composer.compose(&db, &target, 2, false).unwrap();
        assert_eq!(tile_names(&mosaic), ["black", "white", "red", "green"]);
        assert_eq!(composer.stats().computed, 1);

        let stored = MosaicRow::find(&db, &key).unwrap().unwrap();
        assert_eq!(stored.tiles, mosaic.fingerprints());
    }

    #[test]
    fn malformed_stored_mosaic_is_recomputed() {
        let db = CacheDb::in_memory().unwrap();
        let mut composer = MosaicComposer::new(catalog(four_colors()));
        let target = quadrant_target();
        let key = composer.key_for(&target, 2, true);

        db.conn()
            .execute_batch(&format!(
                "INSERT INTO mosaics (catalog_hash, target, segments, reuse, tiles_json, cached_at)
                 VALUES ('{}', '{}', 2, 1, 'not json', '2024-01-01T00:00:00Z')",
                key.catalog, key.target
            ))
            .unwrap();

        let mosaic = composer.compose(&db, &target, 2, true).unwrap();
        assert_eq!(tile_names(&mosaic), ["black", "white", "red", "green"]);
        assert_eq!(composer.stats().computed, 1);
    }
}
