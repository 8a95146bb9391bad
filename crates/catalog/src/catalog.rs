use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use core_types::{AspectRatio, Fingerprint};
use tracing::{debug, info, warn};

use crate::db::{CacheDb, ImageRow};
use crate::imaging::{catalog_identity, compute_fingerprint};
use crate::record::ImageRecord;
use crate::scanner::list_image_files;
use crate::{CatalogError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOptions {
    /// Descend into subfolders.
    pub recursive: bool,
}

/// What happened to each file seen during [`ImageCatalog::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub discovered: usize,
    pub cache_hits: usize,
    pub cache_misses: usize,
    /// Files whose content was already seen under another path.
    pub duplicates: Vec<PathBuf>,
    /// Files that could not be fingerprinted or decoded, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
    /// Readable images left out for not sharing the dominant aspect ratio.
    pub excluded: usize,
}

/// The working set of one folder: every record shares a single aspect ratio.
///
/// Built once per load and never mutated afterwards; records are handed out
/// as shared `Arc`s so mosaics can reference tiles without copying them.
#[derive(Debug)]
pub struct ImageCatalog {
    folder: PathBuf,
    ratio: AspectRatio,
    records: Vec<Arc<ImageRecord>>,
    index: HashMap<Fingerprint, usize>,
    identity: String,
}

impl ImageCatalog {
    /// Scans `folder`, reusing cached metadata by fingerprint and decoding
    /// only unseen content, then keeps the largest same-ratio group.
    pub fn load(folder: &Path, db: &CacheDb, options: LoadOptions) -> Result<(Self, LoadReport)> {
        let files = list_image_files(folder, options.recursive)?;
        let mut report = LoadReport {
            discovered: files.len(),
            ..LoadReport::default()
        };
        info!("Loading {} image files from {}", files.len(), folder.display());

        let mut seen: HashMap<Fingerprint, PathBuf> = HashMap::new();
        let mut records = Vec::with_capacity(files.len());
        for (i, path) in files.iter().enumerate() {
            debug!(" {}/{} {}", i + 1, files.len(), path.display());
            let fingerprint = match compute_fingerprint(path) {
                Ok(fingerprint) => fingerprint,
                Err(err) => {
                    warn!("Skipping {}: {err}", path.display());
                    report.skipped.push((path.clone(), err.to_string()));
                    continue;
                }
            };
            if let Some(first) = seen.get(&fingerprint) {
                debug!(
                    "{} has the same content as {}",
                    path.display(),
                    first.display()
                );
                report.duplicates.push(path.clone());
                continue;
            }

            match load_record(path, fingerprint.clone(), db, &mut report) {
                Ok(record) => {
                    seen.insert(fingerprint, path.clone());
                    records.push(Arc::new(record));
                }
                Err(err @ CatalogError::Decode { .. })
                | Err(err @ CatalogError::InvalidDimensions { .. }) => {
                    warn!("Skipping {}: {err}", path.display());
                    report.skipped.push((path.clone(), err.to_string()));
                }
                Err(err) => return Err(err),
            }
        }

        let readable = records.len();
        let catalog = Self::from_records(folder, records)?;
        report.excluded = readable - catalog.len();
        info!(
            "Catalog for {}: {} images at {} ({} hits, {} misses, {} excluded, {} skipped)",
            folder.display(),
            catalog.len(),
            catalog.ratio,
            report.cache_hits,
            report.cache_misses,
            report.excluded,
            report.skipped.len()
        );
        Ok((catalog, report))
    }

    /// Builds a catalog from already analyzed records.
    ///
    /// Records are grouped by aspect ratio and only the largest group is kept;
    /// on a tie the group whose first member comes earliest wins. Later
    /// records repeating a fingerprint are dropped.
    pub fn from_records(folder: &Path, records: Vec<Arc<ImageRecord>>) -> Result<Self> {
        let mut groups: Vec<(AspectRatio, Vec<Arc<ImageRecord>>)> = Vec::new();
        let mut seen: HashSet<Fingerprint> = HashSet::new();
        for record in records {
            if !seen.insert(record.fingerprint().clone()) {
                continue;
            }
            match groups.iter_mut().find(|(ratio, _)| *ratio == record.ratio()) {
                Some((_, members)) => members.push(record),
                None => groups.push((record.ratio(), vec![record])),
            }
        }

        let mut best: Option<(AspectRatio, Vec<Arc<ImageRecord>>)> = None;
        for (ratio, members) in groups {
            let larger = best
                .as_ref()
                .map(|(_, current)| members.len() > current.len())
                .unwrap_or(true);
            if larger {
                best = Some((ratio, members));
            }
        }

        let Some((ratio, records)) = best else {
            return Err(CatalogError::EmptyCatalog {
                folder: folder.to_path_buf(),
            });
        };

        let index = records
            .iter()
            .enumerate()
            .map(|(i, record)| (record.fingerprint().clone(), i))
            .collect();
        let identity = catalog_identity(records.iter().map(|r| r.fingerprint()));

        Ok(Self {
            folder: folder.to_path_buf(),
            ratio,
            records,
            index,
            identity,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// The aspect ratio every record in the catalog shares.
    pub fn ratio(&self) -> AspectRatio {
        self.ratio
    }

    /// Hash over the catalog's fingerprints; part of every composition key.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Records in scan order.
    pub fn records(&self) -> &[Arc<ImageRecord>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<&Arc<ImageRecord>> {
        self.index_of(fingerprint).and_then(|i| self.records.get(i))
    }

    pub fn index_of(&self, fingerprint: &Fingerprint) -> Option<usize> {
        self.index.get(fingerprint).copied()
    }

    pub fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.index.contains_key(fingerprint)
    }
}

fn load_record(
    path: &Path,
    fingerprint: Fingerprint,
    db: &CacheDb,
    report: &mut LoadReport,
) -> Result<ImageRecord> {
    match ImageRow::find(db, &fingerprint) {
        Ok(Some(row)) => match ImageRecord::from_row(&row, path) {
            Ok(record) => {
                report.cache_hits += 1;
                let current = path.to_string_lossy();
                if row.file_path != current {
                    debug!("{} moved from {}", current, row.file_path);
                    if let Err(err) = ImageRow::update_path(db, &fingerprint, &current) {
                        warn!("Could not refresh cached path for {fingerprint}: {err:#}");
                    }
                }
                return Ok(record);
            }
            Err(err) => warn!("Discarding unusable cache entry for {fingerprint}: {err}"),
        },
        Ok(None) => {}
        Err(err) => warn!("Discarding unreadable cache entry for {fingerprint}: {err:#}"),
    }

    let record = ImageRecord::analyze(path, fingerprint)?;
    record.to_row().upsert(db)?;
    report.cache_misses += 1;
    Ok(record)
}
