use std::path::Path;
use std::sync::Arc;

use app_settings::MosaicSettings;
use catalog::db::CacheMetadata;
use catalog::{CacheDb, ImageCatalog, ImageRecord, LoadOptions, LoadReport};
use tracing::{info, warn};

use crate::compose::{ComposerStats, MosaicComposer};
use crate::graph::TransitionGraph;
use crate::mosaic::MosaicAssignment;
use crate::sequence::SequencePlanner;
use crate::{EngineError, Result};

/// One step of the presentation: `from` was on screen and sits inside the
/// mosaic of `to` at `anchor` (column, row).
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: Arc<ImageRecord>,
    pub to: Arc<ImageRecord>,
    pub mosaic: Arc<MosaicAssignment>,
    pub anchor: (u32, u32),
}

/// Everything a presentation layer needs: one cache store, one catalog and
/// the endless image sequence over it.
///
/// The transition graph and planner are built on the first request for the
/// next image, using the session's grid size and reuse setting.
pub struct MosaicSession {
    db: CacheDb,
    settings: MosaicSettings,
    composer: Option<MosaicComposer>,
    planner: Option<SequencePlanner>,
    shown: Option<Arc<ImageRecord>>,
    persist_settings: bool,
}

impl MosaicSession {
    /// Opens the cache at the location the settings resolve to.
    pub fn open(settings: MosaicSettings) -> Result<Self> {
        let path = settings.resolved_cache_path()?;
        let db = CacheDb::open(&path)?;
        CacheMetadata::update_last_opened(&db)?;
        let metadata = CacheMetadata::load_singleton(&db)?;
        info!(
            "Opened mosaic cache at {} (schema v{}, created {})",
            path.display(),
            metadata.schema_version,
            metadata.created_at
        );
        Ok(Self::with_store(db, settings))
    }

    /// Like [`open`](Self::open) with the user's saved settings, falling
    /// back to defaults when they cannot be read. Each loaded folder is saved
    /// back as the last folder.
    pub fn open_default() -> Result<Self> {
        let settings = MosaicSettings::load().unwrap_or_else(|err| {
            warn!("Using default settings: {err}");
            MosaicSettings::default()
        });
        let mut session = Self::open(settings)?;
        session.persist_settings = true;
        Ok(session)
    }

    pub fn with_store(db: CacheDb, settings: MosaicSettings) -> Self {
        Self {
            db,
            settings,
            composer: None,
            planner: None,
            shown: None,
            persist_settings: false,
        }
    }

    pub fn settings(&self) -> &MosaicSettings {
        &self.settings
    }

    pub fn store(&self) -> &CacheDb {
        &self.db
    }

    /// Replaces the current catalog with the contents of `folder` and starts
    /// a new sequence. The folder becomes the settings' last folder; it is
    /// written to disk only for sessions from [`open_default`](Self::open_default),
    /// otherwise the embedder saves [`settings`](Self::settings) itself.
    pub fn load_catalog(&mut self, folder: &Path) -> Result<LoadReport> {
        let options = LoadOptions {
            recursive: self.settings.recursive,
        };
        let (catalog, report) = ImageCatalog::load(folder, &self.db, options)?;
        self.composer = Some(MosaicComposer::new(Arc::new(catalog)));
        self.planner = None;
        self.shown = None;
        self.settings.set_last_folder(folder.to_path_buf());
        if self.persist_settings {
            if let Err(err) = self.settings.save() {
                warn!("Could not save last folder {}: {err}", folder.display());
            }
        }
        Ok(report)
    }

    /// Reloads the last folder recorded in the settings, if any.
    pub fn resume(&mut self) -> Result<Option<LoadReport>> {
        match self.settings.last_folder.clone() {
            Some(folder) => self.load_catalog(&folder).map(Some),
            None => Ok(None),
        }
    }

    pub fn catalog(&self) -> Result<&Arc<ImageCatalog>> {
        self.composer
            .as_ref()
            .map(MosaicComposer::catalog)
            .ok_or(EngineError::NoCatalog)
    }

    pub fn composer_stats(&self) -> Option<ComposerStats> {
        self.composer.as_ref().map(MosaicComposer::stats)
    }

    pub fn mosaic_for(
        &mut self,
        image: &ImageRecord,
        segments: u32,
        reuse: bool,
    ) -> Result<Arc<MosaicAssignment>> {
        let composer = self.composer.as_mut().ok_or(EngineError::NoCatalog)?;
        composer.compose(&self.db, image, segments, reuse)
    }

    pub fn next_image(&mut self) -> Result<Arc<ImageRecord>> {
        let image = self.planner()?.next_image();
        self.shown = Some(image.clone());
        Ok(image)
    }

    /// Advances the sequence by one image and reports where the image shown
    /// before it lies inside the new image's mosaic. On the first call the
    /// sequence advances twice.
    pub fn transition(&mut self) -> Result<Transition> {
        let from = match self.shown.clone() {
            Some(image) => image,
            None => self.next_image()?,
        };
        let to = self.next_image()?;
        let (segments, reuse) = (self.settings.segments, self.settings.reuse);
        let mosaic = self.mosaic_for(&to, segments, reuse)?;
        let anchor = mosaic
            .locate(from.fingerprint())
            .ok_or_else(|| EngineError::TileNotInMosaic {
                tile: from.fingerprint().clone(),
                target: to.fingerprint().clone(),
            })?;
        Ok(Transition {
            from,
            to,
            mosaic,
            anchor,
        })
    }

    /// Starts the sequence over with cleared visit counters.
    pub fn restart(&mut self) {
        if let Some(planner) = self.planner.as_mut() {
            planner.reset();
        }
        self.shown = None;
    }

    /// Drops composed mosaics and transition graphs from memory and from the
    /// store. Per-image metadata and color grids are kept.
    pub fn clear_derived(&mut self) -> Result<()> {
        self.db.clear_derived()?;
        if let Some(composer) = self.composer.as_mut() {
            composer.forget();
        }
        self.planner = None;
        self.shown = None;
        Ok(())
    }

    /// Flushes the cache store and ends the session.
    pub fn close(self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn planner(&mut self) -> Result<&mut SequencePlanner> {
        if self.planner.is_none() {
            let composer = self.composer.as_mut().ok_or(EngineError::NoCatalog)?;
            let graph = TransitionGraph::build(
                composer,
                &self.db,
                self.settings.segments,
                self.settings.reuse,
            )?;
            self.planner = Some(SequencePlanner::new(graph.reduce_to_core()?));
        }
        self.planner.as_mut().ok_or(EngineError::NoCatalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_without_a_catalog_fail() {
        let mut session = MosaicSession::with_store(
            CacheDb::in_memory().unwrap(),
            MosaicSettings::default(),
        );
        assert!(matches!(session.next_image(), Err(EngineError::NoCatalog)));
        assert!(matches!(session.transition(), Err(EngineError::NoCatalog)));
        assert!(matches!(session.catalog(), Err(EngineError::NoCatalog)));
        assert!(session.composer_stats().is_none());
    }

    #[test]
    fn missing_folder_is_reported() {
        let mut session = MosaicSession::with_store(
            CacheDb::in_memory().unwrap(),
            MosaicSettings::default(),
        );
        let err = session
            .load_catalog(Path::new("/definitely/not/here"))
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Catalog(catalog::CatalogError::FolderNotFound(_))
        ));
    }
}
