//! The assembled library engine.
//!
//! Owns the catalog writer and every component built on it, and exposes the scan,
//! view, dedup, organize and download-processing operations callers use.

use crate::archive::{ArchiveExtractor, ArchiveProcessor, ProcessReport};
use crate::catalog_store::{CatalogStore, CatalogWriter, SqliteCatalogStore};
use crate::config::{AppConfig, OrganizeSettings, ProcessingSettings};
use crate::dedupe::{self, DeleteReport, DuplicateDetector, DuplicateFilter, DuplicateRecord};
use crate::identification::{FileIdentifier, FilenameIdentifier, Keystore};
use crate::library_view::{
    missing_content, LibraryViewEntry, LibraryViewGenerator, MissingContentReport, ViewCache,
};
use crate::organizer::{ApplyReport, OrganizationChange, OrganizePreview, Organizer};
use crate::scan::{ScanCoordinator, ScanOutcome, DEFAULT_GAME_EXTENSIONS};
use crate::titledb::{InMemoryTitleSource, JsonTitleSource, TitleSource};
use crate::watch::{BatchReport, ChangeAggregator, Clock, Debouncer, SystemClock, WatchEvent};
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct EngineSettings {
    pub libraries: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub debounce: Duration,
    pub processing: ProcessingSettings,
    pub organize: OrganizeSettings,
    /// Reads identity from container metadata when a valid keystore is loaded.
    pub content_identifier: Option<Arc<dyn FileIdentifier>>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            libraries: Vec::new(),
            extensions: DEFAULT_GAME_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            debounce: Duration::from_secs(crate::config::DEFAULT_DEBOUNCE_SECS),
            processing: ProcessingSettings::default(),
            organize: OrganizeSettings::default(),
            content_identifier: None,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            libraries: config.library_paths.clone(),
            extensions: config.game_extensions.clone(),
            debounce: config.debounce_window(),
            processing: config.processing.clone(),
            organize: config.organize.clone(),
            content_identifier: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadReport {
    pub target: PathBuf,
    pub process: ProcessReport,
    /// Scan of the target library, run when any file was placed there.
    pub scan: Option<ScanOutcome>,
}

pub struct LibraryEngine {
    writer: Arc<CatalogWriter>,
    titles: Arc<dyn TitleSource>,
    coordinator: Arc<ScanCoordinator>,
    aggregator: ChangeAggregator,
    debouncer: Arc<Debouncer>,
    generator: Arc<LibraryViewGenerator>,
    view_cache: Arc<ViewCache>,
    organizer: Organizer,
    processor: ArchiveProcessor,
    settings: EngineSettings,
}

impl LibraryEngine {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        titles: Arc<dyn TitleSource>,
        settings: EngineSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let writer = Arc::new(CatalogWriter::new(store));
        let generator = Arc::new(LibraryViewGenerator::new(titles.clone()));
        let view_cache = Arc::new(ViewCache::new());

        let debouncer = {
            let writer = writer.clone();
            let generator = generator.clone();
            let view_cache = view_cache.clone();
            Arc::new(Debouncer::new(settings.debounce, clock, move || {
                refresh_library(&writer, &generator, &view_cache)
            }))
        };

        let mut coordinator = ScanCoordinator::new(
            writer.clone(),
            Arc::new(FilenameIdentifier::new()),
            settings.libraries.clone(),
            debouncer.clone(),
        )
        .with_extensions(settings.extensions.clone());
        if let Some(identifier) = &settings.content_identifier {
            coordinator = coordinator.with_content_identifier(identifier.clone());
        }
        let coordinator = Arc::new(coordinator);

        let aggregator = ChangeAggregator::new(writer.clone(), coordinator.clone(), debouncer.clone());
        let organizer = Organizer::new(writer.clone(), titles.clone());
        let processor = ArchiveProcessor::new(
            ArchiveExtractor::new(settings.processing.extract_passwords.clone()),
            titles.clone(),
        )
        .with_extensions(settings.extensions.clone());

        Self {
            writer,
            titles,
            coordinator,
            aggregator,
            debouncer,
            generator,
            view_cache,
            organizer,
            processor,
            settings,
        }
    }

    /// Open the catalog database, reference metadata and keystore named by `config`.
    pub fn open(config: &AppConfig) -> Result<Self> {
        let db_path = config.library_db_path();
        if !db_path.exists() {
            info!("Creating new library database at {:?}", db_path);
        }
        let store = Arc::new(SqliteCatalogStore::new(&db_path)?);

        let titles: Arc<dyn TitleSource> = match &config.titledb_path {
            Some(path) => Arc::new(JsonTitleSource::load(path)?),
            None => {
                warn!("No titledb configured, names come from filenames only");
                Arc::new(InMemoryTitleSource::new())
            }
        };

        let engine = Self::new(
            store,
            titles,
            EngineSettings::from_config(config),
            Arc::new(SystemClock),
        );

        if let Some(keys_file) = &config.keys_file {
            match Keystore::load(keys_file) {
                Ok(keystore) => {
                    if !keystore.is_valid() {
                        warn!("Keystore {:?} is incomplete or malformed", keys_file);
                    }
                    engine.coordinator.set_keystore(Some(keystore));
                }
                Err(e) => warn!("Could not load keystore: {:#}", e),
            }
        }
        Ok(engine)
    }

    pub fn libraries(&self) -> &[PathBuf] {
        &self.settings.libraries
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn catalog(&self) -> Arc<dyn CatalogStore> {
        self.writer.reader()
    }

    pub fn coordinator(&self) -> &Arc<ScanCoordinator> {
        &self.coordinator
    }

    /// The debounced refresh, for hosts that drive it with
    /// [`spawn_debounce_loop`](crate::watch::spawn_debounce_loop).
    pub fn debouncer(&self) -> &Arc<Debouncer> {
        &self.debouncer
    }

    pub fn set_keystore(&self, keystore: Option<Keystore>) {
        self.coordinator.set_keystore(keystore);
    }

    // =========================================================================
    // Scanning and change tracking
    // =========================================================================

    pub fn scan_all(&self) -> ScanOutcome {
        self.coordinator.scan_all()
    }

    pub fn scan_path(&self, root: &Path) -> ScanOutcome {
        self.coordinator.scan_path(root)
    }

    pub fn apply_watch_batch(&self, events: Vec<WatchEvent>) -> BatchReport {
        self.aggregator.apply_batch(events)
    }

    /// Run a pending refresh now instead of waiting out the quiet window.
    pub fn flush_refresh(&self) -> bool {
        self.debouncer.flush()
    }

    // =========================================================================
    // Views
    // =========================================================================

    /// Current library view, regenerated only when the catalog changed since the
    /// last build.
    pub fn library(&self) -> Result<Arc<Vec<LibraryViewEntry>>> {
        let generation = self.writer.generation();
        if let Some(view) = self.view_cache.get(generation) {
            return Ok(view);
        }
        let view = self.generator.generate(self.writer.reader().as_ref())?;
        Ok(self.view_cache.store(generation, view))
    }

    pub fn missing(&self, roots: Option<&[PathBuf]>) -> Result<MissingContentReport> {
        let entries = self.writer.reader().list_all()?;
        Ok(missing_content(&entries, self.titles.as_ref(), roots))
    }

    // =========================================================================
    // Duplicates
    // =========================================================================

    pub fn find_duplicates(&self, filter: &DuplicateFilter) -> Result<Vec<DuplicateRecord>> {
        let entries = self.writer.reader().list_all()?;
        Ok(DuplicateDetector::new(self.titles.as_ref()).find(&entries, filter))
    }

    pub fn delete_duplicates(&self, records: &[DuplicateRecord], dry_run: bool) -> DeleteReport {
        let report = dedupe::delete_duplicates(&self.writer, records, dry_run);
        if !dry_run && !report.deleted.is_empty() {
            self.debouncer.trigger();
        }
        report
    }

    // =========================================================================
    // Organization
    // =========================================================================

    pub fn preview(&self, roots: Option<&[PathBuf]>, by_name: bool) -> Result<OrganizePreview> {
        self.organizer.preview(roots, by_name)
    }

    pub fn apply(
        &self,
        changes: &[OrganizationChange],
        dry_run: bool,
        remove_empty_folders: bool,
    ) -> ApplyReport {
        let report = self.organizer.apply(changes, dry_run, remove_empty_folders);
        if !dry_run && !report.success.is_empty() {
            self.debouncer.trigger();
        }
        report
    }

    // =========================================================================
    // Downloads
    // =========================================================================

    /// Extract and place a finished download into a library, then scan that library.
    /// Without `target_index` the configured target library is used.
    pub fn process_download(
        &self,
        source: &Path,
        target_index: Option<usize>,
    ) -> Result<DownloadReport> {
        let index = target_index.unwrap_or(self.settings.processing.target_library_index);
        let Some(target) = self.settings.libraries.get(index).cloned() else {
            bail!(
                "No library at index {} ({} configured)",
                index,
                self.settings.libraries.len()
            );
        };

        let options = self.settings.processing.process_options();
        let process = self.processor.process_source(source, &target, &options);
        let scan = (process.files_organized > 0).then(|| self.coordinator.scan_path(&target));

        Ok(DownloadReport {
            target,
            process,
            scan,
        })
    }
}

/// Drop rows whose files disappeared, then rebuild the cached view.
fn refresh_library(writer: &CatalogWriter, generator: &LibraryViewGenerator, cache: &ViewCache) {
    {
        let catalog = writer.lock();
        if let Err(e) = catalog.remove_missing_files() {
            error!("Failed to prune missing files: {:#}", e);
        }
    }

    let generation = writer.generation();
    match generator.generate(writer.reader().as_ref()) {
        Ok(view) => {
            let view = cache.store(generation, view);
            info!("Library view refreshed: {} entries", view.len());
        }
        Err(e) => {
            error!("Failed to regenerate library view: {:#}", e);
            cache.invalidate();
        }
    }
}
