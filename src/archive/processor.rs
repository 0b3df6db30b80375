use super::extractor::{is_archive, ArchiveExtractor};
use crate::catalog_store::ContentKind;
use crate::identification::{extract_name_from_filename, FileIdentifier, FilenameIdentifier};
use crate::organizer::{organized_dir, resolve_title_name, sanitize_name, FilePlacer, PlaceOutcome};
use crate::scan::DEFAULT_GAME_EXTENSIONS;
use crate::titledb::TitleSource;
use serde::Serialize;
use std::collections::VecDeque;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessOptions {
    pub extract: bool,
    pub organize: bool,
    pub use_hardlinks: bool,
    /// Delete extracted source archives and sweep empty source directories once
    /// at least one file was organized.
    pub cleanup_after: bool,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            extract: true,
            organize: true,
            use_hardlinks: true,
            cleanup_after: false,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub outcome: PlaceOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessFailure {
    pub path: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ProcessReport {
    pub files_organized: usize,
    pub archives_extracted: usize,
    pub archives_deleted: usize,
    pub processed: Vec<ProcessedFile>,
    pub errors: Vec<ProcessFailure>,
}

impl ProcessReport {
    fn fail(&mut self, path: &Path, error: impl ToString) {
        let error = error.to_string();
        warn!("Processing {:?} failed: {}", path, error);
        self.errors.push(ProcessFailure {
            path: path.to_path_buf(),
            error,
        });
    }
}

/// Temporary extraction directories of one processing run. Every directory is
/// removed when the workspace is dropped, whatever path the run took.
struct ExtractionWorkspace {
    root: Option<PathBuf>,
    dirs: Vec<TempDir>,
}

impl ExtractionWorkspace {
    fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            dirs: Vec::new(),
        }
    }

    fn create(&mut self) -> io::Result<PathBuf> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("gameshelf-extract-");
        let dir = match &self.root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        let path = dir.path().to_path_buf();
        self.dirs.push(dir);
        Ok(path)
    }
}

impl Drop for ExtractionWorkspace {
    fn drop(&mut self) {
        for dir in self.dirs.drain(..) {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                error!("Failed to remove extraction directory {:?}: {}", path, e);
            }
        }
    }
}

/// Turns a finished download into organized library files.
pub struct ArchiveProcessor {
    extractor: ArchiveExtractor,
    titles: Arc<dyn TitleSource>,
    identifier: FilenameIdentifier,
    extensions: Vec<String>,
    temp_root: Option<PathBuf>,
}

impl ArchiveProcessor {
    pub fn new(extractor: ArchiveExtractor, titles: Arc<dyn TitleSource>) -> Self {
        Self {
            extractor,
            titles,
            identifier: FilenameIdentifier::new(),
            extensions: DEFAULT_GAME_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            temp_root: None,
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions;
        self
    }

    /// Create extraction directories under `root` instead of the system temp dir.
    pub fn with_temp_root(mut self, root: PathBuf) -> Self {
        self.temp_root = Some(root);
        self
    }

    fn is_game_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|known| *known == ext))
    }

    /// Extract, organize into `target_root` and optionally clean up `source`,
    /// which may be a single file or a directory tree.
    pub fn process_source(
        &self,
        source: &Path,
        target_root: &Path,
        options: &ProcessOptions,
    ) -> ProcessReport {
        let mut report = ProcessReport::default();
        if !source.exists() {
            report.fail(source, "Source not found");
            return report;
        }

        let mut workspace = ExtractionWorkspace::new(self.temp_root.clone());
        let mut game_files = Vec::new();
        let mut pending: VecDeque<PathBuf> = VecDeque::new();
        let mut extracted_sources = Vec::new();

        for file in walk_files(source) {
            if options.extract && is_archive(&file) {
                pending.push_back(file);
            } else if self.is_game_file(&file) {
                game_files.push(file);
            }
        }

        while let Some(archive) = pending.pop_front() {
            let dest = match workspace.create() {
                Ok(dest) => dest,
                Err(e) => {
                    report.fail(&archive, format!("Could not create temp directory: {}", e));
                    continue;
                }
            };
            if let Err(e) = self.extractor.extract(&archive, &dest) {
                report.fail(&archive, e);
                continue;
            }
            info!("Extracted {:?}", archive);
            report.archives_extracted += 1;
            if archive.starts_with(source) {
                extracted_sources.push(archive);
            }

            for file in walk_files(&dest) {
                if is_archive(&file) {
                    pending.push_back(file);
                } else if self.is_game_file(&file) {
                    game_files.push(file);
                }
            }
        }

        if options.organize {
            let placer = FilePlacer::new(options.use_hardlinks);
            for file in &game_files {
                let destination = match self.placement_target(file, target_root) {
                    Some(destination) => destination,
                    None => {
                        report.fail(file, "Could not determine game name");
                        continue;
                    }
                };
                match placer.place(file, &destination) {
                    Ok(outcome) => {
                        debug!("Placed {:?} at {:?} ({:?})", file, destination, outcome);
                        report.files_organized += 1;
                        report.processed.push(ProcessedFile {
                            source: file.clone(),
                            destination,
                            outcome,
                        });
                    }
                    Err(e) => report.fail(file, e),
                }
            }
        }

        if options.cleanup_after && report.files_organized > 0 {
            for archive in &extracted_sources {
                match fs::remove_file(archive) {
                    Ok(()) => report.archives_deleted += 1,
                    Err(e) => report.fail(archive, format!("Could not delete archive: {}", e)),
                }
            }
            if source.is_dir() {
                sweep_empty_dirs(source);
            }
        }

        drop(workspace);
        info!(
            "Processed {:?}: {} organized, {} archives extracted, {} deleted, {} errors",
            source,
            report.files_organized,
            report.archives_extracted,
            report.archives_deleted,
            report.errors.len()
        );
        report
    }

    /// `<target>/<Title>/<BASE|UPDATES|DLC>/<original filename>`
    fn placement_target(&self, file: &Path, target_root: &Path) -> Option<PathBuf> {
        let filename = file.file_name()?.to_string_lossy().to_string();
        let (kind, name) = match self.identifier.identify(file, None) {
            Ok(identity) => (
                identity.kind,
                resolve_title_name(self.titles.as_ref(), &identity, &filename),
            ),
            Err(_) => (
                ContentKind::Base,
                extract_name_from_filename(&filename)
                    .map(|name| sanitize_name(&name))
                    .filter(|name| !name.is_empty()),
            ),
        };
        Some(organized_dir(target_root, &name?, kind).join(filename))
    }
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Error walking {:?}: {}", root, e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

/// Remove empty directories below `root`, children before parents.
fn sweep_empty_dirs(root: &Path) {
    for entry in WalkDir::new(root)
        .min_depth(1)
        .contents_first(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_dir())
    {
        let is_empty = fs::read_dir(entry.path())
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if is_empty {
            match fs::remove_dir(entry.path()) {
                Ok(()) => debug!("Removed empty directory {:?}", entry.path()),
                Err(e) => warn!("Could not remove {:?}: {}", entry.path(), e),
            }
        }
    }
}
