use super::gate::ScanGate;
use crate::catalog_store::{CatalogStore, CatalogWriter, IdentificationMode, NewCatalogEntry};
use crate::identification::{FileIdentifier, Keystore};
use crate::watch::RefreshHook;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

pub const DEFAULT_GAME_EXTENSIONS: &[&str] = &["nsp", "nsz", "xci", "xcz"];

#[derive(Debug, Clone, Serialize)]
pub struct IdentifyFailure {
    pub path: PathBuf,
    pub error: String,
}

/// Totals for one or more scanned roots.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ScanReport {
    pub roots_scanned: usize,
    pub files_found: usize,
    pub skipped: usize,
    pub identified: usize,
    pub failed: Vec<IdentifyFailure>,
    pub duration_ms: u64,
}

impl ScanReport {
    fn absorb(&mut self, other: ScanReport) {
        self.roots_scanned += other.roots_scanned;
        self.files_found += other.files_found;
        self.skipped += other.skipped;
        self.identified += other.identified;
        self.failed.extend(other.failed);
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScanOutcome {
    Completed(ScanReport),
    AlreadyInProgress,
}

/// Walks library roots and records every newly identified game file.
pub struct ScanCoordinator {
    writer: Arc<CatalogWriter>,
    filename_identifier: Arc<dyn FileIdentifier>,
    content_identifier: Option<Arc<dyn FileIdentifier>>,
    keystore: RwLock<Option<Keystore>>,
    libraries: Vec<PathBuf>,
    extensions: Vec<String>,
    gate: ScanGate,
    refresh: Arc<dyn RefreshHook>,
}

impl ScanCoordinator {
    pub fn new(
        writer: Arc<CatalogWriter>,
        filename_identifier: Arc<dyn FileIdentifier>,
        libraries: Vec<PathBuf>,
        refresh: Arc<dyn RefreshHook>,
    ) -> Self {
        Self {
            writer,
            filename_identifier,
            content_identifier: None,
            keystore: RwLock::new(None),
            libraries,
            extensions: DEFAULT_GAME_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
            gate: ScanGate::new(),
            refresh,
        }
    }

    /// Identifier used when a valid keystore is loaded.
    pub fn with_content_identifier(mut self, identifier: Arc<dyn FileIdentifier>) -> Self {
        self.content_identifier = Some(identifier);
        self
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn set_keystore(&self, keystore: Option<Keystore>) {
        *self.keystore.write().unwrap_or_else(PoisonError::into_inner) = keystore;
    }

    pub fn libraries(&self) -> &[PathBuf] {
        &self.libraries
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn is_scanning(&self) -> bool {
        self.gate.is_scanning()
    }

    /// Content mode needs both a valid keystore and a container identifier.
    pub fn current_mode(&self) -> IdentificationMode {
        let keys_valid = self
            .keystore
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Keystore::is_valid);
        if keys_valid && self.content_identifier.is_some() {
            IdentificationMode::Content
        } else {
            IdentificationMode::Filename
        }
    }

    pub fn is_game_file(&self, path: &Path) -> bool {
        path.extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| self.extensions.iter().any(|known| *known == ext))
    }

    /// Scan every configured library root, then request a single refresh.
    pub fn scan_all(&self) -> ScanOutcome {
        let Some(_permit) = self.gate.try_begin() else {
            info!("Scan requested while another scan is running, ignoring");
            return ScanOutcome::AlreadyInProgress;
        };
        let started = Instant::now();

        let mut report = ScanReport::default();
        for root in &self.libraries {
            report.absorb(self.scan_root(root));
        }
        report.duration_ms = started.elapsed().as_millis() as u64;

        info!(
            "Scanned {} libraries in {}ms: {} found, {} identified, {} skipped, {} failed",
            report.roots_scanned,
            report.duration_ms,
            report.files_found,
            report.identified,
            report.skipped,
            report.failed.len()
        );
        self.refresh.request_refresh();
        ScanOutcome::Completed(report)
    }

    pub fn scan_path(&self, root: &Path) -> ScanOutcome {
        let Some(_permit) = self.gate.try_begin() else {
            info!("Scan of {:?} requested while another scan is running, ignoring", root);
            return ScanOutcome::AlreadyInProgress;
        };
        let started = Instant::now();
        let mut report = self.scan_root(root);
        report.duration_ms = started.elapsed().as_millis() as u64;
        self.refresh.request_refresh();
        ScanOutcome::Completed(report)
    }

    fn scan_root(&self, root: &Path) -> ScanReport {
        if !root.is_dir() {
            warn!("Library path {:?} does not exist or is not a directory, skipping", root);
            return ScanReport::default();
        }

        let files = self.list_game_files(root);
        let guard = self.writer.lock();
        let mut report = self.identify_files(&*guard, root, &files);
        report.roots_scanned = 1;
        report
    }

    /// Game files under `root`, in a stable walk order.
    pub fn list_game_files(&self, root: &Path) -> Vec<PathBuf> {
        WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Error walking {:?}: {}", root, e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.is_game_file(entry.path()))
            .map(|entry| entry.into_path())
            .collect()
    }

    /// Identify `files` under library `root` and upsert them into `catalog`.
    ///
    /// Files already identified under the current mode are skipped. Failures are
    /// logged and collected; they never abort the batch. Callers hold the writer lock.
    pub fn identify_files(
        &self,
        catalog: &dyn CatalogStore,
        root: &Path,
        files: &[PathBuf],
    ) -> ScanReport {
        let mode = self.current_mode();
        let mut report = ScanReport {
            files_found: files.len(),
            ..Default::default()
        };

        let already_identified: HashSet<PathBuf> = match catalog.identified_paths(mode) {
            Ok(paths) => paths.into_iter().collect(),
            Err(e) => {
                warn!("Could not load identified paths, identifying everything: {:#}", e);
                HashSet::new()
            }
        };

        if mode == IdentificationMode::Filename && self.content_identifier.is_some() {
            warn!("Invalid or missing keystore, identification falls back to filenames only");
        }

        let keystore = self.keystore.read().unwrap_or_else(PoisonError::into_inner);
        for path in files {
            if path.to_str().is_none() {
                warn!("Skipping {:?}: path is not valid UTF-8", path);
                report.failed.push(IdentifyFailure {
                    path: path.clone(),
                    error: "Path is not valid UTF-8".to_string(),
                });
                continue;
            }
            if already_identified.contains(path) {
                report.skipped += 1;
                continue;
            }
            match self.identify_and_record(catalog, root, path, mode, keystore.as_ref()) {
                Ok(()) => report.identified += 1,
                Err(error) => {
                    warn!("Failed to identify {:?}: {}", path, error);
                    report.failed.push(IdentifyFailure {
                        path: path.clone(),
                        error,
                    });
                }
            }
        }
        debug!(
            "Identified {} of {} files under {:?}",
            report.identified,
            files.len(),
            root
        );
        report
    }

    /// Identify one file even if it is already catalogued under the current mode.
    pub fn reidentify(
        &self,
        catalog: &dyn CatalogStore,
        root: &Path,
        path: &Path,
    ) -> Result<(), String> {
        let mode = self.current_mode();
        let keystore = self.keystore.read().unwrap_or_else(PoisonError::into_inner);
        self.identify_and_record(catalog, root, path, mode, keystore.as_ref())
    }

    fn identify_and_record(
        &self,
        catalog: &dyn CatalogStore,
        root: &Path,
        path: &Path,
        mode: IdentificationMode,
        keystore: Option<&Keystore>,
    ) -> Result<(), String> {
        let identifier = match (mode, &self.content_identifier) {
            (IdentificationMode::Content, Some(content)) => content,
            _ => &self.filename_identifier,
        };
        let identity = identifier
            .identify(path, keystore)
            .map_err(|e| e.to_string())?;
        let size = std::fs::metadata(path).map_err(|e| e.to_string())?.len();

        catalog
            .upsert(&NewCatalogEntry {
                filepath: path.to_path_buf(),
                library: root.to_path_buf(),
                identity,
                size,
                identification: mode,
            })
            .map_err(|e| format!("{:#}", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{ContentKind, SqliteCatalogStore, TitleIdentity};
    use crate::identification::{FilenameIdentifier, IdentifyError};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingRefresh(AtomicUsize);

    impl RefreshHook for CountingRefresh {
        fn request_refresh(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FixedIdentifier;

    impl FileIdentifier for FixedIdentifier {
        fn identify(
            &self,
            _path: &Path,
            keystore: Option<&Keystore>,
        ) -> Result<TitleIdentity, IdentifyError> {
            assert!(keystore.is_some());
            Ok(TitleIdentity {
                title_id: "0100000000010000".to_string(),
                app_id: "0100000000010000".to_string(),
                kind: ContentKind::Base,
                version: 0,
            })
        }
    }

    struct Fixture {
        dir: TempDir,
        writer: Arc<CatalogWriter>,
        refresh: Arc<CountingRefresh>,
        coordinator: ScanCoordinator,
    }

    fn fixture(libraries: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let roots: Vec<PathBuf> = (0..libraries)
            .map(|i| {
                let root = dir.path().join(format!("lib{}", i));
                fs::create_dir_all(&root).unwrap();
                root
            })
            .collect();
        let writer = Arc::new(CatalogWriter::new(Arc::new(
            SqliteCatalogStore::in_memory().unwrap(),
        )));
        let refresh = Arc::new(CountingRefresh::default());
        let coordinator = ScanCoordinator::new(
            writer.clone(),
            Arc::new(FilenameIdentifier::new()),
            roots,
            refresh.clone(),
        );
        Fixture {
            dir,
            writer,
            refresh,
            coordinator,
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"data").unwrap();
    }

    #[test]
    fn test_scan_all_identifies_and_refreshes_once() {
        let f = fixture(2);
        touch(&f.dir.path().join("lib0/Game [0100000000010000][v0].nsp"));
        touch(&f.dir.path().join("lib0/sub/Game [0100000000010800][v65536].NSZ"));
        touch(&f.dir.path().join("lib1/Other [0100000000020000][v0].xci"));
        touch(&f.dir.path().join("lib1/readme.txt"));
        touch(&f.dir.path().join("lib1/no id.nsp"));

        let ScanOutcome::Completed(report) = f.coordinator.scan_all() else {
            panic!("scan should run");
        };
        assert_eq!(report.roots_scanned, 2);
        assert_eq!(report.files_found, 4);
        assert_eq!(report.identified, 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 1);
        assert_eq!(f.writer.reader().count().unwrap(), 3);

        let entry = f
            .writer
            .reader()
            .get_by_path(&f.dir.path().join("lib0/sub/Game [0100000000010800][v65536].NSZ"))
            .unwrap()
            .unwrap();
        assert_eq!(entry.library, f.dir.path().join("lib0"));
        assert_eq!(entry.version(), Some(65536));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_non_utf8_paths_are_reported_not_stored() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let f = fixture(1);
        touch(&f.dir.path().join("lib0/Game [0100000000010000][v0].nsp"));
        let bad = f
            .dir
            .path()
            .join("lib0")
            .join(OsStr::from_bytes(b"Bad\xff [0100000000020000][v0].nsp"));
        touch(&bad);

        let ScanOutcome::Completed(report) = f.coordinator.scan_all() else {
            panic!("scan should run");
        };
        assert_eq!(report.identified, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, bad);
        assert!(report.failed[0].error.contains("UTF-8"));
        assert_eq!(f.writer.reader().count().unwrap(), 1);
        assert!(f.writer.reader().get_by_path(&bad).is_err());
    }

    #[test]
    fn test_rescan_skips_identified_files() {
        let f = fixture(1);
        touch(&f.dir.path().join("lib0/Game [0100000000010000][v0].nsp"));
        f.coordinator.scan_all();

        let ScanOutcome::Completed(report) = f.coordinator.scan_all() else {
            panic!("scan should run");
        };
        assert_eq!(report.skipped, 1);
        assert_eq!(report.identified, 0);
    }

    #[test]
    fn test_scan_rejected_while_in_progress() {
        let f = fixture(1);
        let permit = f.coordinator.gate.try_begin().unwrap();

        assert!(matches!(
            f.coordinator.scan_all(),
            ScanOutcome::AlreadyInProgress
        ));
        assert!(matches!(
            f.coordinator.scan_path(&f.dir.path().join("lib0")),
            ScanOutcome::AlreadyInProgress
        ));
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 0);

        drop(permit);
        assert!(matches!(
            f.coordinator.scan_all(),
            ScanOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let f = fixture(1);
        let ScanOutcome::Completed(report) = f.coordinator.scan_path(&f.dir.path().join("nope"))
        else {
            panic!("scan should run");
        };
        assert_eq!(report.roots_scanned, 0);
        assert!(!f.coordinator.is_scanning());
    }

    #[test]
    fn test_valid_keystore_switches_to_content_mode_and_reidentifies() {
        let f = fixture(1);
        touch(&f.dir.path().join("lib0/Game [0100000000010000][v0].nsp"));
        f.coordinator.scan_all();

        let coordinator = ScanCoordinator::new(
            f.writer.clone(),
            Arc::new(FilenameIdentifier::new()),
            vec![f.dir.path().join("lib0")],
            f.refresh.clone(),
        )
        .with_content_identifier(Arc::new(FixedIdentifier));
        assert_eq!(coordinator.current_mode(), IdentificationMode::Filename);

        coordinator.set_keystore(Some(Keystore::parse("header_key = 00ff\n")));
        assert_eq!(coordinator.current_mode(), IdentificationMode::Content);

        let ScanOutcome::Completed(report) = coordinator.scan_all() else {
            panic!("scan should run");
        };
        assert_eq!(report.identified, 1);
        assert_eq!(report.skipped, 0);

        let all = f.writer.reader().list_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].identification, IdentificationMode::Content);
    }
}
