//! Incremental catalog maintenance from filesystem watch batches.

use super::debounce::RefreshHook;
use super::events::WatchEvent;
use crate::catalog_store::{CatalogEntry, CatalogStore, CatalogWriter};
use crate::scan::{IdentifyFailure, ScanCoordinator};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default, Clone, Serialize)]
pub struct BatchReport {
    pub moved: usize,
    /// Moves whose source was unknown, handled as creations at the destination.
    pub promoted: usize,
    pub deleted: usize,
    pub modified: usize,
    pub identified: usize,
    pub failed: Vec<IdentifyFailure>,
}

pub struct ChangeAggregator {
    writer: Arc<CatalogWriter>,
    coordinator: Arc<ScanCoordinator>,
    refresh: Arc<dyn RefreshHook>,
}

impl ChangeAggregator {
    pub fn new(
        writer: Arc<CatalogWriter>,
        coordinator: Arc<ScanCoordinator>,
        refresh: Arc<dyn RefreshHook>,
    ) -> Self {
        Self {
            writer,
            coordinator,
            refresh,
        }
    }

    /// Apply one batch of events, then request a single refresh.
    ///
    /// Moves, deletions and modifications are applied in arrival order; creations
    /// (including moves from unknown sources) are identified last, grouped per
    /// library root in first-seen order.
    pub fn apply_batch(&self, events: Vec<WatchEvent>) -> BatchReport {
        let mut report = BatchReport::default();
        if events.is_empty() {
            return report;
        }

        let (mut created, others): (Vec<WatchEvent>, Vec<WatchEvent>) =
            events.into_iter().partition(WatchEvent::is_created);

        {
            let catalog = self.writer.lock();

            for event in others {
                match event {
                    WatchEvent::Moved { library, from, to } if to.is_dir() => {
                        let moved = repath_directory(&*catalog, &library, &from, &to);
                        if moved == 0 {
                            report.promoted += 1;
                        }
                        report.moved += moved;
                        // Catalogued files are skipped when the directory is expanded.
                        created.push(WatchEvent::Created { library, path: to });
                    }
                    WatchEvent::Moved { library, from, to } => {
                        match catalog.update_path(&from, &to, &library) {
                            Ok(true) => {
                                debug!("Moved {:?} -> {:?}", from, to);
                                report.moved += 1;
                            }
                            Ok(false) => {
                                report.promoted += 1;
                                created.push(WatchEvent::Created { library, path: to });
                            }
                            Err(e) => warn!("Failed to record move of {:?}: {:#}", from, e),
                        }
                    }
                    WatchEvent::Deleted { path, .. } => match catalog.delete_by_path(&path) {
                        Ok(true) => report.deleted += 1,
                        Ok(false) => report.deleted += remove_directory(&*catalog, &path),
                        Err(e) => warn!("Failed to remove {:?} from catalog: {:#}", path, e),
                    },
                    WatchEvent::Modified { library, path } => {
                        if !self.coordinator.is_game_file(&path) {
                            continue;
                        }
                        report.modified += 1;
                        match self.coordinator.reidentify(&*catalog, &library, &path) {
                            Ok(()) => report.identified += 1,
                            Err(error) => {
                                warn!("Failed to re-identify {:?}: {}", path, error);
                                report.failed.push(IdentifyFailure { path, error });
                            }
                        }
                    }
                    WatchEvent::Created { .. } => {}
                }
            }

            let mut groups: Vec<(PathBuf, Vec<PathBuf>)> = Vec::new();
            for event in created {
                let WatchEvent::Created { library, path } = event else {
                    continue;
                };
                let files = if path.is_dir() {
                    self.coordinator.list_game_files(&path)
                } else if self.coordinator.is_game_file(&path) {
                    vec![path]
                } else {
                    continue;
                };
                let index = match groups.iter().position(|(root, _)| *root == library) {
                    Some(index) => index,
                    None => {
                        groups.push((library, Vec::new()));
                        groups.len() - 1
                    }
                };
                let paths = &mut groups[index].1;
                for file in files {
                    if !paths.contains(&file) {
                        paths.push(file);
                    }
                }
            }

            for (library, paths) in groups {
                let scan = self.coordinator.identify_files(&*catalog, &library, &paths);
                report.identified += scan.identified;
                report.failed.extend(scan.failed);
            }
        }

        info!(
            "Applied watch batch: {} moved, {} promoted, {} deleted, {} modified, {} identified",
            report.moved, report.promoted, report.deleted, report.modified, report.identified
        );
        self.refresh.request_refresh();
        report
    }
}

/// Catalogued files under `dir`, directory matches only (component-wise).
fn entries_under(catalog: &dyn CatalogStore, dir: &Path) -> Vec<CatalogEntry> {
    match catalog.list_all() {
        Ok(entries) => entries
            .into_iter()
            .filter(|entry| entry.filepath.starts_with(dir) && entry.filepath != dir)
            .collect(),
        Err(e) => {
            warn!("Failed to list catalog under {:?}: {:#}", dir, e);
            Vec::new()
        }
    }
}

/// Re-path every catalogued file below a renamed directory. Returns the number moved.
fn repath_directory(catalog: &dyn CatalogStore, library: &Path, from: &Path, to: &Path) -> usize {
    let mut moved = 0;
    for entry in entries_under(catalog, from) {
        let Ok(relative) = entry.filepath.strip_prefix(from) else {
            continue;
        };
        let new_path = to.join(relative);
        match catalog.update_path(&entry.filepath, &new_path, library) {
            Ok(true) => moved += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to record move of {:?}: {:#}", entry.filepath, e),
        }
    }
    if moved > 0 {
        debug!("Moved directory {:?} -> {:?} ({} files)", from, to, moved);
    }
    moved
}

/// Drop every catalogued file below a removed directory. Returns the number removed.
fn remove_directory(catalog: &dyn CatalogStore, dir: &Path) -> usize {
    let mut removed = 0;
    for entry in entries_under(catalog, dir) {
        match catalog.delete_by_path(&entry.filepath) {
            Ok(true) => removed += 1,
            Ok(false) => {}
            Err(e) => warn!("Failed to remove {:?} from catalog: {:#}", entry.filepath, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::SqliteCatalogStore;
    use crate::identification::FilenameIdentifier;
    use std::fs;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    #[derive(Default)]
    struct CountingRefresh(AtomicUsize);

    impl RefreshHook for CountingRefresh {
        fn request_refresh(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Fixture {
        dir: TempDir,
        writer: Arc<CatalogWriter>,
        refresh: Arc<CountingRefresh>,
        aggregator: ChangeAggregator,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let writer = Arc::new(CatalogWriter::new(Arc::new(
                SqliteCatalogStore::in_memory().unwrap(),
            )));
            let refresh = Arc::new(CountingRefresh::default());
            let coordinator = Arc::new(ScanCoordinator::new(
                writer.clone(),
                Arc::new(FilenameIdentifier::new()),
                vec![dir.path().to_path_buf()],
                refresh.clone(),
            ));
            let aggregator = ChangeAggregator::new(writer.clone(), coordinator, refresh.clone());
            Self {
                dir,
                writer,
                refresh,
                aggregator,
            }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().to_path_buf()
        }

        fn file(&self, name: &str) -> PathBuf {
            let path = self.dir.path().join(name);
            fs::write(&path, b"content").unwrap();
            path
        }

        fn created(&self, path: &Path) -> WatchEvent {
            WatchEvent::Created {
                library: self.root(),
                path: path.to_path_buf(),
            }
        }
    }

    #[test]
    fn test_created_files_are_identified_with_one_refresh() {
        let f = Fixture::new();
        let a = f.file("A [0100000000010000][v0].nsp");
        let b = f.file("A [0100000000010800][v65536].nsp");
        let junk = f.file("notes.txt");

        let report = f.aggregator.apply_batch(vec![
            f.created(&a),
            f.created(&b),
            f.created(&junk),
        ]);

        assert_eq!(report.identified, 2);
        assert_eq!(f.writer.reader().count().unwrap(), 2);
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_move_of_known_file_updates_path_only() {
        let f = Fixture::new();
        let a = f.file("A [0100000000010000][v0].nsp");
        f.aggregator.apply_batch(vec![f.created(&a)]);
        let before = f.writer.reader().get_by_path(&a).unwrap().unwrap();

        let moved_to = f.dir.path().join("Renamed [0100000000010000][v0].nsp");
        fs::rename(&a, &moved_to).unwrap();
        let report = f.aggregator.apply_batch(vec![WatchEvent::Moved {
            library: f.root(),
            from: a.clone(),
            to: moved_to.clone(),
        }]);

        assert_eq!(report.moved, 1);
        let after = f.writer.reader().get_by_path(&moved_to).unwrap().unwrap();
        assert_eq!(after.id, before.id);
        assert_eq!(after.identity, before.identity);
        assert!(f.writer.reader().get_by_path(&a).unwrap().is_none());
    }

    #[test]
    fn test_move_of_unknown_file_is_treated_as_creation() {
        let f = Fixture::new();
        let to = f.file("B [0100000000020000][v0].nsp");

        let report = f.aggregator.apply_batch(vec![WatchEvent::Moved {
            library: f.root(),
            from: f.dir.path().join("elsewhere.part"),
            to: to.clone(),
        }]);

        assert_eq!(report.promoted, 1);
        assert_eq!(report.identified, 1);
        assert!(f.writer.reader().get_by_path(&to).unwrap().is_some());
    }

    #[test]
    fn test_delete_and_modify() {
        let f = Fixture::new();
        let a = f.file("A [0100000000010000][v0].nsp");
        let b = f.file("B [0100000000020000][v0].nsp");
        f.aggregator.apply_batch(vec![f.created(&a), f.created(&b)]);

        fs::remove_file(&a).unwrap();
        fs::write(&b, b"bigger content now").unwrap();
        let report = f.aggregator.apply_batch(vec![
            WatchEvent::Deleted {
                library: f.root(),
                path: a.clone(),
            },
            WatchEvent::Modified {
                library: f.root(),
                path: b.clone(),
            },
        ]);

        assert_eq!(report.deleted, 1);
        assert_eq!(report.modified, 1);
        assert!(f.writer.reader().get_by_path(&a).unwrap().is_none());
        let entry = f.writer.reader().get_by_path(&b).unwrap().unwrap();
        assert_eq!(entry.size, 18);
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_directory_rename_repaths_contained_files() {
        let f = Fixture::new();
        fs::create_dir_all(f.dir.path().join("incoming/deep")).unwrap();
        let a = f.file("incoming/A [0100000000010000][v0].nsp");
        let b = f.file("incoming/deep/B [0100000000020000][v0].nsp");
        f.aggregator.apply_batch(vec![f.created(&a), f.created(&b)]);

        let from = f.dir.path().join("incoming");
        let to = f.dir.path().join("sorted");
        fs::rename(&from, &to).unwrap();
        let report = f.aggregator.apply_batch(vec![WatchEvent::Moved {
            library: f.root(),
            from,
            to: to.clone(),
        }]);

        assert_eq!(report.moved, 2);
        assert_eq!(report.promoted, 0);
        assert_eq!(report.identified, 0);
        let catalog = f.writer.reader();
        assert_eq!(catalog.count().unwrap(), 2);
        assert!(catalog.get_by_path(&a).unwrap().is_none());
        assert!(catalog
            .get_by_path(&to.join("A [0100000000010000][v0].nsp"))
            .unwrap()
            .is_some());
        assert!(catalog
            .get_by_path(&to.join("deep/B [0100000000020000][v0].nsp"))
            .unwrap()
            .is_some());
        assert!(catalog.remove_missing_files().unwrap().is_empty());
    }

    #[test]
    fn test_directory_arriving_from_outside_is_identified() {
        let f = Fixture::new();
        let outside = TempDir::new().unwrap();
        let staged = outside.path().join("pack");
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("A [0100000000010000][v0].nsp"), b"a").unwrap();
        fs::write(staged.join("readme.txt"), b"r").unwrap();

        let to = f.dir.path().join("pack");
        fs::rename(&staged, &to).unwrap();
        let report = f.aggregator.apply_batch(vec![WatchEvent::Moved {
            library: f.root(),
            from: staged,
            to: to.clone(),
        }]);

        assert_eq!(report.promoted, 1);
        assert_eq!(report.identified, 1);
        assert!(f
            .writer
            .reader()
            .get_by_path(&to.join("A [0100000000010000][v0].nsp"))
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_created_and_deleted_directories() {
        let f = Fixture::new();
        let dir = f.dir.path().join("new");
        fs::create_dir_all(&dir).unwrap();
        f.file("new/A [0100000000010000][v0].nsp");
        f.file("new/B [0100000000020000][v0].nsp");

        let report = f.aggregator.apply_batch(vec![f.created(&dir)]);
        assert_eq!(report.identified, 2);

        fs::remove_dir_all(&dir).unwrap();
        let report = f.aggregator.apply_batch(vec![WatchEvent::Deleted {
            library: f.root(),
            path: dir,
        }]);
        assert_eq!(report.deleted, 2);
        assert_eq!(f.writer.reader().count().unwrap(), 0);
    }

    #[test]
    fn test_empty_batch_is_a_noop() {
        let f = Fixture::new();
        f.aggregator.apply_batch(Vec::new());
        assert_eq!(f.refresh.0.load(Ordering::SeqCst), 0);
    }
}
