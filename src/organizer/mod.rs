//! Canonical library layout: planning and applying file renames.
//!
//! `preview` computes where every catalogued file should live, `apply` moves the
//! files and keeps the catalog in step. Per-file failures are collected, never
//! propagated, and earlier moves are not rolled back.

mod naming;
mod placement;

pub use naming::{organized_dir, organized_filename, sanitize_name};
pub use placement::{
    is_same_file, move_file, platform_supports_hardlinks, FilePlacer, PlaceOutcome, PlacementError,
};

use crate::catalog_store::{CatalogEntry, CatalogWriter, ContentKind, TitleIdentity};
use crate::identification::extract_name_from_filename;
use crate::titledb::TitleSource;
use anyhow::Result;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum OrganizeError {
    #[error("Entry has no identity")]
    NoIdentity,

    #[error("Could not determine title name")]
    NoTitleName,

    #[error("Source file no longer exists")]
    SourceMissing,

    #[error("Different file with same name exists at {0:?}")]
    DestinationDiffers(PathBuf),

    #[error("Another change already targets {0:?}")]
    Conflict(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Catalog update failed: {0}")]
    Catalog(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationChange {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
    pub library: PathBuf,
    pub kind: ContentKind,
    pub title_name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrganizeFailure {
    pub path: PathBuf,
    pub error: String,
}

impl OrganizeFailure {
    fn new(path: &Path, error: OrganizeError) -> Self {
        Self {
            path: path.to_path_buf(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct OrganizePreview {
    pub changes: Vec<OrganizationChange>,
    pub errors: Vec<OrganizeFailure>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedChange {
    pub path: PathBuf,
    pub destination: PathBuf,
    pub reason: String,
    /// The source is redundant: an identical-size copy already sits at the destination.
    pub can_delete: bool,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct ApplyReport {
    pub dry_run: bool,
    pub success: Vec<OrganizationChange>,
    pub errors: Vec<OrganizeFailure>,
    pub skipped: Vec<SkippedChange>,
    pub removed_directories: Vec<PathBuf>,
}

/// Display name of the title `identity` belongs to: reference lookup (app id for
/// BASE, title id otherwise), then the filename, sanitized. `None` when neither
/// yields a usable name.
pub fn resolve_title_name(
    titles: &dyn TitleSource,
    identity: &TitleIdentity,
    filename: &str,
) -> Option<String> {
    let lookup_id = match identity.kind {
        ContentKind::Base => &identity.app_id,
        ContentKind::Update | ContentKind::Dlc => &identity.title_id,
    };
    titles
        .lookup(lookup_id)
        .map(|info| info.name)
        .or_else(|| extract_name_from_filename(filename))
        .map(|name| sanitize_name(&name))
        .filter(|name| !name.is_empty())
}

pub struct Organizer {
    writer: Arc<CatalogWriter>,
    titles: Arc<dyn TitleSource>,
}

impl Organizer {
    pub fn new(writer: Arc<CatalogWriter>, titles: Arc<dyn TitleSource>) -> Self {
        Self { writer, titles }
    }

    /// Plan renames for every catalogued file, optionally only under `roots`.
    ///
    /// With `by_name` files go to `<root>/<Title>/<BASE|UPDATES|DLC>/`, otherwise
    /// they are renamed in place. Files already at their target are left out.
    pub fn preview(&self, roots: Option<&[PathBuf]>, by_name: bool) -> Result<OrganizePreview> {
        let entries = self.writer.reader().list_all()?;
        let mut preview = OrganizePreview::default();

        for entry in entries
            .iter()
            .filter(|e| roots.map_or(true, |roots| roots.contains(&e.library)))
        {
            match self.plan(entry, by_name) {
                Ok(Some(change)) => preview.changes.push(change),
                Ok(None) => {}
                Err(e) => {
                    debug!("Cannot organize {:?}: {}", entry.filepath, e);
                    preview.errors.push(OrganizeFailure::new(&entry.filepath, e));
                }
            }
        }

        info!(
            "Organize preview: {} changes, {} errors",
            preview.changes.len(),
            preview.errors.len()
        );
        Ok(preview)
    }

    fn plan(
        &self,
        entry: &CatalogEntry,
        by_name: bool,
    ) -> Result<Option<OrganizationChange>, OrganizeError> {
        let identity = entry.identity.as_ref().ok_or(OrganizeError::NoIdentity)?;
        let title_name = resolve_title_name(self.titles.as_ref(), identity, &entry.filename)
            .ok_or(OrganizeError::NoTitleName)?;

        let dlc_name = match identity.kind {
            ContentKind::Dlc => self
                .titles
                .lookup(&identity.app_id)
                .map(|info| sanitize_name(&info.name)),
            _ => None,
        };
        let filename =
            organized_filename(identity, &title_name, dlc_name.as_deref(), &entry.extension);

        let new_path = if by_name {
            organized_dir(&entry.library, &title_name, identity.kind).join(filename)
        } else {
            entry
                .filepath
                .parent()
                .unwrap_or(&entry.library)
                .join(filename)
        };

        if new_path == entry.filepath {
            return Ok(None);
        }
        Ok(Some(OrganizationChange {
            old_path: entry.filepath.clone(),
            new_path,
            library: entry.library.clone(),
            kind: identity.kind,
            title_name,
        }))
    }

    /// Execute `changes` in order.
    ///
    /// A dry run reports every change as successful and touches nothing. Otherwise
    /// each change is moved and its catalog path updated on its own; when
    /// `remove_empty_folders` is set, directories emptied by the moves are removed
    /// bottom-up afterwards.
    pub fn apply(
        &self,
        changes: &[OrganizationChange],
        dry_run: bool,
        remove_empty_folders: bool,
    ) -> ApplyReport {
        let mut report = ApplyReport {
            dry_run,
            ..Default::default()
        };
        if dry_run {
            report.success = changes.to_vec();
            info!("Dry run: {} files would be organized", changes.len());
            return report;
        }

        let mut claimed: HashSet<String> = HashSet::new();
        {
            let catalog = self.writer.lock();
            for change in changes {
                let key = change.new_path.to_string_lossy().to_lowercase();
                if claimed.contains(&key) {
                    warn!("Conflict: {:?} already targeted", change.new_path);
                    report.errors.push(OrganizeFailure::new(
                        &change.old_path,
                        OrganizeError::Conflict(change.new_path.clone()),
                    ));
                    continue;
                }

                match apply_one(change) {
                    Ok(None) => {}
                    Ok(Some(skip)) => {
                        report.skipped.push(skip);
                        continue;
                    }
                    Err(e) => {
                        warn!("Failed to organize {:?}: {}", change.old_path, e);
                        report.errors.push(OrganizeFailure::new(&change.old_path, e));
                        continue;
                    }
                }

                match catalog.update_path(&change.old_path, &change.new_path, &change.library) {
                    Ok(true) => {}
                    Ok(false) => warn!("{:?} was moved but is not catalogued", change.old_path),
                    Err(e) => {
                        report.errors.push(OrganizeFailure::new(
                            &change.old_path,
                            OrganizeError::Catalog(format!("{:#}", e)),
                        ));
                        continue;
                    }
                }
                debug!("Organized {:?} -> {:?}", change.old_path, change.new_path);
                claimed.insert(key);
                report.success.push(change.clone());
            }
        }

        if remove_empty_folders && !report.success.is_empty() {
            report.removed_directories = remove_empty_ancestors(&report.success);
        }

        info!(
            "Organized {} files, {} skipped, {} errors, {} directories removed",
            report.success.len(),
            report.skipped.len(),
            report.errors.len(),
            report.removed_directories.len()
        );
        report
    }
}

fn apply_one(change: &OrganizationChange) -> Result<Option<SkippedChange>, OrganizeError> {
    if !change.old_path.exists() {
        return Err(OrganizeError::SourceMissing);
    }

    // On case-insensitive filesystems a case-only rename sees its own source at
    // the destination. On case-sensitive ones the destination is another file.
    let case_only = change.old_path.to_string_lossy().to_lowercase()
        == change.new_path.to_string_lossy().to_lowercase();
    let renames_itself =
        case_only && change.new_path.exists() && is_same_file(&change.old_path, &change.new_path)?;

    if !renames_itself && change.new_path.exists() {
        let source_size = fs::metadata(&change.old_path)?.len();
        let dest_size = fs::metadata(&change.new_path)?.len();
        if source_size != dest_size {
            return Err(OrganizeError::DestinationDiffers(change.new_path.clone()));
        }
        return Ok(Some(SkippedChange {
            path: change.old_path.clone(),
            destination: change.new_path.clone(),
            reason: "Identical file already exists at destination".to_string(),
            can_delete: true,
        }));
    }

    if let Some(parent) = change.new_path.parent() {
        fs::create_dir_all(parent)?;
    }
    move_file(&change.old_path, &change.new_path)?;
    Ok(None)
}

/// Remove directories left empty by moved files, deepest first, never going above
/// the library root.
fn remove_empty_ancestors(moved: &[OrganizationChange]) -> Vec<PathBuf> {
    let mut candidates: BTreeSet<PathBuf> = BTreeSet::new();
    for change in moved {
        let mut dir = change.old_path.parent();
        while let Some(current) = dir {
            if current == change.library || !current.starts_with(&change.library) {
                break;
            }
            candidates.insert(current.to_path_buf());
            dir = current.parent();
        }
    }

    let mut ordered: Vec<PathBuf> = candidates.into_iter().collect();
    ordered.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });

    let mut removed = Vec::new();
    for dir in ordered {
        let is_empty = fs::read_dir(&dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty {
            continue;
        }
        match fs::remove_dir(&dir) {
            Ok(()) => {
                debug!("Removed empty directory {:?}", dir);
                removed.push(dir);
            }
            Err(e) => warn!("Could not remove empty directory {:?}: {}", dir, e),
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{CatalogStore, IdentificationMode, NewCatalogEntry, SqliteCatalogStore};
    use crate::titledb::{InMemoryTitleSource, TitleInfo};
    use tempfile::TempDir;

    const BASE_ID: &str = "0100000000010000";
    const UPDATE_ID: &str = "0100000000010800";
    const DLC_ID: &str = "0100000000011001";

    struct Fixture {
        dir: TempDir,
        writer: Arc<CatalogWriter>,
        organizer: Organizer,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let writer = Arc::new(CatalogWriter::new(Arc::new(
                SqliteCatalogStore::in_memory().unwrap(),
            )));
            let mut titles = InMemoryTitleSource::new();
            titles.insert(TitleInfo {
                id: BASE_ID.to_string(),
                name: "Super Game: Deluxe".to_string(),
                ..Default::default()
            });
            titles.insert(TitleInfo {
                id: DLC_ID.to_string(),
                name: "Bonus Pack".to_string(),
                ..Default::default()
            });
            let organizer = Organizer::new(writer.clone(), Arc::new(titles));
            Self {
                dir,
                writer,
                organizer,
            }
        }

        fn root(&self) -> PathBuf {
            self.dir.path().to_path_buf()
        }

        fn add(&self, relative: &str, kind: ContentKind, app_id: &str, version: u64) -> PathBuf {
            let path = self.root().join(relative);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, relative.as_bytes()).unwrap();
            self.writer
                .lock()
                .upsert(&NewCatalogEntry {
                    filepath: path.clone(),
                    library: self.root(),
                    identity: TitleIdentity {
                        title_id: BASE_ID.to_string(),
                        app_id: app_id.to_string(),
                        kind,
                        version,
                    },
                    size: relative.len() as u64,
                    identification: IdentificationMode::Filename,
                })
                .unwrap();
            path
        }
    }

    #[test]
    fn test_preview_canonical_layout() {
        let f = Fixture::new();
        f.add("dl/base.nsp", ContentKind::Base, BASE_ID, 0);
        f.add("dl/upd.nsp", ContentKind::Update, UPDATE_ID, 65536);
        f.add("dl/dlc.nsp", ContentKind::Dlc, DLC_ID, 0);

        let preview = f.organizer.preview(None, true).unwrap();
        assert!(preview.errors.is_empty());
        let targets: Vec<PathBuf> = preview.changes.iter().map(|c| c.new_path.clone()).collect();
        let root = f.root();
        assert_eq!(
            targets,
            vec![
                root.join("Super Game Deluxe/BASE/Super Game Deluxe [0100000000010000][0].nsp"),
                root.join(
                    "Super Game Deluxe/UPDATES/Super Game Deluxe [0100000000010800][v65536].nsp"
                ),
                root.join(
                    "Super Game Deluxe/DLC/Super Game Deluxe - Bonus Pack [0100000000011001][v0].nsp"
                ),
            ]
        );
    }

    #[test]
    fn test_preview_in_place_and_unchanged_entries() {
        let f = Fixture::new();
        f.add("dl/base.nsp", ContentKind::Base, BASE_ID, 0);
        f.add(
            "dl/Super Game Deluxe [0100000000010800][v65536].nsp",
            ContentKind::Update,
            UPDATE_ID,
            65536,
        );

        let preview = f.organizer.preview(None, false).unwrap();
        assert_eq!(preview.changes.len(), 1);
        assert_eq!(
            preview.changes[0].new_path,
            f.root().join("dl/Super Game Deluxe [0100000000010000][0].nsp")
        );
    }

    #[test]
    fn test_preview_restricted_to_roots() {
        let f = Fixture::new();
        f.add("dl/base.nsp", ContentKind::Base, BASE_ID, 0);

        let elsewhere = vec![PathBuf::from("/not/a/library")];
        let preview = f.organizer.preview(Some(&elsewhere), true).unwrap();
        assert!(preview.changes.is_empty());

        let here = vec![f.root()];
        assert_eq!(f.organizer.preview(Some(&here), true).unwrap().changes.len(), 1);
    }

    #[test]
    fn test_preview_reports_unnamed_titles() {
        let f = Fixture::new();
        f.add("[0100000000020000].nsp", ContentKind::Base, "0100000000020000", 0);

        let preview = f.organizer.preview(None, true).unwrap();
        assert!(preview.changes.is_empty());
        assert_eq!(preview.errors.len(), 1);
    }

    #[test]
    fn test_dry_run_round_trip() {
        let f = Fixture::new();
        let base = f.add("dl/base.nsp", ContentKind::Base, BASE_ID, 0);
        f.add("dl/dlc.nsp", ContentKind::Dlc, DLC_ID, 0);

        let preview = f.organizer.preview(None, true).unwrap();
        let report = f.organizer.apply(&preview.changes, true, true);

        assert_eq!(report.success, preview.changes);
        assert!(base.exists());
        let catalog = f.writer.reader();
        assert!(catalog.get_by_path(&base).unwrap().is_some());
        assert_eq!(f.organizer.preview(None, true).unwrap().changes, preview.changes);
    }

    #[test]
    fn test_apply_moves_files_and_updates_catalog() {
        let f = Fixture::new();
        f.add("dl/nested/base.nsp", ContentKind::Base, BASE_ID, 0);
        f.add("dl/nested/upd.nsp", ContentKind::Update, UPDATE_ID, 65536);

        let preview = f.organizer.preview(None, true).unwrap();
        let report = f.organizer.apply(&preview.changes, false, true);

        assert_eq!(report.success.len(), 2);
        assert!(report.errors.is_empty());
        let catalog = f.writer.reader();
        for change in &preview.changes {
            assert!(change.new_path.exists());
            assert!(!change.old_path.exists());
            let entry = catalog.get_by_path(&change.new_path).unwrap().unwrap();
            assert_eq!(entry.filepath, change.new_path);
        }
        assert_eq!(
            report.removed_directories,
            vec![f.root().join("dl/nested"), f.root().join("dl")]
        );
        assert!(f.root().exists());
    }

    #[test]
    fn test_apply_existing_destination() {
        let f = Fixture::new();
        let same = f.add("a/same.nsp", ContentKind::Base, BASE_ID, 0);
        let differs = f.add("b/differs.nsp", ContentKind::Base, BASE_ID, 0);

        let dest_same = f.root().join("out/same.nsp");
        let dest_differs = f.root().join("out/differs.nsp");
        fs::create_dir_all(dest_same.parent().unwrap()).unwrap();
        fs::write(&dest_same, b"a/same.nsp").unwrap();
        fs::write(&dest_differs, b"xx").unwrap();

        let change = |old: &Path, new: &Path| OrganizationChange {
            old_path: old.to_path_buf(),
            new_path: new.to_path_buf(),
            library: f.root(),
            kind: ContentKind::Base,
            title_name: "Super Game Deluxe".to_string(),
        };
        let report = f.organizer.apply(
            &[change(&same, &dest_same), change(&differs, &dest_differs)],
            false,
            true,
        );

        assert!(report.success.is_empty());
        assert_eq!(report.skipped.len(), 1);
        assert!(report.skipped[0].can_delete);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, differs);
        assert!(same.exists());
        assert!(differs.exists());
        assert!(report.removed_directories.is_empty());
    }

    #[test]
    fn test_apply_rejects_second_change_to_same_destination() {
        let f = Fixture::new();
        let first = f.add("a.nsp", ContentKind::Base, BASE_ID, 0);
        let second = f.add("b.nsp", ContentKind::Base, BASE_ID, 0);
        let dest = f.root().join("Game/BASE/game.nsp");

        let changes: Vec<OrganizationChange> = [&first, &second]
            .iter()
            .map(|old| OrganizationChange {
                old_path: old.to_path_buf(),
                new_path: dest.clone(),
                library: f.root(),
                kind: ContentKind::Base,
                title_name: "Game".to_string(),
            })
            .collect();
        let report = f.organizer.apply(&changes, false, false);

        assert_eq!(report.success.len(), 1);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, second);
        assert!(second.exists());
    }

    #[test]
    fn test_failed_change_does_not_claim_destination() {
        let f = Fixture::new();
        let gone = f.add("a.nsp", ContentKind::Base, BASE_ID, 0);
        let present = f.add("b.nsp", ContentKind::Base, BASE_ID, 0);
        fs::remove_file(&gone).unwrap();
        let dest = f.root().join("Game/BASE/game.nsp");

        let changes: Vec<OrganizationChange> = [&gone, &present]
            .iter()
            .map(|old| OrganizationChange {
                old_path: old.to_path_buf(),
                new_path: dest.clone(),
                library: f.root(),
                kind: ContentKind::Base,
                title_name: "Game".to_string(),
            })
            .collect();
        let report = f.organizer.apply(&changes, false, false);

        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].path, gone);
        assert_eq!(report.success.len(), 1);
        assert_eq!(report.success[0].old_path, present);
        assert!(dest.exists());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_case_variant_of_existing_file_is_not_overwritten() {
        let f = Fixture::new();
        let canonical = f.add(
            "Super Game Deluxe [0100000000010000][0].nsp",
            ContentKind::Base,
            BASE_ID,
            0,
        );
        let variant = f.add(
            "super game deluxe [0100000000010000][0].nsp",
            ContentKind::Base,
            BASE_ID,
            0,
        );
        fs::write(&variant, b"other").unwrap();
        let original = fs::read(&canonical).unwrap();
        if original == b"other" {
            // Case-insensitive filesystem: both names are one file.
            return;
        }

        let preview = f.organizer.preview(None, false).unwrap();
        assert_eq!(preview.changes.len(), 1);
        assert_eq!(preview.changes[0].old_path, variant);
        assert_eq!(preview.changes[0].new_path, canonical);

        let report = f.organizer.apply(&preview.changes, false, false);
        assert!(report.success.is_empty());
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].error.contains("Different file"));
        assert_eq!(fs::read(&canonical).unwrap(), original);
        assert!(variant.exists());
        assert!(f.writer.reader().get_by_path(&variant).unwrap().is_some());
    }
}
