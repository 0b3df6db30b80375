//! CatalogStore trait definition.
//!
//! Every consumer of the catalog (scanning, view generation, deduplication,
//! organization) goes through this trait so the storage backend can be swapped.

use super::models::{CatalogEntry, IdentificationMode, NewCatalogEntry};
use anyhow::Result;
use std::path::{Path, PathBuf};

pub trait CatalogStore: Send + Sync {
    // =========================================================================
    // Reads
    // =========================================================================

    /// All entries in discovery order.
    fn list_all(&self) -> Result<Vec<CatalogEntry>>;

    /// All entries whose library root is `library`, in discovery order.
    fn list_by_library(&self, library: &Path) -> Result<Vec<CatalogEntry>>;

    fn get_by_path(&self, filepath: &Path) -> Result<Option<CatalogEntry>>;

    /// Every copy of one content unit (base, update or DLC), in discovery order.
    fn list_by_app_id(&self, app_id: &str) -> Result<Vec<CatalogEntry>>;

    /// Every entry of a title family, in discovery order.
    fn list_by_title_id(&self, title_id: &str) -> Result<Vec<CatalogEntry>>;

    /// Paths already identified under `mode`, used to skip work during a scan.
    fn identified_paths(&self, mode: IdentificationMode) -> Result<Vec<PathBuf>>;

    fn count(&self) -> Result<usize>;

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert a new entry, or replace the identity of the entry already stored
    /// at the same filepath. Returns the entry id.
    fn upsert(&self, entry: &NewCatalogEntry) -> Result<i64>;

    /// Record that a file moved. Identity is left untouched.
    /// Returns false if no entry exists at `old_path`.
    fn update_path(&self, old_path: &Path, new_path: &Path, library: &Path) -> Result<bool>;

    /// Returns false if no entry existed.
    fn delete_by_path(&self, filepath: &Path) -> Result<bool>;

    /// Remove every entry whose file is no longer on disk. Returns the removed paths.
    fn remove_missing_files(&self) -> Result<Vec<PathBuf>>;
}
