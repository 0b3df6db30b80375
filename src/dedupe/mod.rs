//! Duplicate and superseded file detection, and their removal.

mod detector;

pub use detector::{DuplicateDetector, DuplicateFilter, DuplicateReason, DuplicateRecord};

use crate::catalog_store::CatalogWriter;
use byte_unit::Byte;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Clone, Serialize)]
pub struct DeletedFile {
    pub filepath: PathBuf,
    pub title_name: Option<String>,
    pub version: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteFailure {
    pub filepath: PathBuf,
    pub error: String,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct DeleteReport {
    pub dry_run: bool,
    pub deleted: Vec<DeletedFile>,
    pub errors: Vec<DeleteFailure>,
    pub bytes_freed: u64,
}

/// Remove the files named by `records` from disk and from the catalog.
///
/// A file that is already gone still has its catalog row removed and counts as
/// deleted. With `dry_run` nothing is touched and the report lists what would go.
pub fn delete_duplicates(
    writer: &CatalogWriter,
    records: &[DuplicateRecord],
    dry_run: bool,
) -> DeleteReport {
    let mut report = DeleteReport {
        dry_run,
        ..Default::default()
    };

    let catalog = writer.lock();
    for record in records {
        if !dry_run {
            match std::fs::remove_file(&record.filepath) {
                Ok(()) => info!("Deleted duplicate {:?}", record.filepath),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => {
                    error!("Error deleting {:?}: {}", record.filepath, e);
                    report.errors.push(DeleteFailure {
                        filepath: record.filepath.clone(),
                        error: e.to_string(),
                    });
                    continue;
                }
            }
            if let Err(e) = catalog.delete_by_path(&record.filepath) {
                error!("Error removing {:?} from catalog: {:#}", record.filepath, e);
                report.errors.push(DeleteFailure {
                    filepath: record.filepath.clone(),
                    error: format!("{:#}", e),
                });
                continue;
            }
        }
        report.bytes_freed += record.size;
        report.deleted.push(DeletedFile {
            filepath: record.filepath.clone(),
            title_name: record.title_name.clone(),
            version: record.version,
            size: record.size,
        });
    }

    info!(
        "{} {} duplicates, {:#} freed, {} errors",
        if dry_run { "Would delete" } else { "Deleted" },
        report.deleted.len(),
        Byte::from(report.bytes_freed),
        report.errors.len()
    );
    report
}
