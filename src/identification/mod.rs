//! File identification seam.
//!
//! Container parsing (reading title metadata out of NSP/XCI files with console keys)
//! lives outside this crate and plugs in through [`FileIdentifier`]. The built-in
//! [`FilenameIdentifier`] is the fallback used when no valid keystore is present.

mod filename;
mod keystore;

pub use filename::{base_title_id, extract_name_from_filename, kind_from_app_id, FilenameIdentifier};
pub use keystore::Keystore;

use crate::catalog_store::TitleIdentity;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IdentifyError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No title id found in {0}")]
    MissingTitleId(String),

    #[error("Invalid version tag: {0}")]
    InvalidVersion(String),

    #[error("Unrecognized file: {0:?}")]
    Unrecognized(PathBuf),

    #[error("Container error: {0}")]
    Container(String),
}

pub trait FileIdentifier: Send + Sync {
    /// Identify a single file. Implementations reading container metadata
    /// receive the loaded keystore; filename heuristics ignore it.
    fn identify(&self, path: &Path, keystore: Option<&Keystore>)
        -> Result<TitleIdentity, IdentifyError>;
}
