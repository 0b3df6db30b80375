//! Putting single files at their destination: hardlink, copy or move.

use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum PlacementError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Different file with same name exists at {0:?}")]
    DestinationDiffers(PathBuf),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceOutcome {
    Hardlinked,
    Copied,
    /// A same-size file already sits at the destination.
    AlreadyPresent,
}

#[cfg(unix)]
fn filesystem_id(path: &Path) -> io::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(fs::metadata(path)?.dev())
}

#[cfg(not(unix))]
fn filesystem_id(path: &Path) -> io::Result<u64> {
    fs::metadata(path).map(|_| 0)
}

/// Whether both paths name the same file on disk, e.g. two spellings of one
/// name on a case-insensitive filesystem.
#[cfg(unix)]
pub fn is_same_file(a: &Path, b: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = (fs::metadata(a)?, fs::metadata(b)?);
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

#[cfg(not(unix))]
pub fn is_same_file(a: &Path, b: &Path) -> io::Result<bool> {
    Ok(fs::canonicalize(a)? == fs::canonicalize(b)?)
}

/// Whether hardlinks can be created at all on this platform.
pub fn platform_supports_hardlinks() -> bool {
    cfg!(any(unix, windows))
}

fn same_filesystem(a: &Path, b: &Path) -> bool {
    match (filesystem_id(a), filesystem_id(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Places files without removing the source, preferring hardlinks.
#[derive(Debug, Clone)]
pub struct FilePlacer {
    use_hardlinks: bool,
}

impl FilePlacer {
    pub fn new(use_hardlinks: bool) -> Self {
        Self {
            use_hardlinks: use_hardlinks && platform_supports_hardlinks(),
        }
    }

    pub fn place(&self, source: &Path, dest: &Path) -> Result<PlaceOutcome, PlacementError> {
        if source == dest {
            return Ok(PlaceOutcome::AlreadyPresent);
        }
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        if dest.exists() {
            if fs::metadata(source)?.len() == fs::metadata(dest)?.len() {
                return Ok(PlaceOutcome::AlreadyPresent);
            }
            return Err(PlacementError::DestinationDiffers(dest.to_path_buf()));
        }

        if self.use_hardlinks && same_filesystem(source, parent) {
            match fs::hard_link(source, dest) {
                Ok(()) => {
                    debug!("Hardlinked {:?} -> {:?}", source, dest);
                    return Ok(PlaceOutcome::Hardlinked);
                }
                Err(e) => warn!("Hardlink {:?} failed, copying instead: {}", dest, e),
            }
        }

        fs::copy(source, dest)?;
        debug!("Copied {:?} -> {:?}", source, dest);
        Ok(PlaceOutcome::Copied)
    }
}

/// Move a file, falling back to copy and delete when a rename is not possible
/// (different filesystems).
pub fn move_file(source: &Path, dest: &Path) -> io::Result<()> {
    match fs::rename(source, dest) {
        Ok(()) => Ok(()),
        Err(e) if source.exists() && !dest.exists() => {
            debug!("Rename {:?} failed ({}), copying", source, e);
            fs::copy(source, dest)?;
            fs::remove_file(source)
        }
        Err(e) => Err(e),
    }
}
