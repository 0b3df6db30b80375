use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A filesystem change observed under a library root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WatchEvent {
    Created {
        library: PathBuf,
        path: PathBuf,
    },
    Modified {
        library: PathBuf,
        path: PathBuf,
    },
    Deleted {
        library: PathBuf,
        path: PathBuf,
    },
    Moved {
        library: PathBuf,
        from: PathBuf,
        to: PathBuf,
    },
}

impl WatchEvent {
    pub fn library(&self) -> &Path {
        match self {
            WatchEvent::Created { library, .. }
            | WatchEvent::Modified { library, .. }
            | WatchEvent::Deleted { library, .. }
            | WatchEvent::Moved { library, .. } => library,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, WatchEvent::Created { .. })
    }
}
