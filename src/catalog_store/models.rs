//! Catalog record types.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Kind of content a game file carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentKind {
    Base,
    Update,
    Dlc,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Base => "BASE",
            ContentKind::Update => "UPDATE",
            ContentKind::Dlc => "DLC",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "BASE" => Some(ContentKind::Base),
            "UPDATE" => Some(ContentKind::Update),
            "DLC" => Some(ContentKind::Dlc),
            _ => None,
        }
    }

    /// Directory name used under a title folder in the organized layout.
    pub fn folder_name(&self) -> &'static str {
        match self {
            ContentKind::Base => "BASE",
            ContentKind::Update => "UPDATES",
            ContentKind::Dlc => "DLC",
        }
    }
}

/// How a file was identified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentificationMode {
    /// Container metadata read with a valid keystore.
    Content,
    /// Heuristics applied to the filename only.
    Filename,
}

impl IdentificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentificationMode::Content => "content",
            IdentificationMode::Filename => "filename",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "content" => Some(IdentificationMode::Content),
            "filename" => Some(IdentificationMode::Filename),
            _ => None,
        }
    }
}

/// Identity fields of a catalog entry. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleIdentity {
    /// Base title id the content belongs to.
    pub title_id: String,
    /// Id of the content itself (equals `title_id` for BASE).
    pub app_id: String,
    pub kind: ContentKind,
    pub version: u64,
}

/// One physical game file known to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Discovery sequence; lower ids were catalogued first.
    pub id: i64,
    pub filepath: PathBuf,
    pub library: PathBuf,
    pub filename: String,
    pub extension: String,
    /// `None` for rows persisted without complete identity fields.
    pub identity: Option<TitleIdentity>,
    pub size: u64,
    pub identification: IdentificationMode,
}

impl CatalogEntry {
    pub fn kind(&self) -> Option<ContentKind> {
        self.identity.as_ref().map(|i| i.kind)
    }

    pub fn app_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.app_id.as_str())
    }

    pub fn title_id(&self) -> Option<&str> {
        self.identity.as_ref().map(|i| i.title_id.as_str())
    }

    pub fn version(&self) -> Option<u64> {
        self.identity.as_ref().map(|i| i.version)
    }
}

/// Fields needed to record a newly identified file.
#[derive(Debug, Clone)]
pub struct NewCatalogEntry {
    pub filepath: PathBuf,
    pub library: PathBuf,
    pub identity: TitleIdentity,
    pub size: u64,
    pub identification: IdentificationMode,
}

impl NewCatalogEntry {
    pub fn filename(&self) -> String {
        file_name_of(&self.filepath)
    }

    pub fn extension(&self) -> String {
        extension_of(&self.filepath)
    }
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

pub(crate) fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}
