//! Reference title metadata ("titledb").
//!
//! Read-only source of known titles: display names, released update versions
//! and the DLC app ids each title offers. Ids are matched case-insensitively.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleInfo {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Known update versions of a base title.
    #[serde(default)]
    pub versions: Vec<u64>,
    /// App ids of every DLC released for a base title.
    #[serde(default, rename = "dlcs")]
    pub dlc_ids: Vec<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub banner_url: Option<String>,
}

impl TitleInfo {
    pub fn latest_version(&self) -> Option<u64> {
        self.versions.iter().copied().max()
    }
}

pub trait TitleSource: Send + Sync {
    /// Metadata for a title id or app id.
    fn lookup(&self, id: &str) -> Option<TitleInfo>;

    /// Newest known version of a DLC app id.
    fn dlc_version(&self, _app_id: &str) -> Option<u64> {
        None
    }
}

#[derive(Debug, Default, Deserialize)]
struct TitleDbDocument {
    #[serde(default)]
    titles: HashMap<String, TitleInfo>,
    #[serde(default)]
    dlc_versions: HashMap<String, u64>,
}

/// Title source kept fully in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTitleSource {
    titles: HashMap<String, TitleInfo>,
    dlc_versions: HashMap<String, u64>,
}

fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

impl InMemoryTitleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, mut info: TitleInfo) {
        info.id = normalize_id(&info.id);
        info.dlc_ids = info.dlc_ids.iter().map(|d| normalize_id(d)).collect();
        self.titles.insert(info.id.clone(), info);
    }

    pub fn set_dlc_version(&mut self, app_id: &str, version: u64) {
        self.dlc_versions.insert(normalize_id(app_id), version);
    }

    pub fn len(&self) -> usize {
        self.titles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}

impl TitleSource for InMemoryTitleSource {
    fn lookup(&self, id: &str) -> Option<TitleInfo> {
        self.titles.get(&normalize_id(id)).cloned()
    }

    fn dlc_version(&self, app_id: &str) -> Option<u64> {
        self.dlc_versions.get(&normalize_id(app_id)).copied()
    }
}

/// Title source loaded from a JSON document:
///
/// ```json
/// { "titles": { "0100000000010000": { "name": "Game", "versions": [65536], "dlcs": [] } },
///   "dlc_versions": { "0100000000011001": 65536 } }
/// ```
pub struct JsonTitleSource {
    inner: InMemoryTitleSource,
}

impl JsonTitleSource {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read titledb file: {:?}", path))?;
        let source = Self::from_json(&content)
            .with_context(|| format!("Failed to parse titledb file: {:?}", path))?;
        info!("Loaded {} titles from {:?}", source.inner.len(), path);
        Ok(source)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: TitleDbDocument = serde_json::from_str(content)?;
        let mut inner = InMemoryTitleSource::new();
        for (id, mut info) in document.titles {
            info.id = id;
            inner.insert(info);
        }
        for (app_id, version) in document.dlc_versions {
            inner.set_dlc_version(&app_id, version);
        }
        Ok(Self { inner })
    }
}

impl TitleSource for JsonTitleSource {
    fn lookup(&self, id: &str) -> Option<TitleInfo> {
        self.inner.lookup(id)
    }

    fn dlc_version(&self, app_id: &str) -> Option<u64> {
        self.inner.dlc_version(app_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_source_lookup_is_case_insensitive() {
        let source = JsonTitleSource::from_json(
            r#"{
                "titles": {
                    "0100abcd00010000": {
                        "name": "Game",
                        "versions": [65536, 131072],
                        "dlcs": ["0100abcd00011001"],
                        "icon_url": "https://img/icon.png"
                    }
                },
                "dlc_versions": { "0100ABCD00011001": 65536 }
            }"#,
        )
        .unwrap();

        let info = source.lookup("0100ABCD00010000").unwrap();
        assert_eq!(info.name, "Game");
        assert_eq!(info.id, "0100ABCD00010000");
        assert_eq!(info.latest_version(), Some(131072));
        assert_eq!(info.dlc_ids, vec!["0100ABCD00011001".to_string()]);
        assert_eq!(info.banner_url, None);
        assert_eq!(source.dlc_version("0100abcd00011001"), Some(65536));
        assert!(source.lookup("0100000000000000").is_none());
    }

    #[test]
    fn test_invalid_json_is_an_error() {
        assert!(JsonTitleSource::from_json("{ not json").is_err());
    }
}
