use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub library_paths: Option<Vec<String>>,
    pub keys_file: Option<String>,
    pub titledb_path: Option<String>,
    pub debounce_secs: Option<u64>,
    pub game_extensions: Option<Vec<String>>,

    // Feature configs
    pub processing: Option<ProcessingConfig>,
    pub organize: Option<OrganizeConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ProcessingConfig {
    pub auto_extract: Option<bool>,
    pub auto_organize: Option<bool>,
    pub use_hardlinks: Option<bool>,
    pub delete_after_process: Option<bool>,
    /// Tried in order; an empty string means no password.
    pub extract_passwords: Option<Vec<String>>,
    pub target_library_index: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct OrganizeConfig {
    pub remove_empty_folders: Option<bool>,
    pub organize_by_name: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
