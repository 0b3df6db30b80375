mod file_config;

pub use file_config::{FileConfig, OrganizeConfig, ProcessingConfig};

use crate::archive::ProcessOptions;
use crate::scan::DEFAULT_GAME_EXTENSIONS;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_SECS: u64 = 10;
pub const DEFAULT_EXTRACT_PASSWORDS: &[&str] = &["", "switch", "nintendo"];

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub library_paths: Vec<PathBuf>,
    pub keys_file: Option<PathBuf>,
    pub titledb_path: Option<PathBuf>,
    pub debounce_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub library_paths: Vec<PathBuf>,
    pub keys_file: Option<PathBuf>,
    pub titledb_path: Option<PathBuf>,
    pub debounce_secs: u64,
    pub game_extensions: Vec<String>,

    // Feature configs (with defaults)
    pub processing: ProcessingSettings,
    pub organize: OrganizeSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let library_paths = match file.library_paths {
            Some(paths) if !paths.is_empty() => paths.into_iter().map(PathBuf::from).collect(),
            _ => cli.library_paths.clone(),
        };

        let keys_file = file
            .keys_file
            .map(PathBuf::from)
            .or_else(|| cli.keys_file.clone());
        let titledb_path = file
            .titledb_path
            .map(PathBuf::from)
            .or_else(|| cli.titledb_path.clone());
        let debounce_secs = file
            .debounce_secs
            .or(cli.debounce_secs)
            .unwrap_or(DEFAULT_DEBOUNCE_SECS);

        let game_extensions = file
            .game_extensions
            .filter(|exts| !exts.is_empty())
            .map(|exts| {
                exts.into_iter()
                    .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                    .collect()
            })
            .unwrap_or_else(|| DEFAULT_GAME_EXTENSIONS.iter().map(|e| e.to_string()).collect());

        let p_file = file.processing.unwrap_or_default();
        let processing = ProcessingSettings {
            auto_extract: p_file.auto_extract.unwrap_or(true),
            auto_organize: p_file.auto_organize.unwrap_or(true),
            use_hardlinks: p_file.use_hardlinks.unwrap_or(true),
            delete_after_process: p_file.delete_after_process.unwrap_or(false),
            extract_passwords: p_file
                .extract_passwords
                .unwrap_or_else(|| DEFAULT_EXTRACT_PASSWORDS.iter().map(|p| p.to_string()).collect()),
            target_library_index: p_file.target_library_index.unwrap_or(0),
        };

        if !library_paths.is_empty() && processing.target_library_index >= library_paths.len() {
            bail!(
                "target_library_index {} is out of range for {} library paths",
                processing.target_library_index,
                library_paths.len()
            );
        }

        let o_file = file.organize.unwrap_or_default();
        let organize = OrganizeSettings {
            remove_empty_folders: o_file.remove_empty_folders.unwrap_or(true),
            organize_by_name: o_file.organize_by_name.unwrap_or(true),
        };

        Ok(Self {
            db_dir,
            library_paths,
            keys_file,
            titledb_path,
            debounce_secs,
            game_extensions,
            processing,
            organize,
        })
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    /// Library root that processed downloads are placed into.
    pub fn target_library(&self) -> Option<&PathBuf> {
        self.library_paths.get(self.processing.target_library_index)
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingSettings {
    pub auto_extract: bool,
    pub auto_organize: bool,
    pub use_hardlinks: bool,
    pub delete_after_process: bool,
    pub extract_passwords: Vec<String>,
    pub target_library_index: usize,
}

impl Default for ProcessingSettings {
    fn default() -> Self {
        Self {
            auto_extract: true,
            auto_organize: true,
            use_hardlinks: true,
            delete_after_process: false,
            extract_passwords: DEFAULT_EXTRACT_PASSWORDS.iter().map(|p| p.to_string()).collect(),
            target_library_index: 0,
        }
    }
}

impl ProcessingSettings {
    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            extract: self.auto_extract,
            organize: self.auto_organize,
            use_hardlinks: self.use_hardlinks,
            cleanup_after: self.delete_after_process,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrganizeSettings {
    pub remove_empty_folders: bool,
    pub organize_by_name: bool,
}

impl Default for OrganizeSettings {
    fn default() -> Self {
        Self {
            remove_empty_folders: true,
            organize_by_name: true,
        }
    }
}
