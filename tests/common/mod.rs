//! Common test infrastructure
//!
//! Builds a throwaway library on disk (database directory, one library root and a
//! title database) and opens an engine on it through the same config path the
//! binary uses.

#![allow(dead_code)]

use gameshelf::config::{AppConfig, CliConfig};
use gameshelf::LibraryEngine;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

// ============================================================================
// Test title ids
// ============================================================================

pub const GAME_ID: &str = "0100000000010000";
pub const GAME_UPDATE_ID: &str = "0100000000010800";
pub const GAME_DLC_1_ID: &str = "0100000000011001";
pub const GAME_DLC_2_ID: &str = "0100000000011002";

pub const BASE_FILE: &str = "Test Game [0100000000010000].nsp";
pub const UPDATE_FILE: &str = "Test Game [0100000000010800][v131072].nsp";
pub const OLD_UPDATE_FILE: &str = "Test Game [0100000000010800][v65536].nsp";
pub const DLC_1_FILE: &str = "Test Game Extra [0100000000011001][v0].nsp";

const TITLEDB: &str = r#"{
    "titles": {
        "0100000000010000": {
            "name": "Test Game",
            "versions": [65536, 131072],
            "dlcs": ["0100000000011001", "0100000000011002"]
        },
        "0100000000011001": { "name": "Extra Levels" },
        "0100000000011002": { "name": "Soundtrack" }
    },
    "dlc_versions": { "0100000000011001": 0 }
}"#;

pub struct TestLibrary {
    pub dir: TempDir,
    pub db_dir: PathBuf,
    pub library: PathBuf,
    pub titledb: PathBuf,
}

impl TestLibrary {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("temp dir");
        let db_dir = dir.path().join("db");
        let library = dir.path().join("library");
        fs::create_dir_all(&db_dir).unwrap();
        fs::create_dir_all(&library).unwrap();
        let titledb = dir.path().join("titledb.json");
        fs::write(&titledb, TITLEDB).unwrap();
        Self {
            dir,
            db_dir,
            library,
            titledb,
        }
    }

    pub fn config(&self) -> AppConfig {
        let cli = CliConfig {
            db_dir: Some(self.db_dir.clone()),
            library_paths: vec![self.library.clone()],
            keys_file: None,
            titledb_path: Some(self.titledb.clone()),
            debounce_secs: Some(0),
        };
        AppConfig::resolve(&cli, None).expect("valid config")
    }

    pub fn open(&self) -> LibraryEngine {
        LibraryEngine::open(&self.config()).expect("engine opens")
    }

    /// Write a file under the library root, creating parent folders.
    pub fn add_file(&self, relative: &str, content: &[u8]) -> PathBuf {
        write_file(&self.library.join(relative), content)
    }

    pub fn scratch(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::create_dir_all(&path).unwrap();
        path
    }
}

pub fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
    path.to_path_buf()
}

/// Zip archive bytes holding `files`.
pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in files {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
