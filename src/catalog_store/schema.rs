//! SQLite schema for the library catalog.
//!
//! One row per physical file. `id` is the discovery sequence and `filepath` is the
//! logical key. Identity columns are nullable so partially identified legacy rows
//! can still be loaded (and skipped) instead of failing the whole read.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

const FILES_TABLE: Table = Table {
    name: "files",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("filepath", &SqlType::Text, non_null = true),
        sqlite_column!("library", &SqlType::Text, non_null = true),
        sqlite_column!("filename", &SqlType::Text, non_null = true),
        sqlite_column!("extension", &SqlType::Text, non_null = true),
        sqlite_column!("title_id", &SqlType::Text),
        sqlite_column!("app_id", &SqlType::Text),
        sqlite_column!("type", &SqlType::Text), // 'BASE', 'UPDATE', 'DLC'
        sqlite_column!("version", &SqlType::Integer),
        sqlite_column!("size", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "identification_type",
            &SqlType::Text,
            non_null = true,
            default_value = Some("'filename'")
        ),
    ],
    indices: &[
        ("idx_files_library", "library"),
        ("idx_files_app_id", "app_id"),
        ("idx_files_title_id", "title_id"),
    ],
    unique_constraints: &[&["filepath"]],
};

pub const LIBRARY_SCHEMA: VersionedSchema = VersionedSchema {
    version: 0,
    tables: &[FILES_TABLE],
};
