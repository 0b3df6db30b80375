//! Gameshelf Library Engine
//!
//! Keeps a catalog of game files (base games, updates, DLC) in sync with library
//! folders on disk and derives views, duplicate reports and a canonical layout
//! from it.

pub mod archive;
pub mod catalog_store;
pub mod config;
pub mod dedupe;
pub mod engine;
pub mod identification;
pub mod library_view;
pub mod organizer;
pub mod scan;
pub mod sqlite_persistence;
pub mod titledb;
pub mod watch;

// Re-export commonly used types for convenience
pub use catalog_store::{CatalogStore, SqliteCatalogStore};
pub use engine::{EngineSettings, LibraryEngine};
