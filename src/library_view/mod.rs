//! Display-ready library derived from the catalog and reference metadata.

mod cache;
mod generator;
mod missing;

pub use cache::ViewCache;
pub use generator::{
    BaseStatus, DlcStatus, EntryStatus, LibraryViewEntry, LibraryViewGenerator, VersionOwnership,
};
pub use missing::{
    missing_content, MissingBase, MissingContentReport, MissingDlc, MissingSummary,
    MissingUpdates, TitleMissingDlc,
};
