//! Library catalog: one row per identified game file.

mod models;
mod schema;
mod store;
mod trait_def;
mod writer;

pub use models::{
    CatalogEntry, ContentKind, IdentificationMode, NewCatalogEntry, TitleIdentity,
};
pub use store::SqliteCatalogStore;
pub use trait_def::CatalogStore;
pub use writer::{CatalogWriter, WriteGuard};
