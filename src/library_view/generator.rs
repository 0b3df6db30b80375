use crate::catalog_store::{CatalogEntry, CatalogStore, ContentKind};
use crate::identification::extract_name_from_filename;
use crate::titledb::TitleSource;
use anyhow::Result;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionOwnership {
    pub version: u64,
    pub owned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BaseStatus {
    pub has_base: bool,
    pub has_latest_version: bool,
    pub versions: Vec<VersionOwnership>,
    pub has_all_dlc: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DlcStatus {
    /// `None` when no version information is available for the DLC.
    pub has_latest_version: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryStatus {
    Base(BaseStatus),
    Dlc(DlcStatus),
}

/// A BASE or DLC catalog entry resolved against reference metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LibraryViewEntry {
    #[serde(flatten)]
    pub entry: CatalogEntry,
    /// Display name of this content unit.
    pub name: String,
    /// Display name of the title family this entry belongs to.
    pub title_name: Option<String>,
    pub icon_url: Option<String>,
    pub banner_url: Option<String>,
    pub status: EntryStatus,
}

pub struct LibraryViewGenerator {
    titles: Arc<dyn TitleSource>,
}

/// Catalog entries of one title family, bucketed by kind.
#[derive(Default)]
struct TitleFiles<'a> {
    has_base: bool,
    update_versions: HashSet<u64>,
    dlc_app_ids: HashSet<&'a str>,
}

impl LibraryViewGenerator {
    pub fn new(titles: Arc<dyn TitleSource>) -> Self {
        Self { titles }
    }

    pub fn generate(&self, catalog: &dyn CatalogStore) -> Result<Vec<LibraryViewEntry>> {
        let entries = catalog.list_all()?;
        Ok(self.build(&entries))
    }

    /// Build the view from entries given in discovery order.
    pub fn build(&self, entries: &[CatalogEntry]) -> Vec<LibraryViewEntry> {
        let started = Instant::now();

        let mut by_title: HashMap<&str, TitleFiles> = HashMap::new();
        let mut dlc_versions: HashMap<&str, Vec<u64>> = HashMap::new();
        for identity in entries.iter().filter_map(|e| e.identity.as_ref()) {
            let files = by_title.entry(identity.title_id.as_str()).or_default();
            match identity.kind {
                ContentKind::Base => files.has_base = true,
                ContentKind::Update => {
                    files.update_versions.insert(identity.version);
                }
                ContentKind::Dlc => {
                    files.dlc_app_ids.insert(identity.app_id.as_str());
                    dlc_versions
                        .entry(identity.app_id.as_str())
                        .or_default()
                        .push(identity.version);
                }
            }
        }

        let mut view = Vec::new();
        for entry in entries {
            let Some(identity) = entry.identity.as_ref() else {
                warn!(
                    "Catalog entry {:?} is missing identity fields, skipping",
                    entry.filepath
                );
                continue;
            };
            if identity.kind == ContentKind::Update {
                continue;
            }

            let info = self.titles.lookup(&identity.app_id);
            let name = match info.as_ref().map(|i| i.name.clone()) {
                Some(name) => name,
                None => match extract_name_from_filename(&entry.filename) {
                    Some(name) => {
                        info!("Using name '{}' extracted from {}", name, entry.filename);
                        name
                    }
                    None => {
                        warn!(
                            "No metadata or usable filename for {:?}, skipping",
                            entry.filepath
                        );
                        continue;
                    }
                },
            };
            let files = by_title.get(identity.title_id.as_str());

            let (title_name, status) = match identity.kind {
                ContentKind::Base => {
                    let (known_versions, known_dlcs) = match info.as_ref() {
                        Some(i) => (i.versions.as_slice(), i.dlc_ids.as_slice()),
                        None => (&[][..], &[][..]),
                    };
                    let status = base_status(files, known_versions, known_dlcs);
                    (Some(name.clone()), EntryStatus::Base(status))
                }
                ContentKind::Dlc => {
                    let title_name = self.titles.lookup(&identity.title_id).map(|t| t.name);
                    let observed = dlc_versions
                        .get(identity.app_id.as_str())
                        .map(Vec::as_slice)
                        .unwrap_or_default();
                    let has_latest_version = if observed.len() > 1 {
                        observed.iter().max().map(|max| identity.version >= *max)
                    } else {
                        self.titles
                            .dlc_version(&identity.app_id)
                            .map(|reference| identity.version >= reference)
                    };
                    (title_name, EntryStatus::Dlc(DlcStatus { has_latest_version }))
                }
                ContentKind::Update => continue,
            };

            view.push(LibraryViewEntry {
                entry: entry.clone(),
                name,
                title_name,
                icon_url: info.as_ref().and_then(|i| i.icon_url.clone()),
                banner_url: info.as_ref().and_then(|i| i.banner_url.clone()),
                status,
            });
        }

        view.sort_by(|a, b| {
            (a.title_name.is_none(), a.title_name.as_deref(), a.entry.app_id()).cmp(&(
                b.title_name.is_none(),
                b.title_name.as_deref(),
                b.entry.app_id(),
            ))
        });

        info!(
            "Generated library view: {} entries in {}ms",
            view.len(),
            started.elapsed().as_millis()
        );
        view
    }
}

fn base_status(files: Option<&TitleFiles>, known_versions: &[u64], known_dlcs: &[String]) -> BaseStatus {
    let owned_updates = files.map(|f| &f.update_versions);
    let owns_version = |v: &u64| owned_updates.is_some_and(|owned| owned.contains(v));

    let mut versions: Vec<u64> = known_versions.to_vec();
    versions.sort_unstable();
    versions.dedup();

    let has_latest_version = match versions.last() {
        Some(latest) => owns_version(latest),
        None => true,
    };
    let has_all_dlc = known_dlcs.iter().all(|dlc| {
        files.is_some_and(|f| {
            f.dlc_app_ids
                .iter()
                .any(|owned| owned.eq_ignore_ascii_case(dlc))
        })
    });

    BaseStatus {
        has_base: files.is_some_and(|f| f.has_base),
        has_latest_version,
        versions: versions
            .into_iter()
            .map(|version| VersionOwnership {
                version,
                owned: owns_version(&version),
            })
            .collect(),
        has_all_dlc,
    }
}
