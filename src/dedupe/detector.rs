use crate::catalog_store::{CatalogEntry, ContentKind};
use crate::titledb::TitleSource;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DuplicateReason {
    /// Same-size copy of a base game.
    IdenticalBase,
    /// Another file carries the same update version.
    DuplicateUpdateVersion { version: u64 },
    /// A newer update of the same title is present.
    SupersededUpdate { latest_version: u64 },
    /// Same-size copy of a DLC.
    IdenticalDlc,
}

impl DuplicateReason {
    pub fn describe(&self, kept_filename: &str) -> String {
        match self {
            DuplicateReason::IdenticalBase => {
                format!("Duplicate base game (identical size, keeping: {})", kept_filename)
            }
            DuplicateReason::DuplicateUpdateVersion { version } => {
                format!("Duplicate update file v{} (keeping: {})", version, kept_filename)
            }
            DuplicateReason::SupersededUpdate { latest_version } => {
                format!("Older update version (keeping latest: v{})", latest_version)
            }
            DuplicateReason::IdenticalDlc => {
                format!("Duplicate DLC file (identical size, keeping: {})", kept_filename)
            }
        }
    }
}

/// A catalog entry that can be removed because another file covers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateRecord {
    pub filepath: PathBuf,
    pub filename: String,
    pub title_id: String,
    pub title_name: Option<String>,
    pub kind: ContentKind,
    pub version: u64,
    pub size: u64,
    pub latest_version: u64,
    pub kept_filepath: PathBuf,
    pub kept_filename: String,
    pub reason: DuplicateReason,
}

#[derive(Debug, Default, Clone)]
pub struct DuplicateFilter {
    /// Matches either the title id or the app id of an entry.
    pub title_id: Option<String>,
    pub kind: Option<ContentKind>,
}

impl DuplicateFilter {
    fn matches(&self, entry: &CatalogEntry) -> bool {
        let Some(identity) = entry.identity.as_ref() else {
            return false;
        };
        let id_ok = self.title_id.as_deref().map_or(true, |wanted| {
            identity.title_id.eq_ignore_ascii_case(wanted)
                || identity.app_id.eq_ignore_ascii_case(wanted)
        });
        id_ok && self.kind.map_or(true, |kind| identity.kind == kind)
    }
}

/// Preference order for the copy that stays: shortest filename, then filename,
/// then full path, so the choice never depends on discovery order.
fn keep_order(entry: &CatalogEntry) -> (usize, &str, &PathBuf) {
    (entry.filename.chars().count(), entry.filename.as_str(), &entry.filepath)
}

fn sorted_for_keeping(mut entries: Vec<&CatalogEntry>) -> Vec<&CatalogEntry> {
    entries.sort_by(|a, b| keep_order(a).cmp(&keep_order(b)));
    entries
}

pub struct DuplicateDetector<'a> {
    titles: &'a dyn TitleSource,
}

impl<'a> DuplicateDetector<'a> {
    pub fn new(titles: &'a dyn TitleSource) -> Self {
        Self { titles }
    }

    /// Classify redundant entries. Never mutates anything.
    pub fn find(&self, entries: &[CatalogEntry], filter: &DuplicateFilter) -> Vec<DuplicateRecord> {
        let mut groups: BTreeMap<(String, ContentKind), Vec<&CatalogEntry>> = BTreeMap::new();
        for entry in entries.iter().filter(|e| filter.matches(e)) {
            let Some(identity) = entry.identity.as_ref() else {
                continue;
            };
            let group_id = match identity.kind {
                ContentKind::Base => &identity.app_id,
                ContentKind::Update | ContentKind::Dlc => &identity.title_id,
            };
            groups
                .entry((group_id.to_ascii_uppercase(), identity.kind))
                .or_default()
                .push(entry);
        }

        let mut duplicates = Vec::new();
        for ((group_id, kind), files) in groups {
            if files.len() < 2 {
                continue;
            }
            let title_name = self.titles.lookup(&group_id).map(|t| t.name);
            let record = |file: &CatalogEntry, kept: &CatalogEntry, latest_version: u64, reason| {
                DuplicateRecord {
                    filepath: file.filepath.clone(),
                    filename: file.filename.clone(),
                    title_id: group_id.clone(),
                    title_name: title_name.clone(),
                    kind,
                    version: file.version().unwrap_or(0),
                    size: file.size,
                    latest_version,
                    kept_filepath: kept.filepath.clone(),
                    kept_filename: kept.filename.clone(),
                    reason,
                }
            };

            match kind {
                ContentKind::Base | ContentKind::Dlc => {
                    let mut buckets: BTreeMap<(&str, u64), Vec<&CatalogEntry>> = BTreeMap::new();
                    for file in files {
                        let app_id = if kind == ContentKind::Dlc {
                            file.app_id().unwrap_or_default()
                        } else {
                            ""
                        };
                        buckets.entry((app_id, file.size)).or_default().push(file);
                    }
                    let reason = if kind == ContentKind::Base {
                        DuplicateReason::IdenticalBase
                    } else {
                        DuplicateReason::IdenticalDlc
                    };
                    for bucket in buckets.into_values().filter(|b| b.len() > 1) {
                        let sorted = sorted_for_keeping(bucket);
                        let kept = sorted[0];
                        for file in &sorted[1..] {
                            let version = file.version().unwrap_or(0);
                            duplicates.push(record(*file, kept, version, reason.clone()));
                        }
                    }
                }
                ContentKind::Update => {
                    let mut by_version: BTreeMap<u64, Vec<&CatalogEntry>> = BTreeMap::new();
                    for file in files {
                        by_version
                            .entry(file.version().unwrap_or(0))
                            .or_default()
                            .push(file);
                    }
                    let latest_version = by_version.keys().next_back().copied().unwrap_or(0);

                    let mut survivors: Vec<(u64, &CatalogEntry)> = Vec::new();
                    for (version, same_version) in by_version {
                        let sorted = sorted_for_keeping(same_version);
                        let kept = sorted[0];
                        for file in &sorted[1..] {
                            duplicates.push(record(
                                *file,
                                kept,
                                latest_version,
                                DuplicateReason::DuplicateUpdateVersion { version },
                            ));
                        }
                        survivors.push((version, kept));
                    }

                    if let Some((_, newest)) = survivors.last().copied() {
                        for (_, file) in &survivors[..survivors.len() - 1] {
                            duplicates.push(record(
                                *file,
                                newest,
                                latest_version,
                                DuplicateReason::SupersededUpdate { latest_version },
                            ));
                        }
                    }
                }
            }
        }
        duplicates
    }
}
