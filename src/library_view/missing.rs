//! Report of content known to exist but absent from the catalog.

use crate::catalog_store::{CatalogEntry, ContentKind};
use crate::titledb::TitleSource;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize)]
pub struct MissingBase {
    pub title_id: String,
    pub name: Option<String>,
    pub has_updates: bool,
    pub has_dlcs: bool,
    pub owned_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingUpdates {
    pub title_id: String,
    pub name: Option<String>,
    pub current_version: u64,
    pub latest_version: u64,
    pub missing_versions: Vec<u64>,
    pub has_base: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MissingDlc {
    pub app_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleMissingDlc {
    pub title_id: String,
    pub name: Option<String>,
    pub missing_dlcs: Vec<MissingDlc>,
    pub total_dlc: usize,
    pub owned_dlc: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MissingSummary {
    pub total_missing_base: usize,
    pub total_missing_updates: usize,
    pub total_missing_dlc: usize,
}

#[derive(Debug, Default, Clone, Serialize)]
pub struct MissingContentReport {
    pub missing_base: Vec<MissingBase>,
    pub missing_updates: Vec<MissingUpdates>,
    pub missing_dlc: Vec<TitleMissingDlc>,
    pub summary: MissingSummary,
}

#[derive(Default)]
struct OwnedContent {
    has_base: bool,
    update_versions: BTreeSet<u64>,
    dlc_app_ids: BTreeSet<String>,
    files: Vec<PathBuf>,
}

/// Compare the catalog (optionally restricted to `roots`) against reference metadata.
pub fn missing_content(
    entries: &[CatalogEntry],
    titles: &dyn TitleSource,
    roots: Option<&[PathBuf]>,
) -> MissingContentReport {
    let mut owned: BTreeMap<String, OwnedContent> = BTreeMap::new();
    for entry in entries {
        if roots.is_some_and(|roots| !roots.contains(&entry.library)) {
            continue;
        }
        let Some(identity) = entry.identity.as_ref() else {
            continue;
        };
        let group_id = match identity.kind {
            ContentKind::Base => identity.app_id.to_ascii_uppercase(),
            _ => identity.title_id.to_ascii_uppercase(),
        };
        let content = owned.entry(group_id).or_default();
        content.files.push(entry.filepath.clone());
        match identity.kind {
            ContentKind::Base => content.has_base = true,
            ContentKind::Update => {
                content.update_versions.insert(identity.version);
            }
            ContentKind::Dlc => {
                content
                    .dlc_app_ids
                    .insert(identity.app_id.to_ascii_uppercase());
            }
        }
    }

    let mut report = MissingContentReport::default();
    for (title_id, content) in owned {
        let info = titles.lookup(&title_id);
        let name = info.as_ref().map(|i| i.name.clone());

        let has_updates = !content.update_versions.is_empty();
        let has_dlcs = !content.dlc_app_ids.is_empty();
        if !content.has_base && (has_updates || has_dlcs) {
            report.missing_base.push(MissingBase {
                title_id: title_id.clone(),
                name: name.clone(),
                has_updates,
                has_dlcs,
                owned_files: content.files.clone(),
            });
            report.summary.total_missing_base += 1;
        }

        let Some(info) = info else {
            continue;
        };

        if content.has_base || has_updates {
            if let Some(latest) = info.latest_version() {
                if !content.update_versions.contains(&latest) {
                    let mut missing_versions: Vec<u64> = info
                        .versions
                        .iter()
                        .copied()
                        .filter(|v| !content.update_versions.contains(v))
                        .collect();
                    missing_versions.sort_unstable();
                    missing_versions.dedup();
                    report.summary.total_missing_updates += missing_versions.len();
                    report.missing_updates.push(MissingUpdates {
                        title_id: title_id.clone(),
                        name: name.clone(),
                        current_version: content.update_versions.last().copied().unwrap_or(0),
                        latest_version: latest,
                        missing_versions,
                        has_base: content.has_base,
                    });
                }
            }
        }

        if content.has_base && !info.dlc_ids.is_empty() {
            let missing_dlcs: Vec<MissingDlc> = info
                .dlc_ids
                .iter()
                .filter(|dlc| !content.dlc_app_ids.contains(&dlc.to_ascii_uppercase()))
                .map(|dlc| MissingDlc {
                    app_id: dlc.clone(),
                    name: titles
                        .lookup(dlc)
                        .map(|d| d.name)
                        .unwrap_or_else(|| format!("DLC {}", dlc)),
                })
                .collect();
            if !missing_dlcs.is_empty() {
                report.summary.total_missing_dlc += missing_dlcs.len();
                report.missing_dlc.push(TitleMissingDlc {
                    title_id,
                    name,
                    total_dlc: info.dlc_ids.len(),
                    owned_dlc: content.dlc_app_ids.len(),
                    missing_dlcs,
                });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog_store::{IdentificationMode, TitleIdentity};
    use crate::titledb::{InMemoryTitleSource, TitleInfo};

    fn entry(library: &str, name: &str, title_id: &str, app_id: &str, kind: ContentKind, version: u64) -> CatalogEntry {
        CatalogEntry {
            id: 0,
            filepath: PathBuf::from(format!("{}/{}", library, name)),
            library: PathBuf::from(library),
            filename: name.to_string(),
            extension: "nsp".to_string(),
            identity: Some(TitleIdentity {
                title_id: title_id.to_string(),
                app_id: app_id.to_string(),
                kind,
                version,
            }),
            size: 1,
            identification: IdentificationMode::Filename,
        }
    }

    fn titles() -> InMemoryTitleSource {
        let mut t = InMemoryTitleSource::new();
        t.insert(TitleInfo {
            id: "0100000000010000".to_string(),
            name: "Game".to_string(),
            versions: vec![65536, 131072],
            dlc_ids: vec!["0100000000011001".to_string(), "0100000000011002".to_string()],
            ..Default::default()
        });
        t.insert(TitleInfo {
            id: "0100000000011002".to_string(),
            name: "Second Pack".to_string(),
            ..Default::default()
        });
        t
    }

    #[test]
    fn test_reports_missing_updates_and_dlc() {
        let entries = vec![
            entry("/a", "g.nsp", "0100000000010000", "0100000000010000", ContentKind::Base, 0),
            entry("/a", "u.nsp", "0100000000010000", "0100000000010800", ContentKind::Update, 65536),
            entry("/a", "d.nsp", "0100000000010000", "0100000000011001", ContentKind::Dlc, 0),
        ];
        let report = missing_content(&entries, &titles(), None);

        assert!(report.missing_base.is_empty());
        assert_eq!(report.missing_updates.len(), 1);
        assert_eq!(report.missing_updates[0].current_version, 65536);
        assert_eq!(report.missing_updates[0].missing_versions, vec![131072]);
        assert_eq!(report.missing_dlc.len(), 1);
        assert_eq!(report.missing_dlc[0].missing_dlcs[0].name, "Second Pack");
        assert_eq!(report.summary.total_missing_dlc, 1);
        assert_eq!(report.summary.total_missing_updates, 1);
    }

    #[test]
    fn test_reports_missing_base_and_respects_roots() {
        let entries = vec![
            entry("/a", "u.nsp", "0100000000010000", "0100000000010800", ContentKind::Update, 131072),
            entry("/b", "g.nsp", "0100000000010000", "0100000000010000", ContentKind::Base, 0),
        ];
        let roots = vec![PathBuf::from("/a")];
        let report = missing_content(&entries, &titles(), Some(&roots));

        assert_eq!(report.missing_base.len(), 1);
        assert_eq!(report.missing_base[0].name.as_deref(), Some("Game"));
        assert!(report.missing_base[0].has_updates);
        assert!(report.missing_updates.is_empty());
        assert!(report.missing_dlc.is_empty());
    }
}
