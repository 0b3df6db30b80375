//! Canonical names for organized files.

use crate::catalog_store::{ContentKind, TitleIdentity};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*]"#).expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

pub const MAX_NAME_CHARS: usize = 200;
pub const MAX_FILENAME_BYTES: usize = 255;

/// Strip characters most filesystems reject, collapse whitespace, trim dots and
/// spaces from both ends, and cap the length.
pub fn sanitize_name(name: &str) -> String {
    let stripped = INVALID_CHARS.replace_all(name, "");
    let collapsed = WHITESPACE.replace_all(&stripped, " ");
    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(MAX_NAME_CHARS).collect();
    capped.trim_end_matches(|c| c == '.' || c == ' ').to_string()
}

fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Filename in the canonical pattern:
///
/// - BASE: `Title [app_id][version].ext`
/// - UPDATE: `Title [app_id][vversion].ext`
/// - DLC: `Title - DlcName [app_id][vversion].ext`, or the update form when the DLC
///   has no name of its own
///
/// `title_name` and `dlc_name` must already be sanitized.
pub fn organized_filename(
    identity: &TitleIdentity,
    title_name: &str,
    dlc_name: Option<&str>,
    extension: &str,
) -> String {
    let tag = match identity.kind {
        ContentKind::Base => format!("[{}][{}]", identity.app_id, identity.version),
        ContentKind::Update | ContentKind::Dlc => {
            format!("[{}][v{}]", identity.app_id, identity.version)
        }
    };
    let name = match (identity.kind, dlc_name) {
        (ContentKind::Dlc, Some(dlc)) if !dlc.is_empty() && dlc != title_name => {
            format!("{} - {}", title_name, dlc)
        }
        _ => title_name.to_string(),
    };
    let suffix = if extension.is_empty() {
        format!(" {}", tag)
    } else {
        format!(" {}.{}", tag, extension)
    };

    let budget = MAX_FILENAME_BYTES.saturating_sub(suffix.len());
    let name = truncate_to_bytes(&name, budget).trim_end();
    format!("{}{}", name, suffix)
}

/// `<root>/<Title>/<BASE|UPDATES|DLC>`
pub fn organized_dir(root: &Path, title_name: &str, kind: ContentKind) -> PathBuf {
    root.join(title_name).join(kind.folder_name())
}
