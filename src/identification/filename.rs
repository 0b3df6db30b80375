//! Identification from filename conventions alone.
//!
//! Scene and dump tools name files like `Game Name [0100ABCD00010000][v131072].nsp`.
//! The 16-hex-digit id is the content's app id; its low three digits tell the kind.

use super::{FileIdentifier, IdentifyError, Keystore};
use crate::catalog_store::{ContentKind, TitleIdentity};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

static TITLE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([0-9A-Fa-f]{16})\]").expect("valid regex"));
static VERSION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[v(\d+)\]").expect("valid regex"));
static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]|\([^)]*\)").expect("valid regex"));
static DISALLOWED_NAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^\w\s\-]").expect("valid regex"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

const UPDATE_SUFFIX: u64 = 0x800;
const DLC_OFFSET: u64 = 0x1000;
const LOW_BITS: u64 = 0xFFF;

/// Kind implied by an app id's trailing digits: `000` base, `800` update, otherwise DLC.
pub fn kind_from_app_id(app_id: &str) -> ContentKind {
    match u64::from_str_radix(app_id, 16).map(|id| id & LOW_BITS) {
        Ok(0) => ContentKind::Base,
        Ok(UPDATE_SUFFIX) => ContentKind::Update,
        _ => ContentKind::Dlc,
    }
}

/// Base title id for an app id of the given kind.
pub fn base_title_id(app_id: &str, kind: ContentKind) -> Option<String> {
    let id = u64::from_str_radix(app_id, 16).ok()?;
    let base = match kind {
        ContentKind::Base => id,
        ContentKind::Update => id & !LOW_BITS,
        ContentKind::Dlc => id.checked_sub(DLC_OFFSET)? & !LOW_BITS,
    };
    Some(format!("{:016X}", base))
}

/// Best-effort human title name from a filename: extension, bracketed and
/// parenthesized tags, and punctuation are dropped.
pub fn extract_name_from_filename(filename: &str) -> Option<String> {
    let stem = Path::new(filename)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| filename.to_string());
    let without_tags = BRACKETED.replace_all(&stem, " ");
    let cleaned = DISALLOWED_NAME_CHARS.replace_all(&without_tags, " ");
    let name = WHITESPACE.replace_all(cleaned.trim(), " ").to_string();
    (!name.is_empty()).then_some(name)
}

#[derive(Debug, Default, Clone)]
pub struct FilenameIdentifier;

impl FilenameIdentifier {
    pub fn new() -> Self {
        Self
    }
}

impl FileIdentifier for FilenameIdentifier {
    fn identify(
        &self,
        path: &Path,
        _keystore: Option<&Keystore>,
    ) -> Result<TitleIdentity, IdentifyError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| IdentifyError::Unrecognized(path.to_path_buf()))?;

        let app_id = TITLE_ID_PATTERN
            .captures(&filename)
            .map(|c| c[1].to_ascii_uppercase())
            .ok_or_else(|| IdentifyError::MissingTitleId(filename.clone()))?;

        let version = match VERSION_PATTERN.captures(&filename) {
            Some(c) => c[1]
                .parse::<u64>()
                .map_err(|_| IdentifyError::InvalidVersion(c[1].to_string()))?,
            None => 0,
        };

        let kind = kind_from_app_id(&app_id);
        let title_id = base_title_id(&app_id, kind)
            .ok_or_else(|| IdentifyError::MissingTitleId(filename.clone()))?;

        Ok(TitleIdentity {
            title_id,
            app_id,
            kind,
            version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identify_base() {
        let id = FilenameIdentifier::new()
            .identify(Path::new("/lib/Zelda [01007EF00011E000][v0].nsp"), None)
            .unwrap();
        assert_eq!(id.kind, ContentKind::Base);
        assert_eq!(id.app_id, "01007EF00011E000");
        assert_eq!(id.title_id, "01007EF00011E000");
        assert_eq!(id.version, 0);
    }

    #[test]
    fn test_identify_update() {
        let id = FilenameIdentifier::new()
            .identify(Path::new("Zelda [01007ef00011e800][v786432].nsp"), None)
            .unwrap();
        assert_eq!(id.kind, ContentKind::Update);
        assert_eq!(id.app_id, "01007EF00011E800");
        assert_eq!(id.title_id, "01007EF00011E000");
        assert_eq!(id.version, 786432);
    }

    #[test]
    fn test_identify_dlc() {
        let id = FilenameIdentifier::new()
            .identify(Path::new("Zelda - Pass [01007EF00011F001][v65536].nsp"), None)
            .unwrap();
        assert_eq!(id.kind, ContentKind::Dlc);
        assert_eq!(id.title_id, "01007EF00011E000");
    }

    #[test]
    fn test_identify_without_id_fails() {
        let err = FilenameIdentifier::new()
            .identify(Path::new("Some Game.nsp"), None)
            .unwrap_err();
        assert!(matches!(err, IdentifyError::MissingTitleId(_)));
    }

    #[test]
    fn test_extract_name() {
        assert_eq!(
            extract_name_from_filename("Super Game: Deluxe [0100000000010000][v0] (USA).nsp"),
            Some("Super Game Deluxe".to_string())
        );
        assert_eq!(extract_name_from_filename("[0100000000010000].nsp"), None);
    }
}
