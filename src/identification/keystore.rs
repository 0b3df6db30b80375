//! Console key file (`prod.keys` style: `name = hexvalue` per line).

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Key that must be present for container metadata to be readable.
pub const REQUIRED_KEY: &str = "header_key";

#[derive(Debug, Clone, Default)]
pub struct Keystore {
    keys: HashMap<String, Vec<u8>>,
    malformed_lines: usize,
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.is_empty() || s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(s.get(i..i + 2)?, 16).ok())
        .collect()
}

impl Keystore {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read keys file: {:?}", path))?;
        let keystore = Self::parse(&content);
        if keystore.malformed_lines > 0 {
            warn!(
                "Keys file {:?} has {} malformed lines",
                path, keystore.malformed_lines
            );
        }
        Ok(keystore)
    }

    pub fn parse(content: &str) -> Self {
        let mut keystore = Keystore::default();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            let parsed = line.split_once('=').and_then(|(name, value)| {
                let name = name.trim().to_ascii_lowercase();
                let value = decode_hex(value.trim())?;
                (!name.is_empty()).then_some((name, value))
            });
            match parsed {
                Some((name, value)) => {
                    keystore.keys.insert(name, value);
                }
                None => keystore.malformed_lines += 1,
            }
        }
        keystore
    }

    /// Usable for content identification: the header key is present and every
    /// line of the source parsed.
    pub fn is_valid(&self) -> bool {
        self.malformed_lines == 0 && self.keys.contains_key(REQUIRED_KEY)
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.keys.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
