//! Zip, 7z and tar extraction with password candidates.

use sevenz_rust::Password;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported archive format: {0:?}")]
    Unsupported(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("7z error: {0}")]
    SevenZ(#[from] sevenz_rust::Error),

    #[error("Could not extract {path:?} with any of {attempts} passwords: {last}")]
    PasswordsExhausted {
        path: PathBuf,
        attempts: usize,
        last: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TarCompression {
    None,
    Gzip,
    Bzip2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveFormat {
    Zip,
    SevenZ,
    Tar(TarCompression),
}

// Longest suffixes first so ".tar.gz" is not read as plain gzip.
const SUFFIXES: &[(&str, ArchiveFormat)] = &[
    (".tar.gz", ArchiveFormat::Tar(TarCompression::Gzip)),
    (".tar.bz2", ArchiveFormat::Tar(TarCompression::Bzip2)),
    (".tgz", ArchiveFormat::Tar(TarCompression::Gzip)),
    (".tbz2", ArchiveFormat::Tar(TarCompression::Bzip2)),
    (".tar", ArchiveFormat::Tar(TarCompression::None)),
    (".zip", ArchiveFormat::Zip),
    (".7z", ArchiveFormat::SevenZ),
];

fn format_of(path: &Path) -> Option<ArchiveFormat> {
    let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
    SUFFIXES
        .iter()
        .find(|(suffix, _)| name.len() > suffix.len() && name.ends_with(suffix))
        .map(|(_, format)| *format)
}

pub fn is_archive(path: &Path) -> bool {
    format_of(path).is_some()
}

#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    passwords: Vec<String>,
}

impl Default for ArchiveExtractor {
    fn default() -> Self {
        Self::new(vec![String::new()])
    }
}

impl ArchiveExtractor {
    /// `passwords` are tried in order. An empty string means no password.
    pub fn new(passwords: Vec<String>) -> Self {
        let passwords = if passwords.is_empty() {
            vec![String::new()]
        } else {
            passwords
        };
        Self { passwords }
    }

    pub fn passwords(&self) -> &[String] {
        &self.passwords
    }

    /// Extract `archive` into `dest`, which must exist. The first password that
    /// extracts cleanly wins; partial output of failed attempts is discarded.
    pub fn extract(&self, archive: &Path, dest: &Path) -> Result<(), ExtractError> {
        let format = format_of(archive).ok_or_else(|| ExtractError::Unsupported(archive.into()))?;
        let extract_with: fn(&Path, &Path, &str) -> Result<(), ExtractError> = match format {
            ArchiveFormat::Zip => extract_zip,
            ArchiveFormat::SevenZ => extract_7z,
            // Tar has no encryption, one attempt is enough.
            ArchiveFormat::Tar(compression) => {
                if let Err(e) = extract_tar(archive, dest, compression) {
                    clear_dir(dest)?;
                    return Err(e);
                }
                debug!("Extracted {:?}", archive);
                return Ok(());
            }
        };

        let mut last = String::new();
        for (attempt, password) in self.passwords.iter().enumerate() {
            match extract_with(archive, dest, password) {
                Ok(()) => {
                    debug!("Extracted {:?} on attempt {}", archive, attempt + 1);
                    return Ok(());
                }
                Err(ExtractError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                    return Err(ExtractError::Io(e));
                }
                Err(e) => {
                    debug!("Attempt {} on {:?} failed: {}", attempt + 1, archive, e);
                    last = e.to_string();
                    clear_dir(dest)?;
                }
            }
        }

        Err(ExtractError::PasswordsExhausted {
            path: archive.to_path_buf(),
            attempts: self.passwords.len(),
            last,
        })
    }
}

fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}

fn extract_zip(path: &Path, dest: &Path, password: &str) -> Result<(), ExtractError> {
    let file = fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(io::BufReader::new(file))?;

    for i in 0..archive.len() {
        let mut entry = if password.is_empty() {
            archive.by_index(i)?
        } else {
            archive.by_index_decrypt(i, password.as_bytes())?
        };
        let Some(relative) = entry.enclosed_name() else {
            debug!("Skipping unsafe zip entry {}", entry.name());
            continue;
        };

        let out_path = dest.join(relative);
        if entry.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out_file = fs::File::create(&out_path)?;
        io::copy(&mut entry, &mut out_file)?;
    }
    Ok(())
}

fn extract_7z(path: &Path, dest: &Path, password: &str) -> Result<(), ExtractError> {
    if !path.exists() {
        return Err(io::Error::new(io::ErrorKind::NotFound, format!("{:?} not found", path)).into());
    }
    if password.is_empty() {
        sevenz_rust::decompress_file(path, dest)?;
    } else {
        sevenz_rust::decompress_file_with_password(path, dest, Password::from(password))?;
    }
    Ok(())
}

fn extract_tar(path: &Path, dest: &Path, compression: TarCompression) -> Result<(), ExtractError> {
    let file = io::BufReader::new(fs::File::open(path)?);
    let reader: Box<dyn io::Read> = match compression {
        TarCompression::None => Box::new(file),
        TarCompression::Gzip => Box::new(flate2::read::GzDecoder::new(file)),
        TarCompression::Bzip2 => Box::new(bzip2::read::BzDecoder::new(file)),
    };

    let mut archive = tar::Archive::new(reader);
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.unpack_in(dest)? {
            debug!("Skipping unsafe tar entry {:?}", entry.path()?);
        }
    }
    Ok(())
}
