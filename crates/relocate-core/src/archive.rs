use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::MigrationError;

pub const METADATA_FILE_NAME: &str = "metadata.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilesArchiveFormat {
    TarGz,
    Zip,
}

impl FilesArchiveFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }

    pub fn infer_from_path(path: &Path) -> Option<Self> {
        let lower = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if lower.ends_with(".zip") {
            return Some(Self::Zip);
        }
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DumpCompression {
    None,
    Gzip,
}

impl DumpCompression {
    pub fn detect(path: &Path) -> Result<Self> {
        let mut file =
            File::open(path).with_context(|| format!("failed to open dump: {}", path.display()))?;
        let mut magic = [0_u8; 2];
        let read = read_prefix(&mut file, &mut magic)
            .with_context(|| format!("failed to read dump header: {}", path.display()))?;
        if read == 2 && magic == [0x1f, 0x8b] {
            return Ok(Self::Gzip);
        }
        Ok(Self::None)
    }
}

fn read_prefix(reader: &mut dyn Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..])?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupMetadata {
    pub created_at: Option<String>,
    pub platform_version: Option<String>,
    pub source_url: Option<String>,
    pub database_sha256: Option<String>,
    pub files_sha256: Option<String>,
}

impl BackupMetadata {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("failed parsing backup metadata JSON")
    }

    pub fn created_at_unix(&self) -> Option<i64> {
        let raw = self.created_at.as_deref()?.trim();
        if let Ok(parsed) = chrono::DateTime::parse_from_rfc3339(raw) {
            return Some(parsed.timestamp());
        }
        chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
            .ok()
            .map(|naive| naive.and_utc().timestamp())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArchive {
    pub root: PathBuf,
    pub database_dump: PathBuf,
    pub files_archive: PathBuf,
    pub metadata: BackupMetadata,
}

impl BackupArchive {
    pub fn open_dir(root: &Path) -> Result<Self> {
        if !root.is_dir() {
            return Err(archive_error(
                format!("backup directory not found: {}", root.display()),
                root,
            )
            .into());
        }

        let mut dumps = Vec::new();
        let mut trees = Vec::new();
        let mut metadata_path = None;
        for entry in fs::read_dir(root)
            .with_context(|| format!("failed to read backup directory: {}", root.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if name == METADATA_FILE_NAME {
                metadata_path = Some(path);
            } else if is_dump_name(&name) {
                dumps.push(path);
            } else if FilesArchiveFormat::infer_from_path(&path).is_some() {
                trees.push(path);
            }
        }
        dumps.sort();
        trees.sort();

        let database_dump = single_candidate(dumps, "database dump", root)?;
        let files_archive = single_candidate(trees, "files archive", root)?;
        let metadata = match metadata_path {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                BackupMetadata::parse(&raw)
                    .with_context(|| format!("invalid backup metadata: {}", path.display()))?
            }
            None => {
                log::warn!("backup {} has no {METADATA_FILE_NAME}", root.display());
                BackupMetadata::default()
            }
        };

        Ok(Self {
            root: root.to_path_buf(),
            database_dump,
            files_archive,
            metadata,
        })
    }

    pub fn verify_checksums(&self) -> Result<()> {
        for (label, expected, path) in [
            (
                "database dump",
                self.metadata.database_sha256.as_deref(),
                &self.database_dump,
            ),
            (
                "files archive",
                self.metadata.files_sha256.as_deref(),
                &self.files_archive,
            ),
        ] {
            let Some(expected) = expected else {
                continue;
            };
            let actual = sha256_file_hex(path)?;
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(MigrationError::Archive {
                    message: format!(
                        "{label} checksum mismatch for {}: expected {}, got {actual}",
                        path.display(),
                        expected.trim()
                    ),
                    listing: Vec::new(),
                }
                .into());
            }
        }
        Ok(())
    }
}

fn is_dump_name(name: &str) -> bool {
    name.ends_with(".sql")
        || name.ends_with(".sql.gz")
        || name.ends_with(".sqlite")
        || name.ends_with(".db")
}

fn single_candidate(mut candidates: Vec<PathBuf>, label: &str, root: &Path) -> Result<PathBuf> {
    match candidates.len() {
        0 => Err(archive_error(format!("backup has no {label}: {}", root.display()), root).into()),
        1 => Ok(candidates.remove(0)),
        _ => {
            let chosen = candidates.remove(0);
            log::warn!(
                "backup {} contains several {label} candidates; using {}",
                root.display(),
                chosen.display()
            );
            Ok(chosen)
        }
    }
}

pub fn archive_error(message: String, dir: &Path) -> MigrationError {
    MigrationError::Archive {
        message,
        listing: list_dir_names(dir),
    }
}

pub fn list_dir_names(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut names = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>();
    names.sort();
    names
}

pub fn sha256_file_hex(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0_u8; 64 * 1024];
    loop {
        let read = file
            .read(&mut buffer)
            .with_context(|| format!("failed to read {}", path.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn ensure_readable_archive(path: &Path, label: &str) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let metadata = fs::metadata(path)
        .map_err(|err| archive_error(format!("{label} not found: {} ({err})", path.display()), parent))?;
    if !metadata.is_file() {
        return Err(archive_error(format!("{label} is not a file: {}", path.display()), parent).into());
    }
    if metadata.len() == 0 {
        return Err(archive_error(format!("{label} is empty: {}", path.display()), parent).into());
    }
    File::open(path).map_err(|err| {
        archive_error(
            format!("{label} is not readable: {} ({err})", path.display()),
            parent,
        )
    })?;
    Ok(())
}

pub fn require_format(path: &Path) -> Result<FilesArchiveFormat> {
    FilesArchiveFormat::infer_from_path(path).ok_or_else(|| {
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        archive_error(
            format!(
                "unsupported files archive type (expected .tar.gz, .tgz or .zip): {}",
                path.display()
            ),
            parent,
        )
        .into()
    })
}
