use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use relocate_core::Warnings;
use serde::Serialize;
use walkdir::WalkDir;

use crate::StoreLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Database,
    Files,
    Unknown,
}

impl BackupKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Files => "files",
            Self::Unknown => "unknown",
        }
    }

    pub fn infer_from_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.starts_with("database") || lower.starts_with("db") {
            return Self::Database;
        }
        if lower.starts_with("files") || lower.starts_with("file") {
            return Self::Files;
        }
        Self::Unknown
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub kind: BackupKind,
    pub size_bytes: u64,
    pub modified_unix: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub kept: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    pub warnings: Warnings,
}

pub fn list_backups(layout: &StoreLayout) -> Result<Vec<BackupEntry>> {
    let dir = layout.backups_dir();
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut entries = Vec::new();
    for entry in fs::read_dir(&dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        let metadata = fs::metadata(&path)
            .with_context(|| format!("failed to stat backup entry {}", path.display()))?;
        let modified_unix = metadata
            .modified()
            .ok()
            .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
            .map(|duration| duration.as_secs())
            .unwrap_or(0);
        let size_bytes = if metadata.is_dir() {
            dir_size(&path)
        } else {
            metadata.len()
        };
        entries.push(BackupEntry {
            kind: BackupKind::infer_from_name(&name),
            name,
            path,
            size_bytes,
            modified_unix,
        });
    }

    entries.sort_by(|left, right| {
        right
            .modified_unix
            .cmp(&left.modified_unix)
            .then_with(|| right.name.cmp(&left.name))
    });
    Ok(entries)
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|metadata| metadata.len())
        .sum()
}

pub fn prune_backups(layout: &StoreLayout, keep: usize) -> Result<PruneReport> {
    let entries = list_backups(layout)?;
    let mut report = PruneReport::default();
    for (index, entry) in entries.into_iter().enumerate() {
        if index < keep {
            report.kept.push(entry.path);
            continue;
        }

        let result = if entry.path.is_dir() {
            fs::remove_dir_all(&entry.path)
        } else {
            fs::remove_file(&entry.path)
        };
        match result {
            Ok(()) => {
                log::info!("pruned backup {}", entry.path.display());
                report.removed.push(entry.path);
            }
            Err(err) => report.warnings.cleanup(format!(
                "failed to prune backup {}: {err}",
                entry.path.display()
            )),
        }
    }
    Ok(report)
}
