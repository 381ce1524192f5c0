use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const ADMIN_MARKERS: [&str; 6] = [
    "index.php",
    "themes",
    "tabs",
    "filemanager",
    "functions.php",
    "init.php",
];

pub const ADMIN_SCORE_THRESHOLD: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminDirectoryCandidate {
    pub name: String,
    pub path: PathBuf,
    pub score: usize,
}

impl AdminDirectoryCandidate {
    pub fn qualifies(&self) -> bool {
        self.score >= ADMIN_SCORE_THRESHOLD
    }
}

pub fn admin_score(dir: &Path) -> usize {
    ADMIN_MARKERS
        .iter()
        .filter(|marker| fs::symlink_metadata(dir.join(marker)).is_ok())
        .count()
}

pub fn scan_admin_candidates(root: &Path) -> Result<Vec<AdminDirectoryCandidate>> {
    let mut candidates = Vec::new();
    for entry in fs::read_dir(root).with_context(|| format!("failed to read {}", root.display()))? {
        let entry = entry?;
        let file_type = entry
            .file_type()
            .with_context(|| format!("failed to stat {}", entry.path().display()))?;
        if !file_type.is_dir() {
            continue;
        }
        let path = entry.path();
        candidates.push(AdminDirectoryCandidate {
            name: entry.file_name().to_string_lossy().into_owned(),
            score: admin_score(&path),
            path,
        });
    }
    candidates.sort_by(|left, right| left.name.cmp(&right.name));
    Ok(candidates)
}

pub fn find_admin_dirs(root: &Path) -> Result<Vec<AdminDirectoryCandidate>> {
    Ok(scan_admin_candidates(root)?
        .into_iter()
        .filter(AdminDirectoryCandidate::qualifies)
        .collect())
}

pub fn detect_admin_dir(root: &Path) -> Result<Option<AdminDirectoryCandidate>> {
    let mut qualifying = find_admin_dirs(root)?;
    if qualifying.len() > 1 {
        let others = qualifying[1..]
            .iter()
            .map(|candidate| format!("{} (score {})", candidate.name, candidate.score))
            .collect::<Vec<_>>();
        log::warn!(
            "several admin directories under {}; using {} and ignoring {}",
            root.display(),
            qualifying[0].name,
            others.join(", ")
        );
    }
    if qualifying.is_empty() {
        return Ok(None);
    }
    Ok(Some(qualifying.remove(0)))
}
