use std::fs;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use walkdir::WalkDir;

use crate::ExclusionRuleSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CopyStats {
    pub directories: usize,
    pub files: usize,
    pub skipped: usize,
}

pub fn copy_tree(src_root: &Path, dst_root: &Path, exclusions: &ExclusionRuleSet) -> Result<CopyStats> {
    fs::create_dir_all(dst_root)
        .with_context(|| format!("failed to create {}", dst_root.display()))?;

    let mut stats = CopyStats::default();
    let mut skipped = 0;
    {
        let walker = WalkDir::new(src_root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| {
                let relative = entry.path().strip_prefix(src_root).unwrap_or(entry.path());
                let excluded = exclusions.is_excluded(relative, entry.file_type().is_dir());
                if excluded {
                    log::debug!("excluded from copy: {}", relative.display());
                    skipped += 1;
                }
                !excluded
            });

        for entry in walker {
            let entry = entry.with_context(|| format!("failed to walk {}", src_root.display()))?;
            let relative = entry
                .path()
                .strip_prefix(src_root)
                .map_err(|_| anyhow!("{} escaped the copy root", entry.path().display()))?;
            let target = dst_root.join(relative);
            let file_type = entry.file_type();

            if file_type.is_dir() {
                fs::create_dir_all(&target)
                    .with_context(|| format!("failed to create {}", target.display()))?;
                stats.directories += 1;
                continue;
            }

            if file_type.is_symlink() {
                copy_symlink(entry.path(), &target)?;
                stats.files += 1;
                continue;
            }

            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "failed to copy {} to {}",
                    entry.path().display(),
                    target.display()
                )
            })?;
            stats.files += 1;
        }
    }
    stats.skipped = skipped;
    Ok(stats)
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    let link_target =
        fs::read_link(src).with_context(|| format!("failed to read symlink {}", src.display()))?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)
            .with_context(|| format!("failed to replace {}", dst.display()))?;
    }
    std::os::unix::fs::symlink(&link_target, dst).with_context(|| {
        format!(
            "failed to create symlink {} -> {}",
            dst.display(),
            link_target.display()
        )
    })
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> Result<()> {
    fs::copy(src, dst)
        .with_context(|| format!("failed to copy {} to {}", src.display(), dst.display()))?;
    Ok(())
}
