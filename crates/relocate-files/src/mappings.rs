use std::collections::BTreeMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use relocate_core::Warnings;

pub fn safe_relative_path(raw: &str) -> Option<PathBuf> {
    let trimmed = raw.trim().trim_start_matches("./");
    if trimmed.is_empty() {
        return None;
    }
    let path = Path::new(trimmed);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(segment) => out.push(segment),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

pub fn apply_file_mappings(
    root: &Path,
    mappings: &BTreeMap<String, String>,
    warnings: &mut Warnings,
) -> usize {
    let mut applied = 0;
    for (source, destination) in mappings {
        let (Some(source_rel), Some(destination_rel)) =
            (safe_relative_path(source), safe_relative_path(destination))
        else {
            warnings.rewrite(format!(
                "file mapping {source} -> {destination} ignored: paths must be relative"
            ));
            continue;
        };

        let from = root.join(&source_rel);
        let to = root.join(&destination_rel);
        if fs::symlink_metadata(&from).is_err() {
            warnings.rewrite(format!(
                "file mapping {source} -> {destination} ignored: source not found"
            ));
            continue;
        }
        if fs::symlink_metadata(&to).is_ok() {
            warnings.rewrite(format!(
                "file mapping {source} -> {destination} ignored: destination exists"
            ));
            continue;
        }
        if let Some(parent) = to.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warnings.rewrite(format!(
                    "file mapping {source} -> {destination} failed: {err}"
                ));
                continue;
            }
        }
        match fs::rename(&from, &to) {
            Ok(()) => {
                log::info!("mapped {source} -> {destination}");
                applied += 1;
            }
            Err(err) => warnings.rewrite(format!(
                "file mapping {source} -> {destination} failed: {err}"
            )),
        }
    }
    applied
}
