use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use relocate_core::{ensure_readable_archive, require_format, MigrationConfig, Warnings};
use relocate_store::{detect_admin_dir, find_admin_dirs, StoreLayout};
use serde::Serialize;

use crate::config_patch::{
    live_credentials, patch_db_config_file, patch_url_file, DbConfigFile, UrlPatch,
    HTACCESS_FILE, ROBOTS_FILE,
};
use crate::{apply_file_mappings, copy_tree, extract_archive, CopyStats, ExclusionRuleSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FileMigrationReport {
    pub backup_admin_dir: Option<String>,
    pub live_admin_dir: Option<String>,
    pub extracted_entries: usize,
    pub patched_files: Vec<String>,
    pub mapped_entries: usize,
    pub copy: CopyStats,
    pub removed_admin_dirs: Vec<String>,
    pub warnings: Warnings,
}

struct ExtractionDir {
    path: PathBuf,
    removed: bool,
}

impl ExtractionDir {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            removed: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn remove(mut self, warnings: &mut Warnings) {
        self.removed = true;
        if let Err(err) = fs::remove_dir_all(&self.path) {
            warnings.cleanup(format!(
                "failed to remove extraction dir {}: {err}",
                self.path.display()
            ));
        }
    }
}

impl Drop for ExtractionDir {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            log::warn!(
                "failed to remove extraction dir {}: {err}",
                self.path.display()
            );
        }
    }
}

pub struct FileTreeMigrator<'a> {
    layout: &'a StoreLayout,
    config: &'a MigrationConfig,
    exclusions: ExclusionRuleSet,
}

impl<'a> FileTreeMigrator<'a> {
    pub fn new(layout: &'a StoreLayout, config: &'a MigrationConfig) -> Self {
        Self {
            layout,
            config,
            exclusions: ExclusionRuleSet::for_self_module(config.self_module.as_deref()),
        }
    }

    pub fn with_exclusions(mut self, exclusions: ExclusionRuleSet) -> Self {
        self.exclusions = exclusions;
        self
    }

    pub fn migrate(&self, archive: &Path) -> Result<FileMigrationReport> {
        ensure_readable_archive(archive, "files archive")?;
        require_format(archive)?;
        self.layout.ensure_directories()?;

        let extraction = ExtractionDir::new(self.layout.make_tmp_dir("files")?);
        let mut report = FileMigrationReport::default();
        let outcome = self.migrate_into(archive, extraction.path(), &mut report);
        extraction.remove(&mut report.warnings);
        outcome?;
        Ok(report)
    }

    fn migrate_into(
        &self,
        archive: &Path,
        tree: &Path,
        report: &mut FileMigrationReport,
    ) -> Result<()> {
        log::info!("extracting {} into {}", archive.display(), tree.display());
        report.extracted_entries = extract_archive(archive, tree)?;

        report.backup_admin_dir = detect_admin_dir(tree)?.map(|candidate| candidate.name);
        report.live_admin_dir = match self.layout.admin_dir_name() {
            Ok(name) => Some(name),
            Err(err) => {
                log::info!("no live admin directory: {err:#}");
                None
            }
        };

        if self.config.preserve_db_config {
            self.patch_db_config(tree, report);
        }
        self.patch_url_files(tree, report);
        report.mapped_entries =
            apply_file_mappings(tree, &self.config.file_mappings, &mut report.warnings);

        let installation_root = self.layout.installation_root();
        report.copy = copy_tree(tree, installation_root, &self.exclusions)?;
        log::info!(
            "copied {} file(s) and {} dir(s) into {}, {} excluded",
            report.copy.files,
            report.copy.directories,
            installation_root.display(),
            report.copy.skipped
        );

        self.remove_stale_admin_dirs(report);
        Ok(())
    }

    fn patch_db_config(&self, tree: &Path, report: &mut FileMigrationReport) {
        let Some(credentials) = live_credentials(self.layout.installation_root(), self.config)
        else {
            report
                .warnings
                .rewrite("preserve_db_config is set but no live database credentials were found");
            return;
        };
        for file in DbConfigFile::ALL {
            let relative = file.relative_path();
            let path = tree.join(relative);
            if !path.is_file() {
                continue;
            }
            match patch_db_config_file(&path, file, &credentials) {
                Ok(true) => report.patched_files.push(relative.to_string()),
                Ok(false) => {}
                Err(err) => report
                    .warnings
                    .rewrite(format!("failed to patch {relative}: {err:#}")),
            }
        }
    }

    fn patch_url_files(&self, tree: &Path, report: &mut FileMigrationReport) {
        let Some(patch) = UrlPatch::from_config(self.config) else {
            return;
        };
        for relative in [HTACCESS_FILE, ROBOTS_FILE] {
            let path = tree.join(relative);
            if !path.is_file() {
                continue;
            }
            match patch_url_file(&path, &patch) {
                Ok(true) => report.patched_files.push(relative.to_string()),
                Ok(false) => {}
                Err(err) => report
                    .warnings
                    .rewrite(format!("failed to patch {relative}: {err:#}")),
            }
        }
    }

    fn remove_stale_admin_dirs(&self, report: &mut FileMigrationReport) {
        let (Some(backup_admin), Some(live_admin)) =
            (report.backup_admin_dir.clone(), report.live_admin_dir.as_deref())
        else {
            return;
        };
        if backup_admin == live_admin {
            return;
        }

        let root = self.layout.installation_root();
        let candidates = match find_admin_dirs(root) {
            Ok(candidates) => candidates,
            Err(err) => {
                report
                    .warnings
                    .cleanup(format!("failed to scan admin directories: {err:#}"));
                return;
            }
        };
        for candidate in candidates {
            if candidate.name == backup_admin {
                continue;
            }
            if self
                .exclusions
                .is_excluded(Path::new(&candidate.name), true)
            {
                continue;
            }
            match fs::remove_dir_all(&candidate.path) {
                Ok(()) => {
                    log::info!("removed stale admin directory {}", candidate.name);
                    report.removed_admin_dirs.push(candidate.name);
                }
                Err(err) => report.warnings.cleanup(format!(
                    "failed to remove admin directory {}: {err}",
                    candidate.name
                )),
            }
        }
    }
}
