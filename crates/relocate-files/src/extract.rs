use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use relocate_core::{
    ensure_readable_archive, require_format, BackupArchive, FilesArchiveFormat, MigrationError,
    Warnings,
};
use relocate_store::StoreLayout;

pub fn extract_archive(archive_path: &Path, dest: &Path) -> Result<usize> {
    let format = require_format(archive_path)?;
    fs::create_dir_all(dest)
        .with_context(|| format!("failed to create extraction dir {}", dest.display()))?;
    match format {
        FilesArchiveFormat::TarGz => extract_tar_gz(archive_path, dest),
        FilesArchiveFormat::Zip => extract_zip(archive_path, dest),
    }
}

fn unusable(archive_path: &Path, detail: impl std::fmt::Display) -> MigrationError {
    MigrationError::Archive {
        message: format!("archive {} is unusable: {detail}", archive_path.display()),
        listing: Vec::new(),
    }
}

fn is_enclosed(path: &Path) -> bool {
    path.components()
        .all(|component| matches!(component, Component::Normal(_) | Component::CurDir))
}

fn extract_tar_gz(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = tar::Archive::new(GzDecoder::new(BufReader::new(file)));
    let entries = archive
        .entries()
        .map_err(|err| unusable(archive_path, err))?;

    let mut written = 0;
    for entry in entries {
        let mut entry = entry.map_err(|err| unusable(archive_path, err))?;
        let entry_path = entry
            .path()
            .map_err(|err| unusable(archive_path, err))?
            .into_owned();
        if !is_enclosed(&entry_path) {
            return Err(unusable(
                archive_path,
                format!("refused unsafe entry path {}", entry_path.display()),
            )
            .into());
        }
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|err| unusable(archive_path, format!("{}: {err}", entry_path.display())))?;
        if !unpacked {
            return Err(unusable(
                archive_path,
                format!("refused unsafe entry path {}", entry_path.display()),
            )
            .into());
        }
        written += 1;
    }
    Ok(written)
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<usize> {
    let file = File::open(archive_path)
        .with_context(|| format!("failed to open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| unusable(archive_path, err))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| unusable(archive_path, err))?;
        let enclosed = entry.enclosed_name().ok_or_else(|| {
            unusable(
                archive_path,
                format!("refused unsafe entry path {}", entry.name()),
            )
        })?;

        let output_path = dest.join(enclosed);
        if entry.is_dir() {
            fs::create_dir_all(&output_path)
                .with_context(|| format!("failed to create {}", output_path.display()))?;
            continue;
        }
        if let Some(parent) = output_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut output = File::create(&output_path)
            .with_context(|| format!("failed to create {}", output_path.display()))?;
        io::copy(&mut entry, &mut output)
            .map_err(|err| unusable(archive_path, format!("{}: {err}", entry.name())))?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            let _ = fs::set_permissions(&output_path, fs::Permissions::from_mode(mode));
        }
    }
    Ok(archive.len())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedBackup {
    pub archive: BackupArchive,
    pub unpacked_dir: Option<PathBuf>,
}

impl OpenedBackup {
    pub fn cleanup(self, warnings: &mut Warnings) {
        let Some(dir) = self.unpacked_dir else {
            return;
        };
        if let Err(err) = fs::remove_dir_all(&dir) {
            warnings.cleanup(format!(
                "failed to remove unpacked backup {}: {err}",
                dir.display()
            ));
        }
    }
}

pub fn open_backup(source: &Path, layout: &StoreLayout) -> Result<OpenedBackup> {
    if source.is_dir() {
        return Ok(OpenedBackup {
            archive: BackupArchive::open_dir(source)?,
            unpacked_dir: None,
        });
    }

    ensure_readable_archive(source, "backup container")?;
    layout.ensure_directories()?;
    let dir = layout.make_tmp_dir("backup")?;
    let opened = extract_archive(source, &dir)
        .and_then(|_| backup_root(&dir))
        .and_then(|root| BackupArchive::open_dir(&root));
    match opened {
        Ok(archive) => {
            log::info!("unpacked backup {} into {}", source.display(), dir.display());
            Ok(OpenedBackup {
                archive,
                unpacked_dir: Some(dir),
            })
        }
        Err(err) => {
            if let Err(remove_err) = fs::remove_dir_all(&dir) {
                log::warn!("failed to remove {}: {remove_err}", dir.display());
            }
            Err(err)
        }
    }
}

fn backup_root(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("failed to read {}", dir.display()))?
        .collect::<io::Result<Vec<_>>>()?;
    if let [only] = entries.as_slice() {
        if only.file_type()?.is_dir() {
            return Ok(only.path());
        }
    }
    Ok(dir.to_path_buf())
}
