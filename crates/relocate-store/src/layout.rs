use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use relocate_core::MigrationError;

use crate::admin::detect_admin_dir;

static TMP_NAME_COUNTER: AtomicU64 = AtomicU64::new(0);

const WRITE_PROBE_NAME: &str = ".relocate-write-probe";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    WorkspaceRoot,
    BackupStore,
    LogStore,
    InstallationRoot,
    AdminDirectory,
}

impl PathKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WorkspaceRoot => "workspace",
            Self::BackupStore => "backups",
            Self::LogStore => "logs",
            Self::InstallationRoot => "installation",
            Self::AdminDirectory => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    workspace_root: PathBuf,
    installation_root: PathBuf,
    admin_dir_name: Option<String>,
}

impl StoreLayout {
    pub fn new(workspace_root: impl Into<PathBuf>, installation_root: impl Into<PathBuf>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            installation_root: installation_root.into(),
            admin_dir_name: None,
        }
    }

    pub fn with_admin_dir_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.admin_dir_name = (!name.trim().is_empty()).then(|| name.trim().to_string());
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    pub fn installation_root(&self) -> &Path {
        &self.installation_root
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.workspace_root.join("backups")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.workspace_root.join("logs")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.workspace_root.join("tmp")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.workspace_root.join("state")
    }

    pub fn migration_state_path(&self) -> PathBuf {
        self.state_dir().join("migration.json")
    }

    pub fn resolve(&self, kind: PathKind) -> Result<PathBuf> {
        Ok(match kind {
            PathKind::WorkspaceRoot => self.workspace_root.clone(),
            PathKind::BackupStore => self.backups_dir(),
            PathKind::LogStore => self.logs_dir(),
            PathKind::InstallationRoot => self.installation_root.clone(),
            PathKind::AdminDirectory => self.installation_root.join(self.admin_dir_name()?),
        })
    }

    pub fn admin_dir_name(&self) -> Result<String> {
        if let Some(name) = &self.admin_dir_name {
            return Ok(name.clone());
        }
        let candidate = detect_admin_dir(&self.installation_root)?.ok_or_else(|| {
            MigrationError::directory(format!(
                "no admin directory detected under {}",
                self.installation_root.display()
            ))
        })?;
        Ok(candidate.name)
    }

    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.workspace_root.clone(),
            self.backups_dir(),
            self.logs_dir(),
            self.tmp_dir(),
            self.state_dir(),
        ] {
            create_owner_dir(&dir)?;
            ensure_writable(&dir)?;
        }
        Ok(())
    }

    pub fn unique_tmp_path(&self, prefix: &str, extension: &str) -> Result<PathBuf> {
        let unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system time is before unix epoch")?
            .as_secs();
        let sequence = TMP_NAME_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = format!("{prefix}-{}-{unix}-{sequence}", std::process::id());
        if !extension.is_empty() {
            name.push('.');
            name.push_str(extension);
        }
        Ok(self.tmp_dir().join(name))
    }

    pub fn make_tmp_dir(&self, prefix: &str) -> Result<PathBuf> {
        let dir = self.unique_tmp_path(prefix, "")?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating tmp dir: {}", dir.display()))?;
        Ok(dir)
    }
}

fn create_owner_dir(dir: &Path) -> Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir).map_err(|err| {
        MigrationError::directory(format!("failed to create {}: {err}", dir.display()))
    })?;
    if !dir.is_dir() {
        return Err(MigrationError::directory(format!(
            "{} exists but is not a directory",
            dir.display()
        ))
        .into());
    }
    Ok(())
}

fn ensure_writable(dir: &Path) -> Result<()> {
    let probe = dir.join(WRITE_PROBE_NAME);
    fs::write(&probe, b"").map_err(|err| {
        MigrationError::directory(format!("{} is not writable: {err}", dir.display()))
    })?;
    if let Err(err) = fs::remove_file(&probe) {
        log::warn!("failed to remove write probe {}: {err}", probe.display());
    }
    Ok(())
}

pub fn default_workspace_root() -> Result<PathBuf> {
    if let Some(root) = std::env::var_os("RELOCATE_HOME").filter(|value| !value.is_empty()) {
        return Ok(PathBuf::from(root));
    }

    if cfg!(windows) {
        let app_data = std::env::var("LOCALAPPDATA")
            .context("LOCALAPPDATA is not set; cannot resolve Windows workspace root")?;
        return Ok(PathBuf::from(app_data).join("Relocate"));
    }

    let home = std::env::var("HOME").context("HOME is not set; cannot resolve workspace root")?;
    Ok(PathBuf::from(home).join(".relocate"))
}
