use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relocate_core::{ensure_readable_archive, MigrationConfig, Warnings};
use relocate_store::StoreLayout;
use serde::Serialize;

use crate::rewriter::{replace_admin_dir_segments, RewriteReport, UrlRewriteRequest, UrlRewriter};
use crate::schema::SchemaRegistry;
use crate::shop_url::{
    detect_current_domain, read_main_shop_url, set_configuration, write_main_shop_url,
    DomainSnapshot, RequestEnvironment, ShopUrlRecord, PS_SHOP_DOMAIN, PS_SHOP_DOMAIN_SSL,
};
use crate::{Database, DumpTool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePhase {
    Validate,
    Snapshot,
    Restore,
    Rewrite,
    Cleanup,
    Rollback,
    Failed,
    Done,
}

impl RestorePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validate => "validate",
            Self::Snapshot => "snapshot",
            Self::Restore => "restore",
            Self::Rewrite => "rewrite",
            Self::Cleanup => "cleanup",
            Self::Rollback => "rollback",
            Self::Failed => "failed",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub phases: Vec<RestorePhase>,
    pub warnings: Warnings,
    pub captured: DomainSnapshot,
    pub rewrite: Option<RewriteReport>,
    pub snapshot_path: Option<PathBuf>,
    pub shop_url: Option<ShopUrlRecord>,
}

impl RestoreReport {
    fn enter(&mut self, phase: RestorePhase) {
        log::info!("database restore: {phase}");
        self.phases.push(phase);
    }
}

struct TemporarySnapshot {
    path: PathBuf,
    removed: bool,
}

impl TemporarySnapshot {
    fn create(tool: &dyn DumpTool, layout: &StoreLayout) -> Result<Self> {
        let path = layout.unique_tmp_path("snapshot", "sql")?;
        if let Err(err) = tool.dump(&path) {
            if path.exists() {
                if let Err(remove_err) = fs::remove_file(&path) {
                    log::warn!(
                        "failed to remove partial snapshot {}: {remove_err}",
                        path.display()
                    );
                }
            }
            return Err(err.context("failed to snapshot the live database; nothing was changed"));
        }
        log::info!("snapshot written to {}", path.display());
        Ok(Self {
            path,
            removed: false,
        })
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn remove(mut self) -> std::io::Result<()> {
        self.removed = true;
        fs::remove_file(&self.path)
    }
}

impl Drop for TemporarySnapshot {
    fn drop(&mut self) {
        if !self.removed {
            let _ = fs::remove_file(&self.path);
        }
    }
}

pub struct DatabaseRestorer<'a> {
    db: &'a dyn Database,
    tool: &'a dyn DumpTool,
    layout: &'a StoreLayout,
    env: RequestEnvironment,
    registry: SchemaRegistry,
}

impl<'a> DatabaseRestorer<'a> {
    pub fn new(db: &'a dyn Database, tool: &'a dyn DumpTool, layout: &'a StoreLayout) -> Self {
        Self {
            db,
            tool,
            layout,
            env: RequestEnvironment::default(),
            registry: SchemaRegistry::builtin(),
        }
    }

    pub fn with_environment(mut self, env: RequestEnvironment) -> Self {
        self.env = env;
        self
    }

    pub fn with_registry(mut self, registry: SchemaRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn restore(&self, dump: &Path, config: &MigrationConfig) -> Result<RestoreReport> {
        self.restore_with_hook(dump, config, |_| Ok(()))
    }

    pub(crate) fn restore_with_hook<F>(
        &self,
        dump: &Path,
        config: &MigrationConfig,
        mut hook: F,
    ) -> Result<RestoreReport>
    where
        F: FnMut(RestorePhase) -> Result<()>,
    {
        let mut report = RestoreReport::default();
        report.enter(RestorePhase::Validate);
        config.validate()?;
        ensure_readable_archive(dump, "database dump")?;
        self.layout.ensure_directories()?;

        report.captured = DomainSnapshot::capture(self.db);
        report.enter(RestorePhase::Snapshot);
        let snapshot = TemporarySnapshot::create(self.tool, self.layout)?;
        report.snapshot_path = Some(snapshot.path().to_path_buf());

        let outcome = self.apply(dump, config, &mut report, &mut hook);
        if let Err(err) = outcome {
            report.enter(RestorePhase::Rollback);
            let rollback = self.tool.restore(snapshot.path());
            let snapshot_path = snapshot.path().display().to_string();
            if let Err(remove_err) = snapshot.remove() {
                log::warn!("failed to remove snapshot {snapshot_path}: {remove_err}");
            }
            report.enter(RestorePhase::Failed);
            return match rollback {
                Ok(()) => {
                    log::warn!("database rolled back to {snapshot_path}");
                    Err(err.context("database restore failed and was rolled back"))
                }
                Err(rollback_err) => {
                    log::error!("rollback from {snapshot_path} failed: {rollback_err:#}");
                    Err(err.context(format!(
                        "rollback from {snapshot_path} failed ({rollback_err:#}); database state is undefined"
                    )))
                }
            };
        }

        if let Err(err) = snapshot.remove() {
            report.warnings.cleanup(format!(
                "failed to remove snapshot {}: {err}",
                report
                    .snapshot_path
                    .as_deref()
                    .map(|path| path.display().to_string())
                    .unwrap_or_default()
            ));
        }
        report.shop_url = read_main_shop_url(self.db).ok().flatten();
        report.enter(RestorePhase::Done);
        Ok(report)
    }

    fn apply<F>(
        &self,
        dump: &Path,
        config: &MigrationConfig,
        report: &mut RestoreReport,
        hook: &mut F,
    ) -> Result<()>
    where
        F: FnMut(RestorePhase) -> Result<()>,
    {
        report.enter(RestorePhase::Restore);
        hook(RestorePhase::Restore)?;
        self.tool
            .restore(dump)
            .with_context(|| format!("failed to load database dump {}", dump.display()))?;

        report.enter(RestorePhase::Rewrite);
        hook(RestorePhase::Rewrite)?;
        self.rewrite(config, report)?;

        report.enter(RestorePhase::Cleanup);
        hook(RestorePhase::Cleanup)?;
        Ok(())
    }

    fn rewrite(&self, config: &MigrationConfig, report: &mut RestoreReport) -> Result<()> {
        if config.migrate_urls {
            self.rewrite_urls(config, report)?;
        } else {
            self.refresh_shop_url(report)?;
        }

        if let Some((old, new)) = config.admin_dir_rename() {
            match replace_admin_dir_segments(self.db, old, new) {
                Ok(affected) => log::info!("admin dir /{old}/ -> /{new}/ in {affected} value(s)"),
                Err(err) => report
                    .warnings
                    .rewrite(format!("admin directory rewrite failed: {err:#}")),
            }
        }

        if config.preserve_current_domain && !config.migrate_urls {
            self.preserve_captured_domain(report);
        }

        for (name, value) in &config.configurations {
            if let Err(err) = set_configuration(self.db, name, value) {
                report
                    .warnings
                    .rewrite(format!("failed to set configuration {name}: {err:#}"));
            }
        }

        if config.force_shop_url_update {
            self.force_shop_url(config, report)?;
        }
        Ok(())
    }

    fn rewrite_urls(&self, config: &MigrationConfig, report: &mut RestoreReport) -> Result<()> {
        let request = UrlRewriteRequest::from_config(config, self.db)?;
        let rewriter = UrlRewriter::new(self.db, &self.registry);

        let mut rewrite = RewriteReport::default();
        let record = rewriter
            .rewrite_shop_url(&request)
            .context("failed to update the shop url record")?;
        rewrite.record("shop_url", 1);
        rewrite.shop_url = Some(record);
        if config.full_url_rewrite {
            rewriter.rewrite_after_shop_url(&request, &mut rewrite);
        } else {
            rewriter.rewrite_domain_keys(&request, &mut rewrite);
            rewriter.rewrite_configuration_values(&request, &mut rewrite);
        }
        report.warnings.extend(rewrite.warnings.clone());
        report.rewrite = Some(rewrite);
        Ok(())
    }

    fn refresh_shop_url(&self, report: &mut RestoreReport) -> Result<()> {
        let Some(domain) = detect_current_domain(self.db, &self.env, Some(&report.captured))
        else {
            report
                .warnings
                .rewrite("no current domain could be determined; shop url refresh skipped");
            return Ok(());
        };
        write_main_shop_url(self.db, &domain, None)
            .context("failed to refresh the shop url record")?;
        self.set_domain_keys(&domain, &mut report.warnings);
        Ok(())
    }

    fn preserve_captured_domain(&self, report: &mut RestoreReport) {
        let captured = report.captured.clone();
        let Some(domain) = captured
            .shop_domain
            .as_deref()
            .or(captured.shop_url_domain.as_deref())
        else {
            report
                .warnings
                .rewrite("no pre-migration domain was captured; nothing to preserve");
            return;
        };
        if let Err(err) = write_main_shop_url(self.db, domain, captured.physical_uri.as_deref()) {
            report
                .warnings
                .rewrite(format!("failed to preserve domain {domain}: {err:#}"));
            return;
        }
        self.set_domain_keys(domain, &mut report.warnings);
    }

    fn force_shop_url(&self, config: &MigrationConfig, report: &mut RestoreReport) -> Result<()> {
        if let Ok(target) = config.resolved_target() {
            write_main_shop_url(self.db, &target.domain, Some(&target.physical_uri))
                .context("failed to force the shop url update")?;
            self.set_domain_keys(&target.domain, &mut report.warnings);
            return Ok(());
        }

        match detect_current_domain(self.db, &self.env, Some(&report.captured)) {
            Some(domain) => {
                write_main_shop_url(self.db, &domain, None)
                    .context("failed to force the shop url update")?;
                self.set_domain_keys(&domain, &mut report.warnings);
            }
            None => report
                .warnings
                .rewrite("forced shop url update skipped: no target domain available"),
        }
        Ok(())
    }

    fn set_domain_keys(&self, domain: &str, warnings: &mut Warnings) {
        for key in [PS_SHOP_DOMAIN, PS_SHOP_DOMAIN_SSL] {
            if let Err(err) = set_configuration(self.db, key, domain) {
                warnings.rewrite(format!("failed to set {key}: {err:#}"));
            }
        }
    }
}
