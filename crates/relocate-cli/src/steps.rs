use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use relocate_core::{
    ensure_readable_archive, BackupArchive, MigrationConfig, StepKind, StepState, TaskStep,
    Warnings, EXIT_FAILED, EXIT_OK,
};
use relocate_db::{
    DatabaseRestorer, LocationScope, RequestEnvironment, RewriteReport, SchemaRegistry,
    UrlRewriteRequest, UrlRewriter,
};
use relocate_files::FileTreeMigrator;
use relocate_store::StoreLayout;
use serde::{Deserialize, Serialize};

use crate::backend::Backend;
use crate::render::TerminalRenderer;

pub(crate) struct PipelineContext<'a> {
    pub(crate) layout: &'a StoreLayout,
    pub(crate) config: &'a MigrationConfig,
    pub(crate) backend: &'a Backend,
    pub(crate) registry: &'a SchemaRegistry,
    pub(crate) env: RequestEnvironment,
    pub(crate) backup: &'a BackupArchive,
    pub(crate) renderer: TerminalRenderer,
    warnings: RefCell<Warnings>,
    failure: RefCell<Option<anyhow::Error>>,
}

impl<'a> PipelineContext<'a> {
    pub(crate) fn new(
        layout: &'a StoreLayout,
        config: &'a MigrationConfig,
        backend: &'a Backend,
        registry: &'a SchemaRegistry,
        env: RequestEnvironment,
        backup: &'a BackupArchive,
        renderer: TerminalRenderer,
    ) -> Self {
        Self {
            layout,
            config,
            backend,
            registry,
            env,
            backup,
            renderer,
            warnings: RefCell::new(Warnings::new()),
            failure: RefCell::new(None),
        }
    }

    fn record_warnings(&self, warnings: Warnings) {
        self.warnings.borrow_mut().extend(warnings);
    }

    fn record_failure(&self, err: anyhow::Error) -> String {
        let status = format!("{err:#}");
        *self.failure.borrow_mut() = Some(err);
        status
    }

    pub(crate) fn take_warnings(&self) -> Warnings {
        self.warnings.take()
    }

    pub(crate) fn take_failure(&self) -> Option<anyhow::Error> {
        self.failure.borrow_mut().take()
    }
}

pub(crate) fn step_after(kind: StepKind, config: &MigrationConfig) -> Option<StepKind> {
    match kind {
        StepKind::RestoreDatabase if config.migrate_urls && !config.full_url_rewrite => {
            Some(StepKind::RewriteUrls)
        }
        StepKind::RestoreDatabase | StepKind::RewriteUrls => Some(StepKind::MigrateFiles),
        StepKind::MigrateFiles => None,
    }
}

pub(crate) fn make_step<'s>(ctx: &'s PipelineContext<'s>, kind: StepKind) -> Box<dyn TaskStep + 's> {
    match kind {
        StepKind::RestoreDatabase => Box::new(RestoreDatabaseStep::new(ctx)),
        StepKind::RewriteUrls => Box::new(RewriteUrlsStep::new(ctx)),
        StepKind::MigrateFiles => Box::new(MigrateFilesStep::new(ctx)),
    }
}

struct RestoreDatabaseStep<'s> {
    ctx: &'s PipelineContext<'s>,
    state: StepState,
}

impl<'s> RestoreDatabaseStep<'s> {
    fn new(ctx: &'s PipelineContext<'s>) -> Self {
        Self {
            ctx,
            state: StepState::default(),
        }
    }
}

impl TaskStep for RestoreDatabaseStep<'_> {
    fn kind(&self) -> StepKind {
        StepKind::RestoreDatabase
    }

    fn init(&mut self) -> Result<()> {
        ensure_readable_archive(&self.ctx.backup.database_dump, "database dump")?;
        self.state = StepState::pending("restoring database");
        Ok(())
    }

    fn run(&mut self) -> i32 {
        let ctx = self.ctx;
        let spinner = ctx.renderer.start_spinner("restore database");
        let restorer = DatabaseRestorer::new(
            ctx.backend.database(),
            ctx.backend.dump_tool(),
            ctx.layout,
        )
        .with_environment(ctx.env.clone())
        .with_registry(ctx.registry.clone());

        match restorer.restore(&ctx.backup.database_dump, ctx.config) {
            Ok(report) => {
                spinner.finish_success();
                let status = match &report.shop_url {
                    Some(record) => format!(
                        "database restored; shop url is {}{}",
                        record.domain, record.physical_uri
                    ),
                    None => "database restored".to_string(),
                };
                ctx.record_warnings(report.warnings);
                let next = step_after(self.kind(), ctx.config);
                self.state.finish(next, status);
                EXIT_OK
            }
            Err(err) => {
                spinner.finish_abandon();
                let status = ctx.record_failure(err);
                self.state.fail(status);
                EXIT_FAILED
            }
        }
    }

    fn state(&self) -> &StepState {
        &self.state
    }
}

struct RewriteUrlsStep<'s> {
    ctx: &'s PipelineContext<'s>,
    state: StepState,
}

impl<'s> RewriteUrlsStep<'s> {
    fn new(ctx: &'s PipelineContext<'s>) -> Self {
        Self {
            ctx,
            state: StepState::default(),
        }
    }

    fn rewrite(&self) -> Result<RewriteReport> {
        let db = self.ctx.backend.database();
        let request = UrlRewriteRequest::from_config(self.ctx.config, db)?;
        let rewriter = UrlRewriter::new(db, self.ctx.registry);
        let mut report = RewriteReport::default();
        rewriter.rewrite_locations(&request, LocationScope::Core, &mut report);
        rewriter.rewrite_locations(&request, LocationScope::Module, &mut report);
        rewriter.update_ssl_flags(&request, &mut report);
        rewriter.validate(&request, &mut report);
        Ok(report)
    }
}

impl TaskStep for RewriteUrlsStep<'_> {
    fn kind(&self) -> StepKind {
        StepKind::RewriteUrls
    }

    fn init(&mut self) -> Result<()> {
        self.state = StepState::pending("rewriting content urls");
        Ok(())
    }

    fn run(&mut self) -> i32 {
        let spinner = self.ctx.renderer.start_spinner("rewrite urls");
        match self.rewrite() {
            Ok(report) => {
                spinner.finish_success();
                let status = format!(
                    "{} row(s) rewritten across {} location(s)",
                    report.total_affected(),
                    report.steps.len()
                );
                self.ctx.record_warnings(report.warnings);
                let next = step_after(self.kind(), self.ctx.config);
                self.state.finish(next, status);
                EXIT_OK
            }
            Err(err) => {
                spinner.finish_abandon();
                let status = self.ctx.record_failure(err);
                self.state.fail(status);
                EXIT_FAILED
            }
        }
    }

    fn state(&self) -> &StepState {
        &self.state
    }
}

struct MigrateFilesStep<'s> {
    ctx: &'s PipelineContext<'s>,
    state: StepState,
}

impl<'s> MigrateFilesStep<'s> {
    fn new(ctx: &'s PipelineContext<'s>) -> Self {
        Self {
            ctx,
            state: StepState::default(),
        }
    }
}

impl TaskStep for MigrateFilesStep<'_> {
    fn kind(&self) -> StepKind {
        StepKind::MigrateFiles
    }

    fn init(&mut self) -> Result<()> {
        ensure_readable_archive(&self.ctx.backup.files_archive, "files archive")?;
        self.state = StepState::pending("migrating files");
        Ok(())
    }

    fn run(&mut self) -> i32 {
        let ctx = self.ctx;
        let spinner = ctx.renderer.start_spinner("migrate files");
        match FileTreeMigrator::new(ctx.layout, ctx.config).migrate(&ctx.backup.files_archive) {
            Ok(report) => {
                spinner.finish_success();
                let mut status = format!(
                    "{} file(s) copied, {} excluded",
                    report.copy.files, report.copy.skipped
                );
                if !report.removed_admin_dirs.is_empty() {
                    status.push_str(&format!(
                        "; removed admin dir(s) {}",
                        report.removed_admin_dirs.join(", ")
                    ));
                }
                ctx.record_warnings(report.warnings);
                let next = step_after(self.kind(), ctx.config);
                self.state.finish(next, status);
                EXIT_OK
            }
            Err(err) => {
                spinner.finish_abandon();
                let status = ctx.record_failure(err);
                self.state.fail(status);
                EXIT_FAILED
            }
        }
    }

    fn state(&self) -> &StepState {
        &self.state
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MigrationState {
    pub(crate) source: PathBuf,
    pub(crate) archive_root: PathBuf,
    pub(crate) unpacked_dir: Option<PathBuf>,
    pub(crate) next: StepKind,
    pub(crate) saved_at_unix: u64,
}

impl MigrationState {
    pub(crate) fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read migration state {}", path.display()))?;
        let state = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse migration state {}", path.display()))?;
        Ok(Some(state))
    }

    pub(crate) fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered =
            serde_json::to_string_pretty(self).context("failed to serialize migration state")?;
        let staged = path.with_extension("json.tmp");
        fs::write(&staged, rendered)
            .with_context(|| format!("failed to write {}", staged.display()))?;
        fs::rename(&staged, path)
            .with_context(|| format!("failed to move migration state into {}", path.display()))?;
        log::info!("migration state saved to {} (next: {})", path.display(), self.next.as_str());
        Ok(())
    }

    pub(crate) fn clear(path: &Path) -> Result<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove {}", path.display()))
            }
        }
    }
}
