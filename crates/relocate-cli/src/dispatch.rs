use std::cell::Cell;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use relocate_core::{
    load_migration_config, BackupArchive, DriveOutcome, MigrationConfig, MigrationError,
    StepDriver, StepKind, Warnings,
};
use relocate_db::{DatabaseRestorer, RequestEnvironment, SchemaRegistry, UrlRewriteRequest, UrlRewriter};
use relocate_files::{open_backup, FileTreeMigrator, OpenedBackup};
use relocate_store::{default_workspace_root, list_backups, prune_backups, PathKind, StoreLayout};

use crate::backend::Backend;
use crate::logging::{init_logging, resolve_log_file};
use crate::render::{format_bytes, TerminalRenderer};
use crate::steps::{make_step, MigrationState, PipelineContext};
use crate::{Cli, Commands};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    let layout = build_layout(&cli)?;
    let log_file = resolve_log_file(cli.log_file.as_deref(), cli.log, &layout, unix_now());
    init_logging(cli.verbose, log_file.as_deref())?;
    let renderer = TerminalRenderer::current();

    match cli.command {
        Commands::Paths => {
            for line in format_path_lines(&layout) {
                println!("{line}");
            }
        }
        Commands::Backups => {
            let entries = list_backups(&layout)?;
            if entries.is_empty() {
                println!("No backups in {}", layout.backups_dir().display());
            }
            for entry in entries {
                println!(
                    "{}\t{}\t{}\t{}",
                    entry.name,
                    entry.kind.as_str(),
                    format_bytes(entry.size_bytes),
                    entry.modified_unix
                );
            }
        }
        Commands::Prune { keep } => {
            let report = prune_backups(&layout, keep)?;
            for path in &report.removed {
                renderer.print_status("ok", &format!("removed {}", path.display()));
            }
            renderer.print_status(
                "ok",
                &format!(
                    "kept {} backup(s), removed {}",
                    report.kept.len(),
                    report.removed.len()
                ),
            );
            renderer.print_warnings(&report.warnings);
        }
        Commands::DiskUsage => {
            let usage = layout.disk_usage()?;
            println!("total: {}", format_bytes(usage.total_bytes));
            println!("used: {}", format_bytes(usage.used_bytes));
            println!("free: {}", format_bytes(usage.free_bytes));
        }
        Commands::Validate => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            renderer.print_status("ok", "migration config is valid");
        }
        Commands::RestoreDb { dump } => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            let registry = load_registry(cli.schema.as_deref())?;
            let backend = Backend::open(&config, &layout)?;

            renderer.print_section("restore database");
            let spinner = renderer.start_spinner("restore database");
            let restored = DatabaseRestorer::new(backend.database(), backend.dump_tool(), &layout)
                .with_environment(RequestEnvironment::from_env())
                .with_registry(registry)
                .restore(&dump, &config);
            let report = match restored {
                Ok(report) => {
                    spinner.finish_success();
                    report
                }
                Err(err) => {
                    spinner.finish_abandon();
                    return Err(err);
                }
            };
            let phases = report
                .phases
                .iter()
                .map(|phase| phase.as_str())
                .collect::<Vec<_>>()
                .join(" -> ");
            renderer.print_status("ok", &format!("phases: {phases}"));
            if let Some(record) = &report.shop_url {
                renderer.print_status(
                    "ok",
                    &format!("shop url: {}{}", record.domain, record.physical_uri),
                );
            }
            renderer.print_warnings(&report.warnings);
        }
        Commands::RewriteUrls => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;
            let registry = load_registry(cli.schema.as_deref())?;
            let backend = Backend::open(&config, &layout)?;
            let request = UrlRewriteRequest::from_config(&config, backend.database())?;

            renderer.print_section("rewrite urls");
            let report = UrlRewriter::new(backend.database(), &registry).run(&request);
            for step in &report.steps {
                renderer.print_status("ok", &format!("{}: {} row(s)", step.name, step.affected));
            }
            renderer.print_status(
                if report.validated { "ok" } else { "warn" },
                &format!("{} row(s) rewritten", report.total_affected()),
            );
            renderer.print_warnings(&report.warnings);
        }
        Commands::MigrateFiles { archive } => {
            let config = load_config(cli.config.as_deref())?;
            config.validate()?;

            renderer.print_section("migrate files");
            let spinner = renderer.start_spinner("migrate files");
            let report = match FileTreeMigrator::new(&layout, &config).migrate(&archive) {
                Ok(report) => {
                    spinner.finish_success();
                    report
                }
                Err(err) => {
                    spinner.finish_abandon();
                    return Err(err);
                }
            };
            renderer.print_status(
                "ok",
                &format!(
                    "{} file(s) and {} dir(s) copied, {} excluded",
                    report.copy.files, report.copy.directories, report.copy.skipped
                ),
            );
            for name in &report.removed_admin_dirs {
                renderer.print_status("ok", &format!("removed stale admin dir {name}"));
            }
            renderer.print_warnings(&report.warnings);
        }
        Commands::Migrate {
            backup,
            resume,
            budget_secs,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let registry = load_registry(cli.schema.as_deref())?;
            let request = MigrateRequest {
                backup: backup.as_deref(),
                resume,
                budget: Duration::from_secs(budget_secs),
            };
            match run_migration(
                &layout,
                &config,
                &registry,
                RequestEnvironment::from_env(),
                &request,
                renderer,
            )? {
                MigrationOutcome::Finished { warnings } => {
                    renderer.print_status("ok", "migration complete");
                    renderer.print_warnings(&warnings);
                }
                MigrationOutcome::Handoff { next, warnings } => {
                    renderer.print_warnings(&warnings);
                    renderer.print_status(
                        "step",
                        &format!(
                            "time budget spent; rerun with --resume to continue at {}",
                            next.as_str()
                        ),
                    );
                }
            }
        }
    }

    Ok(())
}

fn build_layout(cli: &Cli) -> Result<StoreLayout> {
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => default_workspace_root()?,
    };
    let install_root = match &cli.install_root {
        Some(path) => path.clone(),
        None => std::env::current_dir().context("failed to resolve the current directory")?,
    };
    let layout = StoreLayout::new(workspace, install_root);
    Ok(match &cli.admin_dir {
        Some(name) => layout.with_admin_dir_name(name.clone()),
        None => layout,
    })
}

fn load_config(path: Option<&Path>) -> Result<MigrationConfig> {
    match path {
        Some(path) => load_migration_config(path),
        None => {
            log::info!("no --config given; using defaults");
            Ok(MigrationConfig::default())
        }
    }
}

fn load_registry(path: Option<&Path>) -> Result<SchemaRegistry> {
    let mut registry = SchemaRegistry::builtin();
    if let Some(path) = path {
        registry.merge(SchemaRegistry::load(path)?);
    }
    Ok(registry)
}

pub(crate) fn format_path_lines(layout: &StoreLayout) -> Vec<String> {
    [
        PathKind::WorkspaceRoot,
        PathKind::BackupStore,
        PathKind::LogStore,
        PathKind::InstallationRoot,
        PathKind::AdminDirectory,
    ]
    .into_iter()
    .map(|kind| match layout.resolve(kind) {
        Ok(path) => format!("{}: {}", kind.as_str(), path.display()),
        Err(err) => format!("{}: unavailable ({err:#})", kind.as_str()),
    })
    .collect()
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

pub(crate) struct MigrateRequest<'a> {
    pub(crate) backup: Option<&'a Path>,
    pub(crate) resume: bool,
    pub(crate) budget: Duration,
}

#[derive(Debug)]
pub(crate) enum MigrationOutcome {
    Finished { warnings: Warnings },
    Handoff { next: StepKind, warnings: Warnings },
}

pub(crate) fn run_migration(
    layout: &StoreLayout,
    config: &MigrationConfig,
    registry: &SchemaRegistry,
    env: RequestEnvironment,
    request: &MigrateRequest<'_>,
    renderer: TerminalRenderer,
) -> Result<MigrationOutcome> {
    config.validate()?;
    let backend = Backend::open(config, layout)?;
    let state_path = layout.migration_state_path();
    let pending = MigrationState::load(&state_path)?;

    let (source, opened, start) = if request.resume {
        let state = pending.ok_or_else(|| {
            MigrationError::validation(format!(
                "no interrupted migration to resume ({} not found)",
                state_path.display()
            ))
        })?;
        let archive = BackupArchive::open_dir(&state.archive_root)
            .context("the backup of the interrupted migration is no longer available")?;
        log::info!("resuming migration of {} at {}", state.source.display(), state.next.as_str());
        (
            state.source,
            OpenedBackup {
                archive,
                unpacked_dir: state.unpacked_dir,
            },
            state.next,
        )
    } else {
        if pending.is_some() {
            return Err(MigrationError::validation(format!(
                "an interrupted migration is pending; rerun with --resume or remove {}",
                state_path.display()
            ))
            .into());
        }
        let source = request.backup.ok_or_else(|| {
            MigrationError::validation("--backup is required to start a migration")
        })?;
        layout.ensure_directories()?;
        let opened = open_backup(source, layout)?;
        if let Err(err) = opened.archive.verify_checksums() {
            let mut warnings = Warnings::new();
            opened.cleanup(&mut warnings);
            return Err(err);
        }
        log_backup_metadata(&opened.archive);
        (source.to_path_buf(), opened, StepKind::RestoreDatabase)
    };

    let ctx = PipelineContext::new(
        layout,
        config,
        &backend,
        registry,
        env,
        &opened.archive,
        renderer,
    );
    renderer.print_section("migrate");
    let driver = StepDriver::new(request.budget);
    let current = Cell::new(start);
    let outcome = driver.drive(start, |kind| {
        current.set(kind);
        renderer.print_status("step", kind.as_str());
        Ok(make_step(&ctx, kind))
    });
    let mut warnings = ctx.take_warnings();
    let failure = ctx.take_failure();
    drop(ctx);

    let save_state = |next: StepKind| {
        MigrationState {
            source: source.clone(),
            archive_root: opened.archive.root.clone(),
            unpacked_dir: opened.unpacked_dir.clone(),
            next,
            saved_at_unix: unix_now(),
        }
        .save(&state_path)
    };

    match outcome {
        Ok(DriveOutcome::Finished) => {
            MigrationState::clear(&state_path)?;
            opened.cleanup(&mut warnings);
            Ok(MigrationOutcome::Finished { warnings })
        }
        Ok(DriveOutcome::Handoff { next }) => {
            save_state(next)?;
            Ok(MigrationOutcome::Handoff { next, warnings })
        }
        Ok(DriveOutcome::Failed { step, status }) => {
            save_state(step)?;
            let err = failure.unwrap_or_else(|| anyhow!(status));
            Err(err.context(format!(
                "migration step {} failed; fix the cause and rerun with --resume",
                step.as_str()
            )))
        }
        Err(err) => {
            save_state(current.get())?;
            Err(err.context("migration step could not start"))
        }
    }
}

fn log_backup_metadata(archive: &BackupArchive) {
    let metadata = &archive.metadata;
    log::info!(
        "backup {}: created {}, platform {}, source {}",
        archive.root.display(),
        metadata.created_at.as_deref().unwrap_or("unknown"),
        metadata.platform_version.as_deref().unwrap_or("unknown"),
        metadata.source_url.as_deref().unwrap_or("unknown")
    );
}
