use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::LevelFilter;
use relocate_store::StoreLayout;

pub(crate) fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

pub(crate) fn resolve_log_file(
    explicit: Option<&Path>,
    to_log_store: bool,
    layout: &StoreLayout,
    unix_secs: u64,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    to_log_store.then(|| layout.logs_dir().join(format!("relocate-{unix_secs}.log")))
}

pub(crate) fn init_logging(verbose: u8, log_file: Option<&Path>) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(level_for_verbosity(verbose).as_str()),
    );
    if verbose > 0 {
        builder.filter_level(level_for_verbosity(verbose));
    }
    builder.format_timestamp_secs();

    if let Some(path) = log_file {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create log directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init().context("failed to initialize logging")
}
