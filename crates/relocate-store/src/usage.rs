use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use relocate_core::run_command;
use serde::Serialize;

use crate::StoreLayout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
}

impl StoreLayout {
    pub fn disk_usage(&self) -> Result<DiskUsage> {
        let backups = self.backups_dir();
        let probe = if backups.exists() {
            backups
        } else {
            self.workspace_root().to_path_buf()
        };
        disk_usage(&probe)
    }
}

pub fn disk_usage(path: &Path) -> Result<DiskUsage> {
    if cfg!(windows) {
        return Err(anyhow!("disk usage reporting is not supported on Windows hosts"));
    }
    let output = run_command(
        &mut build_df_command(path),
        &format!("failed to query disk usage for {}", path.display()),
    )?;
    parse_df_output(&output.stdout)
        .with_context(|| format!("failed parsing df output for {}", path.display()))
}

pub(crate) fn build_df_command(path: &Path) -> Command {
    let mut command = Command::new("df");
    command.arg("-Pk").arg(path);
    command
}

pub(crate) fn parse_df_output(raw: &str) -> Result<DiskUsage> {
    let line = raw
        .lines()
        .skip(1)
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| anyhow!("df output has no data row"))?;
    let fields = line.split_whitespace().collect::<Vec<_>>();
    if fields.len() < 6 {
        return Err(anyhow!("unexpected df row: {line}"));
    }

    // Filesystem names may contain spaces; the numeric columns are counted from the end.
    let numeric = &fields[fields.len() - 5..fields.len() - 2];
    let parse_kib = |value: &str, column: &str| -> Result<u64> {
        value
            .parse::<u64>()
            .map(|kib| kib.saturating_mul(1024))
            .with_context(|| format!("invalid df {column} column: {value}"))
    };

    Ok(DiskUsage {
        total_bytes: parse_kib(numeric[0], "total")?,
        used_bytes: parse_kib(numeric[1], "used")?,
        free_bytes: parse_kib(numeric[2], "available")?,
    })
}
