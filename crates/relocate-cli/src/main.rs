mod backend;
mod dispatch;
mod logging;
mod render;
mod steps;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser, Subcommand};

use crate::dispatch::run_cli;

#[derive(Parser, Debug)]
#[command(name = "relocate")]
#[command(about = "Restore a shop backup and relocate it to a new installation", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[arg(long, global = true)]
    install_root: Option<PathBuf>,
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    admin_dir: Option<String>,
    #[arg(long, global = true)]
    schema: Option<PathBuf>,
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[arg(long, global = true)]
    log: bool,
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Paths,
    Backups,
    Prune {
        #[arg(long)]
        keep: usize,
    },
    DiskUsage,
    Validate,
    RestoreDb {
        #[arg(long)]
        dump: PathBuf,
    },
    RewriteUrls,
    MigrateFiles {
        #[arg(long)]
        archive: PathBuf,
    },
    Migrate {
        #[arg(long, required_unless_present = "resume")]
        backup: Option<PathBuf>,
        #[arg(long)]
        resume: bool,
        #[arg(long, default_value_t = 25)]
        budget_secs: u64,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:#}");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}
