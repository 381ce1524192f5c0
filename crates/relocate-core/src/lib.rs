mod archive;
mod config;
mod domain;
mod error;
mod process;
mod report;
mod step;

pub use archive::{
    archive_error, ensure_readable_archive, list_dir_names, require_format, sha256_file_hex,
    BackupArchive, BackupMetadata, DumpCompression, FilesArchiveFormat, METADATA_FILE_NAME,
};
pub use config::{
    load_migration_config, parse_migration_config_json, parse_migration_config_toml,
    DatabaseEngine, DatabaseSettings, MigrationConfig,
};
pub use domain::{
    clean_domain, is_local_domain, normalize_physical_uri, parse_absolute_url, replace_in_one_pass,
    replacement_token, Scheme, TargetUrl,
};
pub use error::{MigrationError, WarningKind};
pub use process::{describe_command, run_command, run_command_with_stdin, CommandOutput};
pub use report::{MigrationWarning, Warnings};
pub use step::{
    is_remaining_time_enough, DriveOutcome, StepDriver, StepKind, StepState, TaskStep,
    DEFAULT_TIME_BUDGET, EXIT_FAILED, EXIT_OK,
};
