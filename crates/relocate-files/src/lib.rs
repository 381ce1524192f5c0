mod config_patch;
mod copy;
mod exclusions;
mod extract;
mod mappings;
mod migrator;

pub use config_patch::{
    live_credentials, patch_db_config_file, patch_url_file, DbConfigFile, DbCredentials,
    UrlPatch, HTACCESS_FILE, LEGACY_SETTINGS_FILE, PARAMETERS_FILE, ROBOTS_FILE,
};
pub use copy::{copy_tree, CopyStats};
pub use exclusions::{ExclusionRuleSet, DEFAULT_EXCLUSIONS};
pub use extract::{extract_archive, open_backup, OpenedBackup};
pub use mappings::{apply_file_mappings, safe_relative_path};
pub use migrator::{FileMigrationReport, FileTreeMigrator};
