mod admin;
mod backups;
mod layout;
mod usage;

pub use admin::{
    admin_score, detect_admin_dir, find_admin_dirs, scan_admin_candidates,
    AdminDirectoryCandidate, ADMIN_MARKERS, ADMIN_SCORE_THRESHOLD,
};
pub use backups::{list_backups, prune_backups, BackupEntry, BackupKind, PruneReport};
pub use layout::{default_workspace_root, PathKind, StoreLayout};
pub use usage::{disk_usage, DiskUsage};
