//! dk-restore: apply an encrypted backup to the filesystem
//!
//! - `engine`: decrypt → decode → filter → diff → conflict → atomic write
//! - `conflict`: skip/overwrite/backup policy and the `.bak.<ts>` helpers
//! - `diff`: line-based unified diff of a backup entry against disk
//!
//! Nothing is written until the backup has decrypted and decoded in full,
//! so a wrong password or a tampered file never touches the target tree.

pub mod conflict;
pub mod diff;
pub mod engine;

pub use conflict::{
    backup_existing, cleanup_conflict_backups, has_conflict, list_conflict_backups,
    resolve_conflict, restore_from_conflict_backup, ConflictAction,
};
pub use diff::{diff_entry, diff_stats, generate_diff, unified_diff, DiffResult};
pub use engine::{
    get_file_diff, list_backup_contents, preview_restore, restore, restore_file,
    validate_backup, ProgressFn, RestoreEvent, RestoreOptions, RestoreResult, RESTORE_TEMP_PREFIX,
};
