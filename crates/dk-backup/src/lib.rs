//! dk-backup: everything that produces or enumerates backups
//!
//! - `collector`: expand configured roots into an ordered `FileEntry` list
//! - `engine`: collect → tar.gz → SHA-256 → Argon2id → AES-256-GCM → disk
//! - `catalog`: list, resolve and delete the backups in a directory

pub mod catalog;
pub mod collector;
pub mod engine;

pub use catalog::{delete_backup, find_backups, resolve_backup_path, BackupInfo};
pub use collector::{collect_files, Collector, MAX_LINK_HOPS};
pub use engine::{backup, backup_with, BackupOptions, BackupResult, SPOOL_PREFIX};
