//! Enumerate, resolve and delete the backups in a backup directory

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dk_core::paths::{metadata_path, BACKUP_SUFFIX};
use dk_core::{DkError, DkResult, IoContext};
use dk_crypto::EncryptionMetadata;
use serde::Serialize;
use tracing::{debug, info};

/// One `*.tar.gz.enc` file found in a backup directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    /// File name, suffix included
    pub name: String,
    pub path: PathBuf,
    /// Size of the encrypted file
    pub size: u64,
    /// Metadata timestamp, or the file's mtime when metadata is unreadable
    pub created: DateTime<Utc>,
    /// Plaintext archive size from metadata
    #[serde(skip_serializing_if = "Option::is_none")]
    pub original_size: Option<u64>,
}

/// List backups in `dir`, newest first. A missing directory has no backups.
pub fn find_backups(dir: &Path) -> DkResult<Vec<BackupInfo>> {
    let read_dir = match fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(DkError::io(
                format!("reading backup directory: {}", dir.display()),
                e,
            ))
        }
    };

    let mut backups = Vec::new();
    for entry in read_dir {
        let entry = entry.io_context(|| format!("reading backup directory: {}", dir.display()))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.ends_with(BACKUP_SUFFIX) {
            continue;
        }
        let path = entry.path();
        let Ok(stat) = fs::metadata(&path) else {
            continue;
        };
        if !stat.is_file() {
            continue;
        }

        let metadata = fs::read(metadata_path(&path))
            .ok()
            .and_then(|bytes| EncryptionMetadata::from_json(&bytes).ok());
        if metadata.is_none() {
            debug!(path = %path.display(), "no readable metadata; using mtime");
        }
        let created = match &metadata {
            Some(meta) => meta.timestamp,
            None => stat
                .modified()
                .map(DateTime::<Utc>::from)
                .unwrap_or_default(),
        };

        backups.push(BackupInfo {
            name,
            path,
            size: stat.len(),
            created,
            original_size: metadata.map(|m| m.original_size),
        });
    }

    backups.sort_by(|a, b| b.created.cmp(&a.created).then_with(|| b.name.cmp(&a.name)));
    Ok(backups)
}

/// `dir/name.tar.gz.enc`; the suffix is appended when `name` lacks it.
pub fn resolve_backup_path(dir: &Path, name: &str) -> PathBuf {
    if name.ends_with(BACKUP_SUFFIX) {
        dir.join(name)
    } else {
        dir.join(format!("{name}{BACKUP_SUFFIX}"))
    }
}

/// Remove a backup and its metadata sidecar. Returns the removed `.enc` path.
///
/// A missing sidecar is not an error; a missing `.enc` is `BackupNotFound`.
pub fn delete_backup(dir: &Path, name: &str) -> DkResult<PathBuf> {
    let path = resolve_backup_path(dir, name);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(DkError::BackupNotFound(path)),
        Err(e) => return Err(DkError::io(format!("deleting {}", path.display()), e)),
    }

    let meta = metadata_path(&path);
    match fs::remove_file(&meta) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!(path = %meta.display(), "metadata already absent")
        }
        Err(e) => return Err(DkError::io(format!("deleting {}", meta.display()), e)),
    }

    info!(path = %path.display(), "deleted backup");
    Ok(path)
}
