//! What to do when a restore target already exists
//!
//! Existing targets are moved aside to `<name>.bak.<YYYYMMDD-HHMMSS>` unless
//! the caller forces an overwrite or asks to skip them. Helpers here also
//! find, clean up and roll back to those `.bak` copies.

use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use dk_core::{DkError, DkResult, IoContext};
use tracing::{debug, info};

/// Per-target decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictAction {
    /// Leave the existing target alone
    Skip,
    /// Replace the target without keeping a copy
    Overwrite,
    /// Rename the target to a `.bak.<ts>` sibling, then write
    Backup,
}

/// Highest numeric suffix tried before falling back to nanoseconds
const MAX_UNIQUE_SUFFIX: u32 = 999;

/// Whether anything (file, directory, symlink, even dangling) sits at `path`.
pub fn has_conflict(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// `force` beats `skip_existing`; a missing target is always overwritten.
pub fn resolve_conflict(path: &Path, force: bool, skip_existing: bool) -> ConflictAction {
    if !has_conflict(path) || force {
        ConflictAction::Overwrite
    } else if skip_existing {
        ConflictAction::Skip
    } else {
        ConflictAction::Backup
    }
}

/// Move an existing `path` aside. Returns the `.bak` path, or `None` when
/// there was nothing to move.
pub fn backup_existing(path: &Path) -> DkResult<Option<PathBuf>> {
    if !has_conflict(path) {
        return Ok(None);
    }

    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let candidate = with_suffix(path, &format!(".bak.{stamp}"));
    let backup_path = unique_path(candidate);

    fs::rename(path, &backup_path).io_context(|| {
        format!(
            "backing up {} to {}",
            path.display(),
            backup_path.display()
        )
    })?;
    info!(
        path = %path.display(),
        backup = %backup_path.display(),
        "moved existing file aside"
    );
    Ok(Some(backup_path))
}

/// `path` itself if free, else `path.1` … `path.999`, else `path.<nanos>`.
fn unique_path(path: PathBuf) -> PathBuf {
    if !has_conflict(&path) {
        return path;
    }
    for n in 1..=MAX_UNIQUE_SUFFIX {
        let candidate = with_suffix(&path, &format!(".{n}"));
        if !has_conflict(&candidate) {
            return candidate;
        }
    }
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    with_suffix(&path, &format!(".{nanos}"))
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut s: OsString = path.as_os_str().to_owned();
    s.push(suffix);
    PathBuf::from(s)
}

/// All `<original>.bak.*` siblings, sorted by name.
pub fn list_conflict_backups(original: &Path) -> DkResult<Vec<PathBuf>> {
    let pattern = format!(
        "{}.bak.*",
        glob::Pattern::escape(&original.to_string_lossy())
    );
    let paths = glob::glob(&pattern)
        .map_err(|e| DkError::Format(format!("bad backup pattern {pattern}: {e}")))?;

    let mut found = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| {
            let context = format!("scanning {}", e.path().display());
            DkError::io(context, e.into_error())
        })?;
        found.push(path);
    }
    found.sort();
    Ok(found)
}

/// Delete every `<original>.bak.*` sibling. Returns how many were removed.
pub fn cleanup_conflict_backups(original: &Path) -> DkResult<usize> {
    let backups = list_conflict_backups(original)?;
    for path in &backups {
        fs::remove_file(path).io_context(|| format!("removing backup {}", path.display()))?;
        debug!(path = %path.display(), "removed conflict backup");
    }
    Ok(backups.len())
}

/// Put a `.bak` copy back in place of `original`, replacing whatever is there.
pub fn restore_from_conflict_backup(original: &Path, backup_path: &Path) -> DkResult<()> {
    match fs::remove_file(original) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(DkError::io(
                format!("removing current file {}", original.display()),
                e,
            ))
        }
    }
    fs::rename(backup_path, original).io_context(|| {
        format!(
            "restoring {} from {}",
            original.display(),
            backup_path.display()
        )
    })?;
    info!(path = %original.display(), from = %backup_path.display(), "rolled back to conflict backup");
    Ok(())
}
