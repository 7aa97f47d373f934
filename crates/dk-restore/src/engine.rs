//! Restore orchestrator: read → decrypt → decode → filter → diff → write
//!
//! Every entry is decided on its own: it is shown as a diff, counted in a
//! dry run, skipped, or written after the existing target is moved aside.
//! Regular files are written to a temp file in the target's directory and
//! renamed into place. A failure stops the restore; entries already written
//! and `.bak` copies already made stay on disk.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs::{self, Permissions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use dk_archive::{decode_archive, list_archive};
use dk_core::paths::metadata_path;
use dk_core::types::MODE_MASK;
use dk_core::{CancelToken, DkError, DkResult, EntryKind, FileEntry, IoContext};
use dk_crypto::{decrypt, derive_key, parse_frame, EncryptionMetadata};
use secrecy::SecretString;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::conflict::{backup_existing, has_conflict, resolve_conflict, ConflictAction};
use crate::diff::diff_entry;

/// File-name prefix of the temp files regular entries are written through.
pub const RESTORE_TEMP_PREFIX: &str = ".dotkeeper-restore-";

/// What happened to one target path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreEvent {
    Restored,
    Skipped,
    /// The existing target was moved to a `.bak` sibling
    BackedUp,
    /// Dry run: the target exists and would be moved aside
    WouldBackup,
    /// Dry run: the target is free
    WouldRestore,
    /// The diff could not be produced; the entry is still processed
    DiffError,
}

impl fmt::Display for RestoreEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            RestoreEvent::Restored => "restored",
            RestoreEvent::Skipped => "skipped",
            RestoreEvent::BackedUp => "backed-up",
            RestoreEvent::WouldBackup => "would-backup",
            RestoreEvent::WouldRestore => "would-restore",
            RestoreEvent::DiffError => "diff-error",
        })
    }
}

/// Progress callback (target path, event)
pub type ProgressFn<'a> = Box<dyn FnMut(&Path, RestoreEvent) + 'a>;

#[derive(Default)]
pub struct RestoreOptions<'a> {
    /// Report what would happen; write nothing
    pub dry_run: bool,
    /// Diff each entry against its target before acting on it
    pub show_diff: bool,
    /// Overwrite existing targets without a `.bak` copy
    pub force: bool,
    /// Leave existing targets alone (ignored when `force` is set)
    pub skip_existing: bool,
    /// Restore every entry as `target_dir/<basename>` instead of its own path
    pub target_dir: Option<PathBuf>,
    /// Full paths or basenames to restore; empty means everything
    pub selected_files: Vec<String>,
    /// Receives `\n=== <target> ===\n<diff>\n` per differing entry
    pub diff_sink: Option<&'a mut dyn Write>,
    pub progress: Option<ProgressFn<'a>>,
    pub cancel: Option<CancelToken>,
}

impl RestoreOptions<'_> {
    fn emit(&mut self, target: &Path, event: RestoreEvent) {
        debug!(path = %target.display(), %event, "restore event");
        if let Some(cb) = self.progress.as_mut() {
            cb(target, event);
        }
    }

    fn check_cancel(&self) -> DkResult<()> {
        match &self.cancel {
            Some(cancel) => cancel.check(),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreResult {
    pub restored_files: Vec<PathBuf>,
    pub skipped_files: Vec<PathBuf>,
    /// `.bak` copies made of pre-existing targets
    pub backup_files: Vec<PathBuf>,
    /// Target → diff, for entries that differ (only with `show_diff`)
    pub diff_results: BTreeMap<PathBuf, String>,
    /// Entries in the backup, before `selected_files` filtering
    pub total_files: usize,
    pub files_restored: usize,
    pub files_skipped: usize,
    pub files_conflict: usize,
}

/// Restore `backup_path` according to `opts`.
pub fn restore(
    backup_path: &Path,
    password: &SecretString,
    mut opts: RestoreOptions<'_>,
) -> DkResult<RestoreResult> {
    opts.check_cancel()?;
    let entries = extract_entries(backup_path, password)?;

    let mut result = RestoreResult {
        total_files: entries.len(),
        ..Default::default()
    };
    let entries = filter_entries(entries, &opts.selected_files);
    info!(
        backup = %backup_path.display(),
        total = result.total_files,
        selected = entries.len(),
        dry_run = opts.dry_run,
        "restoring backup"
    );

    for entry in &entries {
        opts.check_cancel()?;
        let target = target_path(entry, opts.target_dir.as_deref());

        if opts.show_diff {
            show_diff(entry, &target, &mut opts, &mut result)?;
        }

        if opts.dry_run {
            if has_conflict(&target) {
                result.files_conflict += 1;
                opts.emit(&target, RestoreEvent::WouldBackup);
            } else {
                opts.emit(&target, RestoreEvent::WouldRestore);
            }
            result.skipped_files.push(target);
            result.files_skipped += 1;
            continue;
        }

        match resolve_conflict(&target, opts.force, opts.skip_existing) {
            ConflictAction::Skip => {
                debug!(path = %target.display(), "target exists; skipping");
                opts.emit(&target, RestoreEvent::Skipped);
                result.skipped_files.push(target);
                result.files_skipped += 1;
                continue;
            }
            ConflictAction::Backup => {
                if let Some(bak) = backup_existing(&target)? {
                    result.backup_files.push(bak);
                    result.files_conflict += 1;
                    opts.emit(&target, RestoreEvent::BackedUp);
                }
            }
            ConflictAction::Overwrite => {}
        }

        materialize(entry, &target)?;
        opts.emit(&target, RestoreEvent::Restored);
        result.restored_files.push(target);
        result.files_restored += 1;
    }

    info!(
        restored = result.files_restored,
        skipped = result.files_skipped,
        conflicts = result.files_conflict,
        "restore complete"
    );
    Ok(result)
}

/// Dry run with diffs.
pub fn preview_restore(
    backup_path: &Path,
    password: &SecretString,
    mut opts: RestoreOptions<'_>,
) -> DkResult<RestoreResult> {
    opts.dry_run = true;
    opts.show_diff = true;
    restore(backup_path, password, opts)
}

/// Restore the entries matching `file` (full path or basename).
pub fn restore_file(
    backup_path: &Path,
    password: &SecretString,
    file: &str,
    mut opts: RestoreOptions<'_>,
) -> DkResult<RestoreResult> {
    opts.selected_files = vec![file.to_string()];
    restore(backup_path, password, opts)
}

/// Decrypt and decode without writing anything.
pub fn validate_backup(backup_path: &Path, password: &SecretString) -> DkResult<()> {
    let entries = extract_entries(backup_path, password)?;
    debug!(backup = %backup_path.display(), entries = entries.len(), "backup is valid");
    Ok(())
}

/// Entries in the backup with their contents dropped.
pub fn list_backup_contents(
    backup_path: &Path,
    password: &SecretString,
) -> DkResult<Vec<FileEntry>> {
    let plaintext = decrypt_backup(backup_path, password)?;
    list_archive(&plaintext)
}

/// Diff the backup's copy of `file` against `file` on disk.
///
/// The entry is found by full path or by basename. Symlink entries render
/// as `symlink -> <target>`.
pub fn get_file_diff(
    backup_path: &Path,
    password: &SecretString,
    file: &str,
) -> DkResult<String> {
    let entries = extract_entries(backup_path, password)?;
    let wanted = basename(file);
    let entry = entries
        .iter()
        .find(|e| e.path == file || e.basename() == wanted)
        .ok_or_else(|| DkError::EntryNotFound(file.to_string()))?;

    match &entry.kind {
        EntryKind::Symlink { link_target } => Ok(format!("symlink -> {link_target}")),
        EntryKind::Regular { .. } => Ok(diff_entry(entry, Path::new(file))?.diff),
    }
}

fn show_diff(
    entry: &FileEntry,
    target: &Path,
    opts: &mut RestoreOptions<'_>,
    result: &mut RestoreResult,
) -> DkResult<()> {
    let diff = match diff_entry(entry, target) {
        Ok(diff) => diff,
        Err(e) => {
            warn!(path = %target.display(), error = %e, "could not diff");
            opts.emit(target, RestoreEvent::DiffError);
            return Ok(());
        }
    };
    if !diff.has_difference {
        return Ok(());
    }
    if let Some(sink) = opts.diff_sink.as_mut() {
        write!(sink, "\n=== {} ===\n{}\n", target.display(), diff.diff)
            .io_context(|| "writing diff output")?;
    }
    result.diff_results.insert(target.to_path_buf(), diff.diff);
    Ok(())
}

/// Decrypt the backup and decode every entry, contents included.
fn extract_entries(backup_path: &Path, password: &SecretString) -> DkResult<Vec<FileEntry>> {
    let plaintext = decrypt_backup(backup_path, password)?;
    decode_archive(&plaintext)
}

fn decrypt_backup(backup_path: &Path, password: &SecretString) -> DkResult<Vec<u8>> {
    let frame = read_required(backup_path)?;
    let metadata = EncryptionMetadata::from_json(&read_required(&metadata_path(backup_path))?)?;

    let (header, _) = parse_frame(&frame)?;
    if u32::from(header.version) != metadata.version {
        return Err(DkError::Format(format!(
            "frame version {} does not match metadata version {}",
            header.version, metadata.version
        )));
    }
    // The key is always derived from the metadata salt
    if header.salt != metadata.salt {
        warn!(backup = %backup_path.display(), "frame salt differs from metadata salt");
    }

    let key = derive_key(password, &metadata.salt, &metadata.kdf_params())?;
    decrypt(&frame, key.as_bytes())
}

fn read_required(path: &Path) -> DkResult<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => DkError::BackupNotFound(path.to_path_buf()),
        _ => DkError::io(format!("reading {}", path.display()), e),
    })
}

/// Keep entries whose path, lexically cleaned path or basename was selected.
fn filter_entries(entries: Vec<FileEntry>, selected: &[String]) -> Vec<FileEntry> {
    if selected.is_empty() {
        return entries;
    }
    let mut wanted: HashSet<String> = HashSet::new();
    for s in selected {
        wanted.insert(s.clone());
        wanted.insert(clean_path(s));
    }
    entries
        .into_iter()
        .filter(|e| {
            wanted.contains(&e.path)
                || wanted.contains(&clean_path(&e.path))
                || wanted.contains(e.basename())
        })
        .collect()
}

/// Lexical path normalization: collapses `//`, drops `.`, folds `..`.
fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => match parts.last() {
                Some(&last) if last != ".." => {
                    parts.pop();
                }
                _ if rooted => {}
                _ => parts.push(".."),
            },
            other => parts.push(other),
        }
    }
    let joined = parts.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn basename(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

/// With a `target_dir`, entries are flattened to `target_dir/<basename>`.
fn target_path(entry: &FileEntry, target_dir: Option<&Path>) -> PathBuf {
    match target_dir {
        Some(dir) => dir.join(entry.basename()),
        None => PathBuf::from(&entry.path),
    }
}

fn materialize(entry: &FileEntry, target: &Path) -> DkResult<()> {
    let parent = match target.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .io_context(|| format!("creating directory {}", parent.display()))?;

    match &entry.kind {
        EntryKind::Symlink { link_target } => {
            match fs::remove_file(target) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(DkError::io(format!("removing {}", target.display()), e)),
            }
            std::os::unix::fs::symlink(link_target, target)
                .io_context(|| format!("creating symlink {}", target.display()))?;
            debug!(path = %target.display(), link_target = %link_target, "symlink restored");
        }
        EntryKind::Regular { content, .. } => {
            let content = content.as_deref().ok_or_else(|| {
                DkError::Archive(format!("{}: entry content was not loaded", entry.path))
            })?;
            write_atomic(parent, target, content, entry.mode)?;
            debug!(path = %target.display(), bytes = content.len(), "file restored");
        }
    }
    Ok(())
}

/// Temp file in `dir`, chmod, fsync, rename over `target`.
///
/// The temp file is unlinked on every failure path when it drops.
fn write_atomic(dir: &Path, target: &Path, content: &[u8], mode: u32) -> DkResult<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(RESTORE_TEMP_PREFIX)
        .tempfile_in(dir)
        .io_context(|| format!("creating temp file in {}", dir.display()))?;

    write_and_sync(&mut tmp, content, mode & MODE_MASK)
        .io_context(|| format!("writing {}", target.display()))?;

    tmp.persist(target)
        .map_err(|e| DkError::io(format!("renaming into {}", target.display()), e.error))?;
    Ok(())
}

fn write_and_sync(tmp: &mut NamedTempFile, content: &[u8], mode: u32) -> std::io::Result<()> {
    tmp.write_all(content)?;
    tmp.as_file().set_permissions(Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries() -> Vec<FileEntry> {
        vec![
            FileEntry::regular("/home/u/.bashrc", 0o644, 0, b"bash".to_vec()),
            FileEntry::regular("/home/u/.config/nvim/init.lua", 0o644, 0, b"lua".to_vec()),
            FileEntry::symlink("/home/u/.vimrc", "/home/u/.config/nvim/init.lua", 0o777, 0),
        ]
    }

    fn paths(entries: &[FileEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/a//b/./c/"), "/a/b/c");
        assert_eq!(clean_path("/a/b/../c"), "/a/c");
        assert_eq!(clean_path("/../a"), "/a");
        assert_eq!(clean_path("a/../.."), "..");
        assert_eq!(clean_path("./"), ".");
        assert_eq!(clean_path(""), ".");
    }

    #[test]
    fn test_filter_entries_by_full_path() {
        let kept = filter_entries(entries(), &["/home/u/.bashrc".into()]);
        assert_eq!(paths(&kept), vec!["/home/u/.bashrc"]);
    }

    #[test]
    fn test_filter_entries_by_unclean_path() {
        let kept = filter_entries(entries(), &["/home/u/./.config//nvim/init.lua".into()]);
        assert_eq!(paths(&kept), vec!["/home/u/.config/nvim/init.lua"]);
    }

    #[test]
    fn test_filter_entries_by_basename() {
        let kept = filter_entries(entries(), &[".vimrc".into(), "init.lua".into()]);
        assert_eq!(
            paths(&kept),
            vec!["/home/u/.config/nvim/init.lua", "/home/u/.vimrc"]
        );
    }

    #[test]
    fn test_filter_entries_empty_selection_keeps_all() {
        assert_eq!(filter_entries(entries(), &[]).len(), 3);
    }

    #[test]
    fn test_target_path_flattens_under_target_dir() {
        let e = &entries()[1];
        assert_eq!(
            target_path(e, None),
            PathBuf::from("/home/u/.config/nvim/init.lua")
        );
        assert_eq!(
            target_path(e, Some(Path::new("/tmp/out"))),
            PathBuf::from("/tmp/out/init.lua")
        );
    }

    #[test]
    fn test_basename() {
        assert_eq!(basename("/a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
        assert_eq!(basename("/a/b/"), "b");
    }

    #[test]
    fn test_event_names() {
        assert_eq!(RestoreEvent::BackedUp.to_string(), "backed-up");
        assert_eq!(RestoreEvent::WouldRestore.to_string(), "would-restore");
        assert_eq!(RestoreEvent::DiffError.to_string(), "diff-error");
    }

    #[test]
    fn test_materialize_regular_sets_mode_and_creates_parents() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("deep/nested/run.sh");
        let entry = FileEntry::regular("run.sh", 0o755, 0, b"#!/bin/sh\n".to_vec());

        materialize(&entry, &target).unwrap();
        assert_eq!(fs::read(&target).unwrap(), b"#!/bin/sh\n");
        let mode = fs::metadata(&target).unwrap().permissions().mode() & MODE_MASK;
        assert_eq!(mode, 0o755);
    }

    #[test]
    fn test_materialize_replaces_existing_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("conf");
        fs::write(&target, "OLD").unwrap();

        let entry = FileEntry::regular("conf", 0o600, 0, b"NEW".to_vec());
        materialize(&entry, &target).unwrap();
        assert_eq!(fs::read_to_string(&target).unwrap(), "NEW");

        let leftovers: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|n| n.starts_with(RESTORE_TEMP_PREFIX))
            .collect();
        assert!(leftovers.is_empty(), "{leftovers:?}");
    }

    #[test]
    fn test_materialize_symlink_replaces_file() {
        let tmp = TempDir::new().unwrap();
        let target = tmp.path().join("link");
        fs::write(&target, "was a file").unwrap();

        let entry = FileEntry::symlink("link", "/etc/hostname", 0o777, 0);
        materialize(&entry, &target).unwrap();
        let meta = fs::symlink_metadata(&target).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(&target).unwrap(), PathBuf::from("/etc/hostname"));
    }

    #[test]
    fn test_materialize_deferred_entry_fails() {
        let tmp = TempDir::new().unwrap();
        let entry = FileEntry::deferred("x", 3, 0o644, 0);
        let err = materialize(&entry, &tmp.path().join("x")).unwrap_err();
        assert!(matches!(err, DkError::Archive(_)));
        assert!(!tmp.path().join("x").exists());
    }

    #[test]
    fn test_missing_backup_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = validate_backup(
            &tmp.path().join("gone.tar.gz.enc"),
            &SecretString::from("pw"),
        )
        .unwrap_err();
        assert!(matches!(err, DkError::BackupNotFound(_)));
    }

    #[test]
    fn test_missing_metadata_is_not_found() {
        let tmp = TempDir::new().unwrap();
        let enc = tmp.path().join("b.tar.gz.enc");
        fs::write(&enc, [1u8; 64]).unwrap();
        let err = validate_backup(&enc, &SecretString::from("pw")).unwrap_err();
        match err {
            DkError::BackupNotFound(p) => assert_eq!(p, metadata_path(&enc)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
