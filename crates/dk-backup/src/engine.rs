//! Backup orchestrator: collect → archive → checksum → encrypt → write
//!
//! The plaintext archive is spooled to a temporary file that is removed on
//! every exit path. The `.enc` and `.meta.json` files are written through a
//! temporary sibling and linked into place without clobbering.

use std::fs::{self, DirBuilder, Permissions};
use std::io::{BufWriter, Read, Seek, Write};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, Utc};
use dk_archive::ArchiveWriter;
use dk_core::paths::{backup_name, backup_path, metadata_path};
use dk_core::{BackupConfig, CancelToken, DkError, DkResult, FileEntry, IoContext};
use dk_crypto::{derive_key, encrypt, generate_salt, EncryptionMetadata, KdfParams};
use secrecy::SecretString;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::collector::collect_files;

/// File-name prefix of the plaintext archive spool file.
pub const SPOOL_PREFIX: &str = "dotkeeper-backup-";

const BACKUP_MODE: u32 = 0o600;
const METADATA_MODE: u32 = 0o644;
const BACKUP_DIR_MODE: u32 = 0o755;

/// Knobs the defaults of which suit interactive use.
#[derive(Debug, Clone, Default)]
pub struct BackupOptions {
    /// Argon2id costs for the new backup; recorded in its metadata
    pub kdf: KdfParams,
    /// Where to spool the plaintext archive (default: the OS temp dir)
    pub spool_dir: Option<PathBuf>,
    pub cancel: Option<CancelToken>,
}

/// Outcome of a completed backup
#[derive(Debug, Clone)]
pub struct BackupResult {
    pub backup_path: PathBuf,
    pub metadata_path: PathBuf,
    /// `backup-YYYY-MM-DD-HHMMSS`
    pub name: String,
    pub file_count: usize,
    /// Sum of regular file sizes
    pub total_size: u64,
    pub duration: Duration,
    /// SHA-256 of the plaintext `.tar.gz`, lowercase hex
    pub checksum_hex: String,
}

/// Back up everything `cfg` selects, encrypting under `password`.
pub fn backup(cfg: &BackupConfig, password: &SecretString) -> DkResult<BackupResult> {
    backup_with(cfg, password, &BackupOptions::default())
}

pub fn backup_with(
    cfg: &BackupConfig,
    password: &SecretString,
    opts: &BackupOptions,
) -> DkResult<BackupResult> {
    backup_at(cfg, password, opts, Local::now())
}

/// The backup name and the metadata timestamp both come from `now`.
fn backup_at(
    cfg: &BackupConfig,
    password: &SecretString,
    opts: &BackupOptions,
    now: DateTime<Local>,
) -> DkResult<BackupResult> {
    let start = Instant::now();
    cfg.validate()?;

    let backup_dir = cfg.resolved_backup_dir();
    DirBuilder::new()
        .recursive(true)
        .mode(BACKUP_DIR_MODE)
        .create(&backup_dir)
        .io_context(|| format!("creating backup directory: {}", backup_dir.display()))?;

    let name = backup_name(&now);
    let enc_path = backup_path(&backup_dir, &name);
    let meta_path = metadata_path(&enc_path);

    let entries = collect_files(&cfg.roots(), &cfg.exclude);
    if entries.is_empty() {
        return Err(DkError::NoInputs);
    }
    info!(name = %name, files = entries.len(), "creating backup");

    let archive = spool_archive(&entries, opts)?;
    let checksum_hex = format!("{:x}", Sha256::digest(&archive));
    debug!(bytes = archive.len(), checksum = %checksum_hex, "archive built");

    let salt = generate_salt()?;
    let key = derive_key(password, &salt, &opts.kdf)?;
    let frame = encrypt(&archive, key.as_bytes(), &salt)?;

    write_new_file(&enc_path, &frame, BACKUP_MODE)?;

    let metadata = EncryptionMetadata::new(
        salt,
        &opts.kdf,
        archive.len() as u64,
        now.with_timezone(&Utc),
    );
    let written = metadata
        .to_json()
        .and_then(|json| write_new_file(&meta_path, &json, METADATA_MODE));
    if let Err(e) = written {
        // An .enc without its metadata cannot be decrypted
        if let Err(rm) = fs::remove_file(&enc_path) {
            warn!(path = %enc_path.display(), error = %rm, "failed to remove orphaned backup");
        }
        return Err(e);
    }

    let result = BackupResult {
        backup_path: enc_path,
        metadata_path: meta_path,
        name,
        file_count: entries.len(),
        total_size: entries.iter().map(FileEntry::size).sum(),
        duration: start.elapsed(),
        checksum_hex,
    };
    info!(
        path = %result.backup_path.display(),
        files = result.file_count,
        bytes = result.total_size,
        elapsed_ms = result.duration.as_millis() as u64,
        "backup complete"
    );
    Ok(result)
}

/// Write the archive to a spool file and read it back.
///
/// The spool file is a `NamedTempFile`, so it is unlinked when it drops,
/// whichever way this function returns.
fn spool_archive(entries: &[FileEntry], opts: &BackupOptions) -> DkResult<Vec<u8>> {
    let mut builder = tempfile::Builder::new();
    builder.prefix(SPOOL_PREFIX).suffix(".tar.gz");
    let spool = match &opts.spool_dir {
        Some(dir) => builder.tempfile_in(dir),
        None => builder.tempfile(),
    }
    .io_context(|| "creating archive spool file")?;
    debug!(path = %spool.path().display(), "spooling archive");

    let mut writer = ArchiveWriter::new(BufWriter::new(spool));
    for entry in entries {
        if let Some(cancel) = &opts.cancel {
            cancel.check()?;
        }
        writer.append(entry)?;
    }

    let mut spool = writer
        .finish()?
        .into_inner()
        .map_err(|e| DkError::io("flushing archive spool file", e.into_error()))?;

    let mut archive = Vec::new();
    spool
        .rewind()
        .and_then(|_| spool.read_to_end(&mut archive))
        .io_context(|| "reading archive spool file")?;
    Ok(archive)
}

/// Create `path` with `data` and `mode`, failing if it already exists.
fn write_new_file(path: &Path, data: &[u8], mode: u32) -> DkResult<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::Builder::new()
        .prefix(".dotkeeper-write-")
        .tempfile_in(dir)
        .io_context(|| format!("creating temp file in {}", dir.display()))?;

    write_and_sync(&mut tmp, data, mode)
        .io_context(|| format!("writing {}", path.display()))?;

    tmp.persist_noclobber(path)
        .map_err(|e| DkError::io(format!("creating {}", path.display()), e.error))?;
    Ok(())
}

fn write_and_sync(tmp: &mut NamedTempFile, data: &[u8], mode: u32) -> std::io::Result<()> {
    tmp.write_all(data)?;
    tmp.as_file().set_permissions(Permissions::from_mode(mode))?;
    tmp.as_file().sync_all()
}
