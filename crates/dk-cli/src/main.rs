//! dotkeeper: encrypted dotfile backups
//!
//! Commands:
//!   backup                     - collect configured files into a new encrypted backup
//!   restore <backup>           - restore files, moving existing targets to .bak.<ts>
//!   diff <backup> <file>       - diff one file in a backup against disk
//!   validate <backup>          - check that a backup decrypts
//!   contents <backup>          - list the files in a backup
//!   list                       - list backups in the backup directory
//!   delete <backup>            - remove a backup and its metadata
//!
//! The password is read from DOTKEEPER_PASSWORD, or prompted for.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use tracing::{debug, info};

use dk_backup::{delete_backup, find_backups, resolve_backup_path};
use dk_core::paths::default_config_path;
use dk_core::{BackupConfig, EntryKind};
use dk_restore::{diff_stats, RestoreEvent, RestoreOptions};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "dotkeeper",
    version,
    about = "Encrypted dotfile backups",
    long_about = "dotkeeper: back up dotfiles into password-encrypted archives and restore them safely"
)]
struct Cli {
    /// Path to config.yaml (default: $XDG_CONFIG_HOME/dotkeeper/config.yaml)
    #[arg(long, short = 'c', env = "DOTKEEPER_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "DOTKEEPER_LOG", default_value = "info", global = true)]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "DOTKEEPER_LOG_FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new encrypted backup of the configured files and folders
    Backup,

    /// Restore files from a backup
    ///
    /// Existing targets are renamed to <name>.bak.<YYYYMMDD-HHMMSS> first,
    /// unless --force or --skip-existing is given.
    Restore {
        /// Backup file path, or a name in the backup directory
        backup: String,
        /// Show what would be restored without writing anything
        #[arg(long)]
        dry_run: bool,
        /// Print a unified diff for each file that differs
        #[arg(long)]
        diff: bool,
        /// Overwrite existing files without keeping a .bak copy
        #[arg(long)]
        force: bool,
        /// Leave existing files untouched
        #[arg(long)]
        skip_existing: bool,
        /// Restore every file as <DIR>/<basename> instead of its original path
        #[arg(long, value_name = "DIR")]
        target_dir: Option<PathBuf>,
        /// Only restore these files (full path or basename); repeatable
        #[arg(long = "file", value_name = "F")]
        files: Vec<String>,
    },

    /// Diff one file from a backup against its current contents
    Diff {
        backup: String,
        /// Full path or basename of the file in the backup
        file: String,
    },

    /// Check that a backup decrypts and decodes with the given password
    Validate { backup: String },

    /// List the files stored in a backup
    Contents { backup: String },

    /// List backups in the backup directory, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Delete a backup and its metadata file
    Delete {
        backup: String,
        /// Do not ask for confirmation
        #[arg(long)]
        force: bool,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);
    debug!(version = env!("CARGO_PKG_VERSION"), "dotkeeper starting");

    let config = cli.config.as_deref();
    match cli.command {
        Commands::Backup => cmd_backup(config),
        Commands::Restore {
            backup,
            dry_run,
            diff,
            force,
            skip_existing,
            target_dir,
            files,
        } => {
            let flags = RestoreFlags {
                dry_run,
                diff,
                force,
                skip_existing,
                target_dir,
                files,
            };
            cmd_restore(config, &backup, flags)
        }
        Commands::Diff { backup, file } => cmd_diff(config, &backup, &file),
        Commands::Validate { backup } => cmd_validate(config, &backup),
        Commands::Contents { backup } => cmd_contents(config, &backup),
        Commands::List { json } => cmd_list(config, json),
        Commands::Delete { backup, force } => cmd_delete(config, &backup, force),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stdout carries command output; logs go to stderr
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

// ── Config and password helpers ───────────────────────────────────────────────

fn load_config(path: Option<&Path>) -> Result<BackupConfig> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => default_config_path().context("cannot determine the config directory")?,
    };
    BackupConfig::load_from_path(&path)
        .with_context(|| format!("loading config {}", path.display()))
}

/// A path that exists is used as is; anything else names a backup in the
/// configured backup directory.
fn locate_backup(config: Option<&Path>, backup: &str) -> Result<PathBuf> {
    let direct = PathBuf::from(backup);
    if direct.is_file() {
        return Ok(direct);
    }
    let cfg = load_config(config)?;
    Ok(resolve_backup_path(&cfg.resolved_backup_dir(), backup))
}

fn read_password(confirm: bool) -> Result<SecretString> {
    if let Ok(pw) = std::env::var("DOTKEEPER_PASSWORD") {
        return Ok(SecretString::from(pw));
    }
    let pw = rpassword::prompt_password("Password: ").context("reading password")?;
    if confirm {
        let again = rpassword::prompt_password("Confirm password: ").context("reading password")?;
        if pw != again {
            bail!("passwords do not match");
        }
    }
    Ok(SecretString::from(pw))
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `dotkeeper backup` ────────────────────────────────────────────────────────

fn cmd_backup(config: Option<&Path>) -> Result<()> {
    let cfg = load_config(config)?;
    cfg.validate()?;
    let password = read_password(true)?;

    let spinner = make_spinner("backup");
    spinner.set_message("collecting, compressing and encrypting...");
    let result = dk_backup::backup(&cfg, &password);
    spinner.finish_and_clear();
    let result = result?;

    println!("Backup complete:");
    println!("  name:     {}", result.name);
    println!("  files:    {}", result.file_count);
    println!("  size:     {}", fmt_bytes(result.total_size));
    println!("  path:     {}", result.backup_path.display());
    println!("  sha256:   {}", result.checksum_hex);
    println!("  duration: {:.1}s", result.duration.as_secs_f64());
    Ok(())
}

// ── `dotkeeper restore` ───────────────────────────────────────────────────────

struct RestoreFlags {
    dry_run: bool,
    diff: bool,
    force: bool,
    skip_existing: bool,
    target_dir: Option<PathBuf>,
    files: Vec<String>,
}

fn cmd_restore(config: Option<&Path>, backup: &str, flags: RestoreFlags) -> Result<()> {
    let path = locate_backup(config, backup)?;
    let password = read_password(false)?;
    let dry_run = flags.dry_run;

    let mut stdout = io::stdout();
    let opts = RestoreOptions {
        dry_run,
        show_diff: flags.diff,
        force: flags.force,
        skip_existing: flags.skip_existing,
        target_dir: flags.target_dir,
        selected_files: flags.files,
        diff_sink: flags.diff.then_some(&mut stdout as &mut dyn Write),
        progress: Some(Box::new(|target: &Path, event: RestoreEvent| {
            eprintln!("  {event:<13} {}", target.display());
        })),
        cancel: None,
    };

    let result = dk_restore::restore(&path, &password, opts)?;
    info!(backup = %path.display(), "restore finished");

    if dry_run {
        println!("Dry run ({} files in backup):", result.total_files);
        println!("  would restore: {}", result.files_skipped);
        println!("  conflicts:     {}", result.files_conflict);
    } else {
        println!("Restore complete ({} files in backup):", result.total_files);
        println!("  restored:  {}", result.files_restored);
        println!("  skipped:   {}", result.files_skipped);
        println!("  conflicts: {}", result.files_conflict);
        for bak in &result.backup_files {
            println!("  backup:    {}", bak.display());
        }
    }
    Ok(())
}

// ── `dotkeeper diff` ──────────────────────────────────────────────────────────

fn cmd_diff(config: Option<&Path>, backup: &str, file: &str) -> Result<()> {
    let path = locate_backup(config, backup)?;
    let password = read_password(false)?;

    let diff = dk_restore::get_file_diff(&path, &password, file)?;
    if diff.is_empty() {
        println!("{file}: no differences");
        return Ok(());
    }
    print!("{diff}");
    if !diff.ends_with('\n') {
        println!();
    }
    let (added, removed) = diff_stats(&diff);
    if added + removed > 0 {
        println!("{added} insertions(+), {removed} deletions(-)");
    }
    Ok(())
}

// ── `dotkeeper validate` / `contents` ─────────────────────────────────────────

fn cmd_validate(config: Option<&Path>, backup: &str) -> Result<()> {
    let path = locate_backup(config, backup)?;
    let password = read_password(false)?;
    dk_restore::validate_backup(&path, &password)?;
    println!("{}: OK", path.display());
    Ok(())
}

fn cmd_contents(config: Option<&Path>, backup: &str) -> Result<()> {
    let path = locate_backup(config, backup)?;
    let password = read_password(false)?;
    let entries = dk_restore::list_backup_contents(&path, &password)?;

    let mut out = io::stdout().lock();
    for entry in &entries {
        let mtime = DateTime::<Utc>::from_timestamp(entry.mtime, 0)
            .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        match &entry.kind {
            EntryKind::Symlink { link_target } => writeln!(
                out,
                "{:04o} {:>10} {mtime}  {} -> {link_target}",
                entry.mode, "-", entry.path
            )?,
            EntryKind::Regular { size, .. } => writeln!(
                out,
                "{:04o} {:>10} {mtime}  {}",
                entry.mode,
                fmt_bytes(*size),
                entry.path
            )?,
        }
    }
    writeln!(out, "{} files", entries.len())?;
    Ok(())
}

// ── `dotkeeper list` / `delete` ───────────────────────────────────────────────

fn cmd_list(config: Option<&Path>, json: bool) -> Result<()> {
    let cfg = load_config(config)?;
    let dir = cfg.resolved_backup_dir();
    let backups = find_backups(&dir)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }
    if backups.is_empty() {
        println!("No backups in {}", dir.display());
        return Ok(());
    }
    for b in &backups {
        println!(
            "{:<40} {}  {:>10}",
            b.name,
            b.created.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
            fmt_bytes(b.size)
        );
    }
    Ok(())
}

fn cmd_delete(config: Option<&Path>, backup: &str, force: bool) -> Result<()> {
    let cfg = load_config(config)?;
    let dir = cfg.resolved_backup_dir();
    if !force && !confirm(&format!("Delete backup {backup}?"))? {
        println!("Aborted.");
        return Ok(());
    }
    let removed = delete_backup(&dir, backup)?;
    println!("Deleted: {}", removed.display());
    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    eprint!("{question} [y/N] ");
    io::stderr().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
