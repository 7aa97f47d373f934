//! Home-directory expansion and backup file naming

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone};

/// Suffix of the encrypted archive file
pub const BACKUP_SUFFIX: &str = ".tar.gz.enc";

/// Suffix appended to the archive path for its sidecar metadata
pub const METADATA_SUFFIX: &str = ".meta.json";

/// Expand a leading `~` or `~/` against the current user's home directory.
///
/// Returns the path unchanged when it has no tilde prefix or the home
/// directory cannot be determined.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return if path == "~" {
                home
            } else {
                home.join(&path[2..])
            };
        }
    }
    PathBuf::from(path)
}

/// `backup-YYYY-MM-DD-HHMMSS` for the given instant.
pub fn backup_name<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    format!("backup-{}", at.format("%Y-%m-%d-%H%M%S"))
}

/// `<dir>/<name>.tar.gz.enc`
pub fn backup_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{BACKUP_SUFFIX}"))
}

/// `<backup_path>.meta.json`
pub fn metadata_path(backup_path: &Path) -> PathBuf {
    let mut s = backup_path.as_os_str().to_os_string();
    s.push(METADATA_SUFFIX);
    PathBuf::from(s)
}

/// Backup name without the `.tar.gz.enc` suffix, if the path carries it.
pub fn name_from_path(backup_path: &Path) -> Option<String> {
    let file_name = backup_path.file_name()?.to_str()?;
    file_name
        .strip_suffix(BACKUP_SUFFIX)
        .map(|s| s.to_string())
}

/// Default config location: `$XDG_CONFIG_HOME/dotkeeper/config.yaml`,
/// falling back to `~/.config/dotkeeper/config.yaml`.
pub fn default_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| dirs::home_dir().map(|h| h.join(".config")))?;
    Some(base.join("dotkeeper").join("config.yaml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_expand_home() {
        let home = dirs::home_dir().expect("home dir");
        assert_eq!(expand_home("~"), home);
        assert_eq!(expand_home("~/.bashrc"), home.join(".bashrc"));
        assert_eq!(expand_home("/etc/hosts"), PathBuf::from("/etc/hosts"));
        // Only a bare tilde or tilde-slash is expanded
        assert_eq!(expand_home("~other/x"), PathBuf::from("~other/x"));
    }

    #[test]
    fn test_backup_naming() {
        let at = Utc.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        let name = backup_name(&at);
        assert_eq!(name, "backup-2024-03-09-070501");

        let path = backup_path(Path::new("/b"), &name);
        assert_eq!(path, PathBuf::from("/b/backup-2024-03-09-070501.tar.gz.enc"));
        assert_eq!(
            metadata_path(&path),
            PathBuf::from("/b/backup-2024-03-09-070501.tar.gz.enc.meta.json")
        );
        assert_eq!(name_from_path(&path).as_deref(), Some(name.as_str()));
        assert_eq!(name_from_path(Path::new("/b/other.txt")), None);
    }
}
