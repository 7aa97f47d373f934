use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{DkError, DkResult, IoContext};
use crate::paths::expand_home;

/// Backup configuration (loaded from `config.yaml`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Directory receiving `<name>.tar.gz.enc` + `.meta.json` pairs (may start with `~`)
    pub backup_dir: String,
    /// Explicit file roots, in backup order
    pub files: Vec<String>,
    /// Explicit directory roots, collected after `files`
    pub folders: Vec<String>,
    /// Glob exclusions matched against basenames; a trailing `/` matches directories only
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    /// Entries of `files` temporarily switched off
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_files: Vec<String>,
    /// Entries of `folders` temporarily switched off
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disabled_folders: Vec<String>,
}

impl BackupConfig {
    /// Parse a YAML config file.
    pub fn load_from_path(path: &Path) -> DkResult<Self> {
        let content = std::fs::read_to_string(path)
            .io_context(|| format!("reading config: {}", path.display()))?;
        let config = Self::from_yaml(&content)
            .map_err(|e| DkError::Config(format!("parsing {}: {e}", path.display())))?;
        tracing::debug!(
            path = %path.display(),
            files = config.files.len(),
            folders = config.folders.len(),
            "loaded config"
        );
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(content)
    }

    pub fn validate(&self) -> DkResult<()> {
        if self.backup_dir.trim().is_empty() {
            return Err(DkError::Config("backup_dir is required".into()));
        }
        if self.files.is_empty() && self.folders.is_empty() {
            return Err(DkError::Config(
                "at least one file or folder must be specified".into(),
            ));
        }
        Ok(())
    }

    /// `backup_dir` with `~` expanded.
    pub fn resolved_backup_dir(&self) -> PathBuf {
        expand_home(self.backup_dir.trim())
    }

    /// `files` minus `disabled_files`, order preserved.
    pub fn active_files(&self) -> Vec<String> {
        without(&self.files, &self.disabled_files)
    }

    /// `folders` minus `disabled_folders`, order preserved.
    pub fn active_folders(&self) -> Vec<String> {
        without(&self.folders, &self.disabled_folders)
    }

    /// Collection roots: active files followed by active folders.
    pub fn roots(&self) -> Vec<String> {
        let mut roots = self.active_files();
        roots.extend(self.active_folders());
        roots
    }
}

fn without(items: &[String], disabled: &[String]) -> Vec<String> {
    items
        .iter()
        .filter(|i| !disabled.contains(i))
        .cloned()
        .collect()
}
