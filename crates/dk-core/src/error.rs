use std::path::PathBuf;

use thiserror::Error;

pub type DkResult<T> = Result<T, DkError>;

#[derive(Debug, Error)]
pub enum DkError {
    #[error("config error: {0}")]
    Config(String),

    #[error("no files to back up")]
    NoInputs,

    #[error("I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("cipher error: {0}")]
    Cipher(String),

    /// Wrong password and tampered ciphertext are deliberately indistinguishable.
    #[error("invalid password or corrupted backup")]
    Authentication,

    #[error("format error: {0}")]
    Format(String),

    #[error("backup not found: {}", .0.display())]
    BackupNotFound(PathBuf),

    #[error("file {0} not found in backup")]
    EntryNotFound(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl DkError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DkError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Attach a human-readable context to an `io::Result`, producing `DkError::Io`.
pub trait IoContext<T> {
    fn io_context<C, F>(self, f: F) -> DkResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context<C, F>(self, f: F) -> DkResult<T>
    where
        C: Into<String>,
        F: FnOnce() -> C,
    {
        self.map_err(|source| DkError::io(f(), source))
    }
}
