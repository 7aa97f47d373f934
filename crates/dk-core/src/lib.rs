//! dk-core: types shared by every dotkeeper crate
//!
//! - `error`: the error taxonomy returned by all library operations
//! - `types`: `FileEntry`, the unit flowing through backup and restore
//! - `config`: the backup configuration value consumed by the orchestrators
//! - `paths`: `~` expansion and backup file naming
//! - `cancel`: cooperative cancellation flag

pub mod cancel;
pub mod config;
pub mod error;
pub mod paths;
pub mod types;

pub use cancel::CancelToken;
pub use config::BackupConfig;
pub use error::{DkError, DkResult, IoContext};
pub use types::{EntryKind, FileEntry};
