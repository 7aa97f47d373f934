//! dk-archive: serialize `FileEntry` lists as `.tar.gz`
//!
//! - `encode`: streaming writer; entries land in the order they are appended
//! - `decode`: parse a `.tar.gz` byte slice back into entries
//!
//! Entry names are the collected paths verbatim, absolute paths included.
//! Names and link targets longer than the 100-byte ustar field are carried
//! in GNU long-name records. Directory headers are never written.

pub mod decode;
pub mod encode;

pub use decode::{decode_archive, list_archive};
pub use encode::{encode_archive, ArchiveWriter};
