//! `.tar.gz` reader
//!
//! Directory members and any type other than regular files and symlinks
//! are skipped. After the last member the rest of the gzip stream is
//! drained so that a damaged trailer (CRC or length) is reported.

use std::io::{self, Read};

use dk_core::{DkError, DkResult, FileEntry};
use flate2::read::GzDecoder;
use tar::{Archive, EntryType};
use tracing::debug;

fn archive_err(context: &'static str) -> impl Fn(io::Error) -> DkError {
    move |e| DkError::Archive(format!("{context}: {e}"))
}

/// Decode every regular file and symlink, with file contents.
pub fn decode_archive(data: &[u8]) -> DkResult<Vec<FileEntry>> {
    read_entries(data, true)
}

/// Decode entry metadata only; regular entries keep their size but no content.
pub fn list_archive(data: &[u8]) -> DkResult<Vec<FileEntry>> {
    read_entries(data, false)
}

fn read_entries(data: &[u8], keep_content: bool) -> DkResult<Vec<FileEntry>> {
    let mut archive = Archive::new(GzDecoder::new(data));
    let mut out = Vec::new();

    for entry in archive.entries().map_err(archive_err("reading tar stream"))? {
        let mut entry = entry.map_err(archive_err("reading tar header"))?;

        let path = String::from_utf8_lossy(&entry.path_bytes()).into_owned();
        let header = entry.header();
        let kind = header.entry_type();
        let mode = header.mode().map_err(archive_err("bad mode field"))?;
        let mtime = header.mtime().map_err(archive_err("bad mtime field"))?;
        let mtime = i64::try_from(mtime).unwrap_or(i64::MAX);

        match kind {
            EntryType::Symlink => {
                let target = entry
                    .link_name_bytes()
                    .map(|b| String::from_utf8_lossy(&b).into_owned())
                    .unwrap_or_default();
                out.push(FileEntry::symlink(path, target, mode, mtime));
            }
            EntryType::Regular | EntryType::Continuous => {
                let size = entry.size();
                let mut content = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);
                entry
                    .read_to_end(&mut content)
                    .map_err(archive_err("reading entry body"))?;
                if content.len() as u64 != size {
                    return Err(DkError::Archive(format!(
                        "{path}: body is {} bytes, header says {size}",
                        content.len()
                    )));
                }
                let decoded = FileEntry::regular(path, mode, mtime, content);
                out.push(if keep_content {
                    decoded
                } else {
                    decoded.without_content()
                });
            }
            EntryType::Directory => continue,
            other => {
                debug!(path = %path, entry_type = ?other, "skipping unsupported tar member");
            }
        }
    }

    let mut rest = archive.into_inner();
    io::copy(&mut rest, &mut io::sink()).map_err(archive_err("verifying gzip trailer"))?;

    Ok(out)
}
