//! Streaming `.tar.gz` writer
//!
//! The `tar` builder refuses absolute member names, so headers are filled in
//! by hand: names up to 100 bytes go straight into the ustar `name` field,
//! longer ones are preceded by a GNU `././@LongLink` record. Link targets get
//! the same treatment through the `linkname` field.
//!
//! Modification times before the Unix epoch are stored as 0; the octal
//! `mtime` field has no sign.

use std::fs::File;
use std::io::{Read, Write};

use dk_core::{DkError, DkResult, EntryKind, FileEntry, IoContext};
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, EntryType, Header};
use tracing::trace;

const NAME_FIELD_LEN: usize = 100;
const LONG_LINK_NAME: &[u8] = b"././@LongLink";

/// Writes `FileEntry` values into a gzip-compressed tar stream.
pub struct ArchiveWriter<W: Write> {
    builder: Builder<GzEncoder<W>>,
    entries: usize,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            builder: Builder::new(GzEncoder::new(inner, Compression::default())),
            entries: 0,
        }
    }

    /// Number of entries appended so far.
    pub fn len(&self) -> usize {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Append one entry.
    ///
    /// A regular entry without in-memory content is read from its `path`;
    /// the file must still hold exactly `size` bytes.
    pub fn append(&mut self, entry: &FileEntry) -> DkResult<()> {
        let mut header = Header::new_gnu();
        header.set_mode(entry.mode);
        header.set_mtime(entry.mtime.max(0) as u64);
        header.set_uid(0);
        header.set_gid(0);

        match &entry.kind {
            EntryKind::Symlink { link_target } => {
                header.set_entry_type(EntryType::Symlink);
                header.set_size(0);
                self.set_long_field(&mut header, Field::LinkName, link_target.as_bytes())?;
                self.set_long_field(&mut header, Field::Name, entry.path.as_bytes())?;
                header.set_cksum();
                self.builder
                    .append(&header, std::io::empty())
                    .io_context(|| format!("writing archive entry: {}", entry.path))?;
            }
            EntryKind::Regular { size, content } => {
                let loaded;
                let body: &[u8] = match content {
                    Some(bytes) => {
                        if bytes.len() as u64 != *size {
                            return Err(DkError::Archive(format!(
                                "{}: content is {} bytes but size says {size}",
                                entry.path,
                                bytes.len()
                            )));
                        }
                        bytes
                    }
                    None => {
                        loaded = read_exact_size(&entry.path, *size)?;
                        &loaded
                    }
                };

                header.set_entry_type(EntryType::Regular);
                header.set_size(*size);
                self.set_long_field(&mut header, Field::Name, entry.path.as_bytes())?;
                header.set_cksum();
                self.builder
                    .append(&header, body)
                    .io_context(|| format!("writing archive entry: {}", entry.path))?;
            }
        }

        self.entries += 1;
        trace!(path = %entry.path, size = entry.size(), "archived entry");
        Ok(())
    }

    /// Write the end-of-archive marker and gzip trailer, returning the sink.
    pub fn finish(self) -> DkResult<W> {
        let gz = self
            .builder
            .into_inner()
            .io_context(|| "finishing tar stream")?;
        gz.finish().io_context(|| "finishing gzip stream")
    }

    fn set_long_field(&mut self, header: &mut Header, field: Field, value: &[u8]) -> DkResult<()> {
        if value.len() > NAME_FIELD_LEN {
            let mut long = Header::new_gnu();
            long.as_old_mut().name[..LONG_LINK_NAME.len()].copy_from_slice(LONG_LINK_NAME);
            long.set_mode(0o644);
            long.set_uid(0);
            long.set_gid(0);
            long.set_mtime(0);
            long.set_entry_type(field.long_entry_type());
            // The GNU record carries a trailing NUL
            long.set_size(value.len() as u64 + 1);
            long.set_cksum();
            self.builder
                .append(&long, value.chain(&b"\0"[..]))
                .io_context(|| "writing GNU long-name record")?;
        }

        let dst = match field {
            Field::Name => &mut header.as_old_mut().name,
            Field::LinkName => &mut header.as_old_mut().linkname,
        };
        let n = value.len().min(NAME_FIELD_LEN);
        dst[..n].copy_from_slice(&value[..n]);
        Ok(())
    }
}

#[derive(Clone, Copy)]
enum Field {
    Name,
    LinkName,
}

impl Field {
    fn long_entry_type(self) -> EntryType {
        match self {
            Field::Name => EntryType::GNULongName,
            Field::LinkName => EntryType::GNULongLink,
        }
    }
}

fn read_exact_size(path: &str, size: u64) -> DkResult<Vec<u8>> {
    let file = File::open(path).io_context(|| format!("opening {path}"))?;
    let mut buf = Vec::with_capacity(size as usize);
    file.take(size)
        .read_to_end(&mut buf)
        .io_context(|| format!("reading {path}"))?;
    if buf.len() as u64 != size {
        return Err(DkError::Archive(format!(
            "{path}: file shrank during backup ({} of {size} bytes)",
            buf.len()
        )));
    }
    Ok(buf)
}

/// Encode `entries` into an in-memory `.tar.gz`.
pub fn encode_archive(entries: &[FileEntry]) -> DkResult<Vec<u8>> {
    let mut writer = ArchiveWriter::new(Vec::new());
    for entry in entries {
        writer.append(entry)?;
    }
    writer.finish()
}
