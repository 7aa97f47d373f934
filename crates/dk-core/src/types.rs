/// Lower 12 mode bits: permissions plus setuid/setgid/sticky.
pub const MODE_MASK: u32 = 0o7777;

/// What a `FileEntry` carries besides its common metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// A regular file. `content` is `None` when the bytes are still on disk
    /// at `FileEntry::path` (collection) or were dropped to save memory (listing).
    Regular { size: u64, content: Option<Vec<u8>> },
    /// A symbolic link, recorded by its literal target. Never has content.
    Symlink { link_target: String },
}

/// One file or symlink moving through the backup or restore pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path as seen at collection time, stored verbatim in the archive
    pub path: String,
    /// Permission bits (masked to `MODE_MASK`)
    pub mode: u32,
    /// Modification time, seconds since the Unix epoch
    pub mtime: i64,
    pub kind: EntryKind,
}

impl FileEntry {
    /// A regular file whose bytes are held in memory.
    pub fn regular(path: impl Into<String>, mode: u32, mtime: i64, content: Vec<u8>) -> Self {
        Self {
            path: path.into(),
            mode: mode & MODE_MASK,
            mtime,
            kind: EntryKind::Regular {
                size: content.len() as u64,
                content: Some(content),
            },
        }
    }

    /// A regular file whose bytes will be read from `path` when archived.
    pub fn deferred(path: impl Into<String>, size: u64, mode: u32, mtime: i64) -> Self {
        Self {
            path: path.into(),
            mode: mode & MODE_MASK,
            mtime,
            kind: EntryKind::Regular {
                size,
                content: None,
            },
        }
    }

    pub fn symlink(
        path: impl Into<String>,
        link_target: impl Into<String>,
        mode: u32,
        mtime: i64,
    ) -> Self {
        Self {
            path: path.into(),
            mode: mode & MODE_MASK,
            mtime,
            kind: EntryKind::Symlink {
                link_target: link_target.into(),
            },
        }
    }

    /// Byte count of the file body; 0 for symlinks.
    pub fn size(&self) -> u64 {
        match &self.kind {
            EntryKind::Regular { size, .. } => *size,
            EntryKind::Symlink { .. } => 0,
        }
    }

    pub fn is_symlink(&self) -> bool {
        matches!(self.kind, EntryKind::Symlink { .. })
    }

    pub fn link_target(&self) -> Option<&str> {
        match &self.kind {
            EntryKind::Symlink { link_target } => Some(link_target),
            EntryKind::Regular { .. } => None,
        }
    }

    pub fn content(&self) -> Option<&[u8]> {
        match &self.kind {
            EntryKind::Regular { content, .. } => content.as_deref(),
            EntryKind::Symlink { .. } => None,
        }
    }

    /// Drop materialized content, keeping size and metadata.
    pub fn without_content(mut self) -> Self {
        if let EntryKind::Regular { content, .. } = &mut self.kind {
            *content = None;
        }
        self
    }

    /// Final path component, or the whole path when it has none.
    pub fn basename(&self) -> &str {
        std::path::Path::new(&self.path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regular_size_matches_content() {
        let e = FileEntry::regular("/home/u/.bashrc", 0o100644, 10, b"hello".to_vec());
        assert_eq!(e.size(), 5);
        assert_eq!(e.mode, 0o644, "file type bits are masked off");
        assert_eq!(e.content(), Some(&b"hello"[..]));
        assert!(!e.is_symlink());
    }

    #[test]
    fn test_symlink_has_no_content() {
        let e = FileEntry::symlink("/home/u/link", "/etc/hostname", 0o777, 0);
        assert_eq!(e.size(), 0);
        assert_eq!(e.link_target(), Some("/etc/hostname"));
        assert!(e.content().is_none());
    }

    #[test]
    fn test_without_content_keeps_size() {
        let e = FileEntry::regular("/a/b.txt", 0o600, 0, vec![1, 2, 3]).without_content();
        assert_eq!(e.size(), 3);
        assert!(e.content().is_none());
        assert_eq!(e.basename(), "b.txt");
    }
}
