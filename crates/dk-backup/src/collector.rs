//! Path collection: configured roots → ordered `FileEntry` list
//!
//! Per-path problems (missing roots, unreadable files, sockets, cycles) are
//! logged and skipped; collection itself never fails.

use std::collections::HashSet;
use std::fmt::Display;
use std::fs::{self, File};
use std::os::unix::fs::MetadataExt;
use std::path::{Component, Path, PathBuf};

use dk_core::paths::expand_home;
use dk_core::FileEntry;
use glob::{MatchOptions, Pattern};
use tracing::{debug, warn};

/// Longest symlink chain tolerated while resolving the directories above a root.
pub const MAX_LINK_HOPS: usize = 20;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

struct Exclusion {
    pattern: Pattern,
    dirs_only: bool,
}

impl Exclusion {
    fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }
        let (body, dirs_only) = match raw.strip_suffix('/') {
            Some(body) => (body, true),
            None => (raw, false),
        };
        match Pattern::new(body) {
            Ok(pattern) => Some(Self { pattern, dirs_only }),
            Err(e) => {
                warn!(pattern = raw, error = %e, "ignoring invalid exclude pattern");
                None
            }
        }
    }

    fn matches(&self, path: &str, basename: &str, is_dir: bool) -> bool {
        if self.dirs_only {
            return is_dir && self.pattern.matches_with(basename, MATCH_OPTIONS);
        }
        self.pattern.matches_with(basename, MATCH_OPTIONS)
            || self.pattern.matches_with(path, MATCH_OPTIONS)
    }
}

/// Accumulates entries across roots, sharing one visited set.
pub struct Collector {
    exclusions: Vec<Exclusion>,
    visited: HashSet<PathBuf>,
    entries: Vec<FileEntry>,
    skipped: usize,
}

impl Collector {
    pub fn new<S: AsRef<str>>(exclude: &[S]) -> Self {
        Self {
            exclusions: exclude
                .iter()
                .filter_map(|p| Exclusion::parse(p.as_ref()))
                .collect(),
            visited: HashSet::new(),
            entries: Vec::new(),
            skipped: 0,
        }
    }

    /// Collect one root. Blank roots are ignored; `~` is expanded.
    pub fn add_root(&mut self, root: &str) {
        let trimmed = root.trim();
        if trimmed.is_empty() {
            return;
        }
        let path = expand_home(trimmed);

        if let Some(parent) = path.parent() {
            if link_hops(parent).is_none() {
                self.skip(
                    &path,
                    format_args!("symlink chain exceeds {MAX_LINK_HOPS} hops"),
                );
                return;
            }
        }

        self.visit(&path);
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    /// Number of paths skipped with a warning so far.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn into_entries(self) -> Vec<FileEntry> {
        self.entries
    }

    fn skip(&mut self, path: &Path, reason: impl Display) {
        self.skipped += 1;
        warn!(path = %path.display(), "skipping: {reason}");
    }

    fn is_excluded(&self, path: &str, basename: &str, is_dir: bool) -> bool {
        self.exclusions
            .iter()
            .any(|e| e.matches(path, basename, is_dir))
    }

    fn visit(&mut self, path: &Path) {
        let meta = match fs::symlink_metadata(path) {
            Ok(meta) => meta,
            Err(e) => return self.skip(path, format_args!("lstat failed: {e}")),
        };
        let Some(path_str) = path.to_str().map(str::to_owned) else {
            return self.skip(path, "path is not valid UTF-8");
        };
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path_str.clone());

        let file_type = meta.file_type();
        if self.is_excluded(&path_str, &basename, file_type.is_dir()) {
            debug!(path = %path_str, "excluded");
            return;
        }

        if file_type.is_symlink() {
            match fs::read_link(path) {
                Ok(target) => self.entries.push(FileEntry::symlink(
                    path_str,
                    target.to_string_lossy(),
                    meta.mode(),
                    meta.mtime(),
                )),
                Err(e) => self.skip(path, format_args!("readlink failed: {e}")),
            }
            return;
        }

        if file_type.is_dir() {
            let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
            if !self.visited.insert(canonical) {
                return self.skip(path, "directory already visited (cycle or overlapping root)");
            }

            let mut children = Vec::new();
            match fs::read_dir(path) {
                Ok(read_dir) => {
                    for entry in read_dir {
                        match entry {
                            Ok(entry) => children.push(entry.path()),
                            Err(e) => self.skip(path, format_args!("reading dir entry: {e}")),
                        }
                    }
                }
                Err(e) => return self.skip(path, format_args!("read dir failed: {e}")),
            }
            children.sort();
            for child in children {
                self.visit(&child);
            }
            return;
        }

        if !file_type.is_file() {
            return self.skip(path, "not a regular file");
        }
        if let Err(e) = File::open(path) {
            return self.skip(path, format_args!("file not readable: {e}"));
        }

        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        if !self.visited.insert(canonical) {
            debug!(path = %path_str, "already collected");
            return;
        }

        self.entries.push(FileEntry::deferred(
            path_str,
            meta.len(),
            meta.mode(),
            meta.mtime(),
        ));
    }
}

/// Collect `roots` in order, honouring `exclude` glob patterns.
///
/// Regular files come back as deferred entries: their bytes are read when
/// the archive is written.
pub fn collect_files<R, E>(roots: &[R], exclude: &[E]) -> Vec<FileEntry>
where
    R: AsRef<str>,
    E: AsRef<str>,
{
    let mut collector = Collector::new(exclude);
    for root in roots {
        collector.add_root(root.as_ref());
    }
    debug!(
        entries = collector.entries().len(),
        skipped = collector.skipped(),
        "collection finished"
    );
    collector.into_entries()
}

/// Symlinks traversed while resolving `path` component by component, or
/// `None` once more than `MAX_LINK_HOPS` are needed. Missing components end
/// the walk early; the caller's own lstat reports them.
fn link_hops(path: &Path) -> Option<usize> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        match std::env::current_dir() {
            Ok(cwd) => cwd.join(path),
            Err(_) => return Some(0),
        }
    };

    let mut pending: Vec<PathBuf> = components_rev(&absolute);
    let mut resolved = PathBuf::new();
    let mut hops = 0;

    while let Some(next) = pending.pop() {
        match next.components().next() {
            Some(Component::RootDir) => resolved = PathBuf::from("/"),
            Some(Component::ParentDir) => {
                resolved.pop();
            }
            Some(Component::Normal(name)) => {
                let candidate = resolved.join(name);
                match fs::symlink_metadata(&candidate) {
                    Ok(meta) if meta.file_type().is_symlink() => {
                        hops += 1;
                        if hops > MAX_LINK_HOPS {
                            return None;
                        }
                        let Ok(target) = fs::read_link(&candidate) else {
                            return Some(hops);
                        };
                        pending.extend(components_rev(&target));
                    }
                    Ok(_) => resolved = candidate,
                    Err(_) => return Some(hops),
                }
            }
            Some(Component::CurDir) | Some(Component::Prefix(_)) | None => {}
        }
    }
    Some(hops)
}

fn components_rev(path: &Path) -> Vec<PathBuf> {
    path.components()
        .rev()
        .map(|c| PathBuf::from(c.as_os_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::{symlink, PermissionsExt};
    use tempfile::TempDir;

    fn s(p: &Path) -> String {
        p.to_str().unwrap().to_string()
    }

    fn paths(entries: &[FileEntry]) -> Vec<String> {
        entries.iter().map(|e| e.path.clone()).collect()
    }

    #[test]
    fn test_roots_in_order_and_dirs_sorted() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::write(root.join("zshrc"), "z").unwrap();
        fs::create_dir_all(root.join("conf/sub")).unwrap();
        fs::write(root.join("conf/b.toml"), "b").unwrap();
        fs::write(root.join("conf/a.toml"), "a").unwrap();
        fs::write(root.join("conf/sub/c.toml"), "c").unwrap();

        let entries = collect_files(&[s(&root.join("zshrc")), s(&root.join("conf"))], &[] as &[&str]);

        assert_eq!(
            paths(&entries),
            vec![
                s(&root.join("zshrc")),
                s(&root.join("conf/a.toml")),
                s(&root.join("conf/b.toml")),
                s(&root.join("conf/sub/c.toml")),
            ]
        );
        assert_eq!(entries[0].size(), 1);
        assert!(entries[0].content().is_none(), "content is read at archive time");
    }

    #[test]
    fn test_mode_and_mtime_are_recorded() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("run.sh");
        fs::write(&file, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o750)).unwrap();

        let entries = collect_files(&[s(&file)], &[] as &[&str]);
        assert_eq!(entries[0].mode, 0o750);
        assert_eq!(entries[0].mtime, fs::metadata(&file).unwrap().mtime());
    }

    #[test]
    fn test_exclusions() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("cache")).unwrap();
        fs::write(root.join("cache/blob"), "x").unwrap();
        fs::create_dir_all(root.join("keep")).unwrap();
        // A file named like a dir-only pattern is kept
        fs::write(root.join("keep/cache"), "file").unwrap();
        fs::write(root.join("keep/debug.log"), "log").unwrap();
        fs::write(root.join("keep/init.lua"), "lua").unwrap();
        fs::write(root.join("keep/secret.key"), "key").unwrap();

        let full_path_pattern = format!("{}/keep/*.key", root.display());
        let entries = collect_files(
            &[s(root)],
            &["cache/", "*.log", "", full_path_pattern.as_str()],
        );

        assert_eq!(
            paths(&entries),
            vec![s(&root.join("keep/cache")), s(&root.join("keep/init.lua"))]
        );
    }

    #[test]
    fn test_star_does_not_cross_separators() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("a")).unwrap();
        let file = tmp.path().join("a/file");
        fs::write(&file, "x").unwrap();

        let shallow = format!("{}/*", tmp.path().display());
        assert_eq!(collect_files(&[s(&file)], &[shallow.as_str()]).len(), 1);

        let deep = format!("{}/*/file", tmp.path().display());
        assert!(collect_files(&[s(&file)], &[deep.as_str()]).is_empty());
    }

    #[test]
    fn test_symlinks_are_recorded_not_followed() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("real")).unwrap();
        fs::write(root.join("real/inner"), "x").unwrap();
        fs::create_dir_all(root.join("dots")).unwrap();
        symlink(root.join("real"), root.join("dots/dirlink")).unwrap();
        symlink("/etc/hostname", root.join("dots/hostlink")).unwrap();
        symlink("missing-target", root.join("dots/dangling")).unwrap();

        let entries = collect_files(&[s(&root.join("dots"))], &[] as &[&str]);

        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(FileEntry::is_symlink));
        let real = s(&root.join("real"));
        let targets: Vec<_> = entries.iter().filter_map(|e| e.link_target()).collect();
        assert_eq!(targets, vec!["missing-target", real.as_str(), "/etc/hostname"]);
    }

    #[test]
    fn test_symlink_root_is_recorded() {
        let tmp = TempDir::new().unwrap();
        let link = tmp.path().join("vimrc");
        symlink("/etc/hostname", &link).unwrap();

        let entries = collect_files(&[s(&link)], &[] as &[&str]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].link_target(), Some("/etc/hostname"));
    }

    #[test]
    fn test_directory_reached_through_parent_symlink_is_traversed() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("real/nvim")).unwrap();
        fs::write(tmp.path().join("real/nvim/init.lua"), "x").unwrap();
        symlink(tmp.path().join("real"), tmp.path().join("config")).unwrap();

        let root = tmp.path().join("config/nvim");
        let entries = collect_files(&[s(&root)], &[] as &[&str]);
        assert_eq!(paths(&entries), vec![s(&root.join("init.lua"))]);
    }

    #[test]
    fn test_symlink_loop_above_root_is_skipped() {
        let tmp = TempDir::new().unwrap();
        symlink(tmp.path().join("b"), tmp.path().join("a")).unwrap();
        symlink(tmp.path().join("a"), tmp.path().join("b")).unwrap();
        fs::write(tmp.path().join("ok"), "fine").unwrap();

        let mut collector = Collector::new(&[] as &[&str]);
        collector.add_root(&s(&tmp.path().join("a/file")));
        collector.add_root(&s(&tmp.path().join("ok")));

        assert_eq!(collector.skipped(), 1);
        assert_eq!(paths(collector.entries()), vec![s(&tmp.path().join("ok"))]);
    }

    #[test]
    fn test_link_hops_counts_chain() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("target")).unwrap();
        symlink(tmp.path().join("target"), tmp.path().join("l1")).unwrap();
        symlink("l1", tmp.path().join("l2")).unwrap();

        assert_eq!(link_hops(&tmp.path().join("target")), Some(0));
        assert_eq!(link_hops(&tmp.path().join("l2")), Some(2));
    }

    #[test]
    fn test_missing_root_does_not_stop_collection() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("present"), "x").unwrap();

        let mut collector = Collector::new(&[] as &[&str]);
        collector.add_root(&s(&tmp.path().join("absent")));
        collector.add_root("   ");
        collector.add_root(&s(&tmp.path().join("present")));

        assert_eq!(collector.skipped(), 1);
        assert_eq!(collector.entries().len(), 1);
    }

    #[test]
    fn test_sockets_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let sock = tmp.path().join("agent.sock");
        let _listener = std::os::unix::net::UnixListener::bind(&sock).unwrap();
        fs::write(tmp.path().join("config"), "x").unwrap();

        let mut collector = Collector::new(&[] as &[&str]);
        collector.add_root(&s(tmp.path()));
        assert_eq!(paths(collector.entries()), vec![s(&tmp.path().join("config"))]);
        assert_eq!(collector.skipped(), 1);
    }

    #[test]
    fn test_unreadable_file_is_skipped() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("locked");
        fs::write(&file, "x").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o000)).unwrap();
        if File::open(&file).is_ok() {
            // Running with CAP_DAC_OVERRIDE; nothing to observe
            return;
        }

        assert!(collect_files(&[s(&file)], &[] as &[&str]).is_empty());
    }

    #[test]
    fn test_overlapping_roots_collect_once() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("cfg/nvim")).unwrap();
        fs::write(tmp.path().join("cfg/nvim/init.lua"), "x").unwrap();

        let file = s(&tmp.path().join("cfg/nvim/init.lua"));
        let entries = collect_files(
            &[file.clone(), file.clone(), s(&tmp.path().join("cfg"))],
            &[] as &[&str],
        );
        assert_eq!(paths(&entries), vec![file]);
    }
}
