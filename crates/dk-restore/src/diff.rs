//! Line-based unified diff between a file on disk (current) and its backup copy
//!
//! Lines are compared as raw bytes with their terminators, so a missing
//! final newline is a real difference and is rendered with the usual
//! `\ No newline at end of file` marker. Only a NUL in the first 512 bytes
//! makes content binary; lines that are not UTF-8 are shown lossily.

use std::fmt::Write as _;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dk_core::{DkError, DkResult, EntryKind, FileEntry};

/// Unchanged lines shown around each change
pub const CONTEXT_LINES: usize = 3;

/// Bytes inspected for a NUL when deciding whether content is binary
const BINARY_SNIFF_LEN: usize = 512;

/// Above this many LCS table cells the changed region is emitted as a
/// full replacement instead.
const MAX_LCS_CELLS: usize = 16 * 1024 * 1024;

const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffResult {
    pub has_difference: bool,
    /// Empty when there is no difference
    pub diff: String,
    pub current_path: PathBuf,
}

/// True when the first 512 bytes contain a NUL.
pub fn is_binary(content: &[u8]) -> bool {
    content[..content.len().min(BINARY_SNIFF_LEN)].contains(&0)
}

/// Content as text lines, or `None` when it is binary.
fn text(content: &[u8]) -> Option<&[u8]> {
    (!is_binary(content)).then_some(content)
}

fn lines(content: &[u8]) -> Vec<&[u8]> {
    content.split_inclusive(|&b| b == b'\n').collect()
}

/// Diff `backup` against whatever is at `current_path` now.
///
/// A missing file yields a new-file diff against `/dev/null`. Any other
/// read failure is returned.
pub fn generate_diff(backup: &[u8], current_path: &Path) -> DkResult<DiffResult> {
    let label = current_path.display().to_string();
    let diff = match fs::read(current_path) {
        Ok(current) => {
            if current == backup {
                String::new()
            } else {
                match (text(&current), text(backup)) {
                    (Some(current), Some(backup)) => unified_diff_bytes(current, backup, &label),
                    _ => format!("Binary files {label} (current) and {label} (backup) differ\n"),
                }
            }
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            match text(backup) {
                Some(backup) => new_file_diff_bytes(backup, &label),
                None => format!("Binary files /dev/null and {label} (backup) differ\n"),
            }
        }
        Err(e) => {
            return Err(DkError::io(
                format!("reading current file: {}", current_path.display()),
                e,
            ))
        }
    };

    Ok(DiffResult {
        has_difference: !diff.is_empty(),
        diff,
        current_path: current_path.to_path_buf(),
    })
}

/// Diff one archive entry against `target`.
///
/// Symlinks compare link targets and render as `symlink -> <target>`.
pub fn diff_entry(entry: &FileEntry, target: &Path) -> DkResult<DiffResult> {
    match &entry.kind {
        EntryKind::Symlink { link_target } => {
            let unchanged = fs::read_link(target)
                .map(|current| current == Path::new(link_target))
                .unwrap_or(false);
            Ok(DiffResult {
                has_difference: !unchanged,
                diff: if unchanged {
                    String::new()
                } else {
                    format!("symlink -> {link_target}")
                },
                current_path: target.to_path_buf(),
            })
        }
        EntryKind::Regular { content, .. } => {
            let content = content.as_deref().ok_or_else(|| {
                DkError::Archive(format!("{}: entry content was not loaded", entry.path))
            })?;
            generate_diff(content, target)
        }
    }
}

/// Unified diff of `current` → `backup`, both labelled `label`.
///
/// Returns the empty string for identical inputs.
pub fn unified_diff(current: &str, backup: &str, label: &str) -> String {
    unified_diff_bytes(current.as_bytes(), backup.as_bytes(), label)
}

fn unified_diff_bytes(current: &[u8], backup: &[u8], label: &str) -> String {
    if current == backup {
        return String::new();
    }
    let a = lines(current);
    let b = lines(backup);

    let mut out = format!("--- {label}\t(current)\n+++ {label}\t(backup)\n");
    let ops = edit_script(&a, &b);
    for hunk in hunks(&ops, CONTEXT_LINES) {
        render_hunk(&mut out, &ops, hunk, &a, &b);
    }
    out
}

/// Diff for a file that does not exist yet: every backup line is an addition.
pub fn new_file_diff(backup: &str, label: &str) -> String {
    new_file_diff_bytes(backup.as_bytes(), label)
}

fn new_file_diff_bytes(backup: &[u8], label: &str) -> String {
    let added = lines(backup);
    let mut out = format!("--- /dev/null\n+++ {label}\t(backup)\n");
    if !added.is_empty() {
        let _ = writeln!(out, "@@ -0,0 +1,{} @@", added.len());
        for line in added {
            push_line(&mut out, '+', line);
        }
    }
    out
}

/// Count added and removed lines in a unified diff.
///
/// Only lines inside hunks are counted, as delimited by the `@@` headers,
/// so `---`/`+++` file headers never inflate the totals.
pub fn diff_stats(diff: &str) -> (usize, usize) {
    let (mut added, mut removed) = (0, 0);
    let (mut old_left, mut new_left) = (0usize, 0usize);

    for line in diff.split('\n') {
        if old_left == 0 && new_left == 0 {
            if let Some((old, new)) = parse_hunk_header(line) {
                old_left = old;
                new_left = new;
            }
            continue;
        }
        match line.as_bytes().first() {
            Some(b'+') => {
                added += 1;
                new_left = new_left.saturating_sub(1);
            }
            Some(b'-') => {
                removed += 1;
                old_left = old_left.saturating_sub(1);
            }
            Some(b' ') => {
                old_left = old_left.saturating_sub(1);
                new_left = new_left.saturating_sub(1);
            }
            Some(b'\\') => {}
            _ => {
                old_left = 0;
                new_left = 0;
            }
        }
    }
    (added, removed)
}

/// `(old_count, new_count)` of a `@@ -a,b +c,d @@` line.
fn parse_hunk_header(line: &str) -> Option<(usize, usize)> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, _) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    let count = |range: &str| match range.split_once(',') {
        Some((_, n)) => n.parse().ok(),
        None => Some(1),
    };
    Some((count(old)?, count(new)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Equal { a: usize, b: usize },
    Delete { a: usize },
    Insert { b: usize },
}

/// Full edit script turning `a` into `b`.
///
/// Common prefix and suffix are matched directly; the remaining middle
/// goes through an LCS table.
fn edit_script<T: PartialEq>(a: &[T], b: &[T]) -> Vec<Op> {
    let prefix = a.iter().zip(b).take_while(|(x, y)| x == y).count();
    let suffix = a[prefix..]
        .iter()
        .rev()
        .zip(b[prefix..].iter().rev())
        .take_while(|(x, y)| x == y)
        .count();

    let mut ops: Vec<Op> = (0..prefix).map(|i| Op::Equal { a: i, b: i }).collect();

    let a_mid = &a[prefix..a.len() - suffix];
    let b_mid = &b[prefix..b.len() - suffix];
    let (n, m) = (a_mid.len(), b_mid.len());

    if (n + 1).saturating_mul(m + 1) > MAX_LCS_CELLS {
        ops.extend((0..n).map(|i| Op::Delete { a: prefix + i }));
        ops.extend((0..m).map(|j| Op::Insert { b: prefix + j }));
    } else {
        // lcs[i * (m + 1) + j] = LCS length of a_mid[i..] and b_mid[j..]
        let width = m + 1;
        let mut lcs = vec![0u32; (n + 1) * width];
        for i in (0..n).rev() {
            for j in (0..m).rev() {
                lcs[i * width + j] = if a_mid[i] == b_mid[j] {
                    lcs[(i + 1) * width + j + 1] + 1
                } else {
                    lcs[(i + 1) * width + j].max(lcs[i * width + j + 1])
                };
            }
        }

        let (mut i, mut j) = (0, 0);
        while i < n || j < m {
            if i < n && j < m && a_mid[i] == b_mid[j] {
                ops.push(Op::Equal {
                    a: prefix + i,
                    b: prefix + j,
                });
                i += 1;
                j += 1;
            } else if i < n && (j == m || lcs[(i + 1) * width + j] >= lcs[i * width + j + 1]) {
                ops.push(Op::Delete { a: prefix + i });
                i += 1;
            } else {
                ops.push(Op::Insert { b: prefix + j });
                j += 1;
            }
        }
    }

    let a_tail = a.len() - suffix;
    let b_tail = b.len() - suffix;
    ops.extend((0..suffix).map(|k| Op::Equal {
        a: a_tail + k,
        b: b_tail + k,
    }));
    ops
}

/// Op index ranges of each hunk, context included. Changes separated by at
/// most `2 * context` equal lines share a hunk.
fn hunks(ops: &[Op], context: usize) -> Vec<std::ops::Range<usize>> {
    let changes: Vec<usize> = ops
        .iter()
        .enumerate()
        .filter(|(_, op)| !matches!(op, Op::Equal { .. }))
        .map(|(k, _)| k)
        .collect();

    let mut out: Vec<std::ops::Range<usize>> = Vec::new();
    let mut iter = changes.into_iter();
    let Some(first) = iter.next() else {
        return out;
    };
    let (mut start, mut last) = (first, first);
    for k in iter {
        if k - last - 1 > 2 * context {
            out.push(start.saturating_sub(context)..(last + 1 + context).min(ops.len()));
            start = k;
        }
        last = k;
    }
    out.push(start.saturating_sub(context)..(last + 1 + context).min(ops.len()));
    out
}

fn render_hunk(
    out: &mut String,
    ops: &[Op],
    range: std::ops::Range<usize>,
    a: &[&[u8]],
    b: &[&[u8]],
) {
    let (a_before, b_before) = line_counts(&ops[..range.start]);
    let body = &ops[range];
    let (a_count, b_count) = line_counts(body);

    // A side with no lines in the hunk names the line it follows
    let a_start = if a_count == 0 { a_before } else { a_before + 1 };
    let b_start = if b_count == 0 { b_before } else { b_before + 1 };
    let _ = writeln!(out, "@@ -{a_start},{a_count} +{b_start},{b_count} @@");

    for op in body {
        match *op {
            Op::Equal { a: i, .. } => push_line(out, ' ', a[i]),
            Op::Delete { a: i } => push_line(out, '-', a[i]),
            Op::Insert { b: j } => push_line(out, '+', b[j]),
        }
    }
}

/// Lines of `a` and `b` covered by `ops`.
fn line_counts(ops: &[Op]) -> (usize, usize) {
    ops.iter().fold((0, 0), |(a, b), op| match op {
        Op::Equal { .. } => (a + 1, b + 1),
        Op::Delete { .. } => (a + 1, b),
        Op::Insert { .. } => (a, b + 1),
    })
}

fn push_line(out: &mut String, prefix: char, line: &[u8]) {
    out.push(prefix);
    match line.split_last() {
        Some((b'\n', body)) => {
            out.push_str(&String::from_utf8_lossy(body));
            out.push('\n');
        }
        _ => {
            out.push_str(&String::from_utf8_lossy(line));
            out.push('\n');
            out.push_str(NO_NEWLINE_MARKER);
        }
    }
}


#[cfg(test)]
mod proptest_suite {
    use super::*;
    use proptest::prelude::*;

    /// Apply a unified diff produced by `unified_diff` to `original`.
    fn apply_unified(original: &str, diff: &str) -> String {
        let old: Vec<&str> = original.split_inclusive('\n').collect();
        let mut out = String::new();
        let mut cursor = 0;
        let mut in_hunks = false;
        let mut last_added = false;

        for line in diff.split('\n') {
            if let Some(rest) = line.strip_prefix("@@ -") {
                in_hunks = true;
                let (old_range, _) = rest.split_once(' ').unwrap();
                let (start, count) = old_range.split_once(',').unwrap();
                let (start, count): (usize, usize) = (start.parse().unwrap(), count.parse().unwrap());
                let begin = if count == 0 { start } else { start - 1 };
                for kept in &old[cursor..begin] {
                    out.push_str(kept);
                }
                cursor = begin;
                continue;
            }
            if !in_hunks || line.is_empty() {
                continue;
            }
            let (tag, body) = line.split_at(1);
            match tag {
                " " => {
                    out.push_str(old[cursor]);
                    cursor += 1;
                    last_added = false;
                }
                "-" => {
                    cursor += 1;
                    last_added = false;
                }
                "+" => {
                    out.push_str(body);
                    out.push('\n');
                    last_added = true;
                }
                "\\" => {
                    if last_added {
                        out.pop();
                    }
                }
                other => panic!("unexpected diff line tag {other:?}"),
            }
        }
        for kept in &old[cursor..] {
            out.push_str(kept);
        }
        out
    }

    fn text() -> impl Strategy<Value = String> {
        (prop::collection::vec("[abc]{0,3}", 0..40), any::<bool>()).prop_map(|(lines, trailing)| {
            let mut s = lines.join("\n");
            if trailing && !s.is_empty() {
                s.push('\n');
            }
            s
        })
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        #[test]
        fn applying_diff_yields_backup(current in text(), backup in text()) {
            let diff = unified_diff(&current, &backup, "f");
            prop_assert_eq!(apply_unified(&current, &diff), backup);
        }

        #[test]
        fn stats_match_line_counts(current in text(), backup in text()) {
            let diff = unified_diff(&current, &backup, "f");
            let (added, removed) = diff_stats(&diff);
            let plus = diff.lines().filter(|l| l.starts_with('+') && !l.starts_with("+++ f\t")).count();
            let minus = diff.lines().filter(|l| l.starts_with('-') && !l.starts_with("--- f\t")).count();
            prop_assert_eq!((added, removed), (plus, minus));
        }
    }
}
