//! Unified diff between two directory trees, using the `similar` crate.
//!
//! Paths are visited in lexicographic order so the output is deterministic.
//! The diff text is capped at a byte budget; once the budget is hit the
//! current chunk is cut to fit, a truncation marker is appended and no
//! further paths are processed.

use std::path::{Component, Path};

use serde::Serialize;
use similar::{Algorithm, TextDiff};

use super::walk::collect_files;
use crate::error::{BridgeError, BridgeResult};

pub const TRUNCATION_MARKER: &str = "\n... diff truncated ...\n";

/// Per-category change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffSummary {
    pub added: u64,
    pub modified: u64,
    pub deleted: u64,
    pub binary: u64,
}

impl DiffSummary {
    pub const fn is_empty(&self) -> bool {
        self.added == 0 && self.modified == 0 && self.deleted == 0 && self.binary == 0
    }
}

/// Output of [`diff_trees`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeDiff {
    pub diff: String,
    pub summary: DiffSummary,
    pub truncated: bool,
}

/// Generate a unified diff between old and new content.
///
/// Patience keeps source structure readable.
pub fn unified_diff(old: &str, new: &str, from: &str, to: &str) -> String {
    TextDiff::configure()
        .algorithm(Algorithm::Patience)
        .diff_lines(old, new)
        .unified_diff()
        .header(from, to)
        .to_string()
}

/// Accumulates diff chunks up to a byte budget.
struct DiffBuffer {
    text: String,
    max_bytes: usize,
    truncated: bool,
}

impl DiffBuffer {
    const fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            max_bytes,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &str) {
        if self.truncated || chunk.is_empty() {
            return;
        }
        let remaining = self.max_bytes.saturating_sub(self.text.len());
        if chunk.len() <= remaining {
            self.text.push_str(chunk);
            return;
        }
        let mut cut = remaining;
        while !chunk.is_char_boundary(cut) {
            cut -= 1;
        }
        self.text.push_str(&chunk[..cut]);
        self.truncated = true;
    }

    fn finish(mut self) -> (String, bool) {
        if self.truncated {
            self.text.push_str(TRUNCATION_MARKER);
        }
        (self.text, self.truncated)
    }
}

/// Entry contents, `None` when absent. Symlinks contribute their target path.
fn read_entry(path: &Path) -> BridgeResult<Option<Vec<u8>>> {
    let meta = match std::fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(BridgeError::io(path, e)),
    };
    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(path).map_err(|e| BridgeError::io(path, e))?;
        return Ok(Some(target.to_string_lossy().into_owned().into_bytes()));
    }
    std::fs::read(path)
        .map(Some)
        .map_err(|e| BridgeError::io(path, e))
}

/// `/`-separated display form of a relative path.
fn display_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Diff the filtered trees at `original` and `changed`.
pub fn diff_trees(original: &Path, changed: &Path, max_bytes: usize) -> BridgeResult<TreeDiff> {
    let mut paths = collect_files(original)?;
    paths.extend(collect_files(changed)?);

    let mut summary = DiffSummary::default();
    let mut buffer = DiffBuffer::new(max_bytes);

    for relative in &paths {
        if buffer.truncated {
            break;
        }
        let name = display_path(relative);
        let before = read_entry(&original.join(relative))?;
        let after = read_entry(&changed.join(relative))?;

        match (before, after) {
            (None, Some(after)) => {
                summary.added += 1;
                if let Ok(text) = std::str::from_utf8(&after) {
                    buffer.push(&unified_diff("", text, "/dev/null", &format!("b/{name}")));
                } else {
                    summary.binary += 1;
                    buffer.push(&format!("Binary files /dev/null and b/{name} differ\n"));
                }
            }
            (Some(before), None) => {
                summary.deleted += 1;
                if let Ok(text) = std::str::from_utf8(&before) {
                    buffer.push(&unified_diff(text, "", &format!("a/{name}"), "/dev/null"));
                } else {
                    summary.binary += 1;
                    buffer.push(&format!("Binary files a/{name} and /dev/null differ\n"));
                }
            }
            (Some(before), Some(after)) if before != after => {
                match (std::str::from_utf8(&before), std::str::from_utf8(&after)) {
                    (Ok(old), Ok(new)) => {
                        summary.modified += 1;
                        buffer.push(&unified_diff(
                            old,
                            new,
                            &format!("a/{name}"),
                            &format!("b/{name}"),
                        ));
                    }
                    _ => {
                        summary.binary += 1;
                        buffer.push(&format!("Binary files a/{name} and b/{name} differ\n"));
                    }
                }
            }
            _ => {}
        }
    }

    let (diff, truncated) = buffer.finish();
    Ok(TreeDiff {
        diff,
        summary,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    fn pair() -> (tempfile::TempDir, tempfile::TempDir) {
        (
            tempfile::tempdir().expect("a"),
            tempfile::tempdir().expect("b"),
        )
    }

    #[test]
    fn test_no_diff() {
        let result = unified_diff("hello\n", "hello\n", "a/x", "b/x");
        assert!(result.is_empty());
    }

    #[test]
    fn test_simple_diff() {
        let result = unified_diff("line1\nline2\nline3\n", "line1\nmodified\nline3\n", "a/t", "b/t");
        assert!(result.contains("-line2"));
        assert!(result.contains("+modified"));
    }

    #[test]
    fn test_identical_trees_empty() {
        let (a, b) = pair();
        for root in [a.path(), b.path()] {
            write(root, "src/lib.rs", b"fn main() {}\n");
            write(root, "data.bin", &[0, 159, 146, 150]);
        }
        let diff = diff_trees(a.path(), b.path(), 10_000).expect("diff");
        assert_eq!(diff.diff, "");
        assert_eq!(diff.summary, DiffSummary::default());
        assert!(!diff.truncated);
    }

    #[test]
    fn test_added_modified_deleted() {
        let (a, b) = pair();
        write(a.path(), "keep.txt", b"same\n");
        write(b.path(), "keep.txt", b"same\n");
        write(a.path(), "edit.txt", b"old\n");
        write(b.path(), "edit.txt", b"new\n");
        write(a.path(), "gone.txt", b"bye\n");
        write(b.path(), "out.txt", b"hi");

        let diff = diff_trees(a.path(), b.path(), 10_000).expect("diff");
        assert_eq!(
            diff.summary,
            DiffSummary {
                added: 1,
                modified: 1,
                deleted: 1,
                binary: 0
            }
        );
        assert!(diff.diff.contains("--- a/edit.txt\n+++ b/edit.txt"));
        assert!(diff.diff.contains("+++ b/out.txt"));
        assert!(diff.diff.contains("+hi"));
        assert!(diff.diff.contains("--- a/gone.txt\n+++ /dev/null"));
        // Lexicographic order: edit, gone, out.
        let edit = diff.diff.find("edit.txt").expect("edit");
        let gone = diff.diff.find("gone.txt").expect("gone");
        let out = diff.diff.find("out.txt").expect("out");
        assert!(edit < gone && gone < out);
    }

    #[test]
    fn test_binary_change_counted_as_binary_only() {
        let (a, b) = pair();
        write(a.path(), "img.png", &[0xff, 0xfe, 0x00]);
        write(b.path(), "img.png", &[0xff, 0xfe, 0x01]);
        write(b.path(), "new.bin", &[0xc3, 0x28]);

        let diff = diff_trees(a.path(), b.path(), 10_000).expect("diff");
        assert_eq!(diff.summary.modified, 0);
        assert_eq!(diff.summary.binary, 2);
        assert_eq!(diff.summary.added, 1);
        assert!(diff.diff.contains("Binary files a/img.png and b/img.png differ"));
        assert!(diff.diff.contains("Binary files /dev/null and b/new.bin differ"));
    }

    #[test]
    fn test_truncates_to_budget_and_stops() {
        let (a, b) = pair();
        write(b.path(), "a.txt", "line\n".repeat(100).as_bytes());
        write(b.path(), "b.txt", b"later\n");

        let diff = diff_trees(a.path(), b.path(), 64).expect("diff");
        assert!(diff.truncated);
        assert_eq!(diff.diff.len(), 64 + TRUNCATION_MARKER.len());
        assert!(diff.diff.ends_with(TRUNCATION_MARKER));
        assert!(!diff.diff.contains("b.txt"));
        assert_eq!(diff.summary.added, 1);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut buffer = DiffBuffer::new(5);
        buffer.push("ééé");
        let (text, truncated) = buffer.finish();
        assert!(truncated);
        assert!(text.starts_with("éé"));
    }
}
