//! Filtered tree walking shared by the sandbox copy and the tree diff.
//!
//! Symlinks are never followed; they are reported as leaf entries.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use globset::{Glob, GlobSet, GlobSetBuilder};
use walkdir::{DirEntry, WalkDir};

use crate::error::{BridgeError, BridgeResult};

/// Directories never copied or diffed: VCS metadata, dependency caches,
/// build output.
pub const IGNORE_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    ".venv",
    ".tox",
    "__pycache__",
    ".mypy_cache",
    ".pytest_cache",
    ".ruff_cache",
    "node_modules",
    "dist",
    "build",
    "target",
];

/// File-name patterns never copied or diffed.
pub const IGNORE_FILE_PATTERNS: &[&str] = &[".DS_Store", "Thumbs.db", "*.pyc", "*.pyo"];

static IGNORE_FILES: LazyLock<GlobSet> = LazyLock::new(|| {
    let mut builder = GlobSetBuilder::new();
    for pattern in IGNORE_FILE_PATTERNS {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    builder.build().unwrap_or_else(|_| GlobSet::empty())
});

fn is_ignored(entry: &DirEntry) -> bool {
    if entry.depth() == 0 {
        return false;
    }
    let Some(name) = entry.file_name().to_str() else {
        return false;
    };
    if entry.file_type().is_dir() {
        IGNORE_DIRS.contains(&name)
    } else {
        IGNORE_FILES.is_match(name)
    }
}

/// Walk `root` in file-name order, skipping ignored entries and not
/// descending into them.
pub fn filtered_walk(root: &Path) -> impl Iterator<Item = walkdir::Result<DirEntry>> {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_ignored(entry))
}

pub(crate) fn walk_error(root: &Path, err: &walkdir::Error) -> BridgeError {
    BridgeError::Sandbox(format!("failed to walk {}: {err}", root.display()))
}

/// Relative paths of every non-directory entry under `root`.
pub fn collect_files(root: &Path) -> BridgeResult<BTreeSet<PathBuf>> {
    let mut files = BTreeSet::new();
    for entry in filtered_walk(root) {
        let entry = entry.map_err(|e| walk_error(root, &e))?;
        if entry.file_type().is_dir() {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            files.insert(relative.to_path_buf());
        }
    }
    Ok(files)
}

/// Total byte size of the copyable entries under `root`.
///
/// Stops early once the running total exceeds `max_bytes`; the returned value
/// is then only guaranteed to be larger than the limit.
pub fn estimate_copy_size(root: &Path, max_bytes: u64) -> BridgeResult<u64> {
    let mut total: u64 = 0;
    for entry in filtered_walk(root) {
        let entry = entry.map_err(|e| walk_error(root, &e))?;
        if entry.file_type().is_dir() {
            continue;
        }
        let meta = entry
            .metadata()
            .map_err(|e| walk_error(root, &e))?;
        total = total.saturating_add(meta.len());
        if total > max_bytes {
            break;
        }
    }
    Ok(total)
}

/// Copy the filtered tree at `src` into `dst`, recreating symlinks as symlinks.
pub fn copy_tree(src: &Path, dst: &Path) -> BridgeResult<()> {
    for entry in filtered_walk(src) {
        let entry = entry.map_err(|e| walk_error(src, &e))?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dst.join(relative);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            std::fs::create_dir_all(&target).map_err(|e| BridgeError::io(&target, e))?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target).map_err(|e| BridgeError::io(entry.path(), e))?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, target: &Path) -> BridgeResult<()> {
    let points_to = std::fs::read_link(link).map_err(|e| BridgeError::io(link, e))?;
    std::os::unix::fs::symlink(&points_to, target).map_err(|e| BridgeError::io(target, e))
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, target: &Path) -> BridgeResult<()> {
    // Windows symlinks need privileges; fall back to copying the target's contents.
    std::fs::copy(link, target)
        .map(|_| ())
        .map_err(|e| BridgeError::io(link, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(root: &Path, rel: &str, content: &str) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("mkdir");
        }
        std::fs::write(path, content).expect("write");
    }

    #[test]
    fn test_collect_skips_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "src/main.py", "print()");
        touch(dir.path(), "src/main.pyc", "bytecode");
        touch(dir.path(), ".git/HEAD", "ref");
        touch(dir.path(), "node_modules/pkg/index.js", "x");
        touch(dir.path(), ".DS_Store", "meta");
        touch(dir.path(), "README.md", "# hi");

        let files: Vec<PathBuf> = collect_files(dir.path()).expect("collect").into_iter().collect();
        assert_eq!(
            files,
            vec![PathBuf::from("README.md"), Path::new("src").join("main.py")]
        );
    }

    #[test]
    fn test_ignored_name_at_root_is_still_walked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("build");
        touch(&root, "a.txt", "a");
        assert_eq!(collect_files(&root).expect("collect").len(), 1);
    }

    #[test]
    fn test_estimate_counts_only_copyable_bytes() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "a.txt", &"a".repeat(100));
        touch(dir.path(), "dist/bundle.js", &"b".repeat(10_000));
        assert_eq!(estimate_copy_size(dir.path(), u64::MAX).expect("size"), 100);
    }

    #[test]
    fn test_estimate_stops_past_limit() {
        let dir = tempfile::tempdir().expect("tempdir");
        touch(dir.path(), "a.txt", &"a".repeat(600));
        touch(dir.path(), "b.txt", &"b".repeat(600));
        touch(dir.path(), "c.txt", &"c".repeat(600));
        let size = estimate_copy_size(dir.path(), 1000).expect("size");
        assert_eq!(size, 1200);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_preserves_symlinks() {
        let src = tempfile::tempdir().expect("src");
        let dst = tempfile::tempdir().expect("dst");
        touch(src.path(), "real.txt", "data");
        std::os::unix::fs::symlink("real.txt", src.path().join("link.txt")).expect("symlink");
        touch(src.path(), "__pycache__/x.pyc", "junk");

        copy_tree(src.path(), dst.path()).expect("copy");

        let link = dst.path().join("link.txt");
        let meta = std::fs::symlink_metadata(&link).expect("meta");
        assert!(meta.file_type().is_symlink());
        assert_eq!(std::fs::read_link(&link).expect("readlink"), Path::new("real.txt"));
        assert!(!dst.path().join("__pycache__").exists());
    }
}
