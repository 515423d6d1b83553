//! Recursive enumeration of source directories.
//!
//! Walks are sorted by file name so repeated runs over the same tree visit
//! files in the same order. Symlinks are followed, but only files that
//! resolve inside the source root are reported. Link cycles are logged and
//! skipped.
//!
//! A root that does not exist (or is not a directory) yields nothing.
//! Unreadable entries below the root are logged and skipped.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

// ---------------------------------------------------------------------------
// SizeCeiling
// ---------------------------------------------------------------------------

/// Largest file size, in bytes, that may enter the corpus.
///
/// The comparison is inclusive: a file exactly at the ceiling is admitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SizeCeiling(u64);

impl SizeCeiling {
    #[must_use]
    pub const fn from_bytes(bytes: u64) -> Self {
        Self(bytes)
    }

    /// Ceiling expressed in KiB, as taken on the command line.
    #[must_use]
    pub const fn from_kb(kb: u64) -> Self {
        Self(kb.saturating_mul(1024))
    }

    #[must_use]
    pub const fn bytes(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn admits(self, size: u64) -> bool {
        size <= self.0
    }
}

// ---------------------------------------------------------------------------
// SourceFile
// ---------------------------------------------------------------------------

/// A regular file found under a source root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFile {
    pub path: PathBuf,
    pub size: u64,
}

/// Every regular file under `root`, with its size.
#[must_use]
pub fn walk_files(root: &Path) -> Vec<SourceFile> {
    if !root.is_dir() {
        return Vec::new();
    }
    let base = match root.canonicalize() {
        Ok(base) => base,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "cannot resolve source root");
            return Vec::new();
        }
    };

    WalkDir::new(root)
        .follow_links(true)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(root = %root.display(), error = %e, "skipping unreadable entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| inside(&base, entry.path()))
        .filter_map(|entry| match entry.metadata() {
            Ok(meta) => Some(SourceFile {
                size: meta.len(),
                path: entry.into_path(),
            }),
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "skipping file without metadata");
                None
            }
        })
        .collect()
}

/// Whether `path` resolves to somewhere under `base`.
fn inside(base: &Path, path: &Path) -> bool {
    match path.canonicalize() {
        Ok(real) if real.starts_with(base) => true,
        Ok(real) => {
            debug!(path = %path.display(), target = %real.display(), "skipping link that leaves the source");
            false
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "skipping unresolvable file");
            false
        }
    }
}

/// Files under `root` whose size the ceiling admits. Oversized files are
/// dropped here and never hashed.
#[must_use]
pub fn eligible_files(root: &Path, ceiling: SizeCeiling) -> Vec<SourceFile> {
    walk_files(root)
        .into_iter()
        .filter(|file| ceiling.admits(file.size))
        .collect()
}

/// Number of regular files under `root` (0 if it does not exist).
#[must_use]
pub fn count_files(root: &Path) -> usize {
    walk_files(root).len()
}

/// Number of regular files under `root` that the ceiling admits.
#[must_use]
pub fn count_eligible(root: &Path, ceiling: SizeCeiling) -> usize {
    eligible_files(root, ceiling).len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, len: usize) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![b'x'; len]).unwrap();
    }

    #[test]
    fn ceiling_is_inclusive() {
        let ceiling = SizeCeiling::from_bytes(10);
        assert!(ceiling.admits(0));
        assert!(ceiling.admits(10));
        assert!(!ceiling.admits(11));
    }

    #[test]
    fn ceiling_from_kb_uses_1024() {
        assert_eq!(SizeCeiling::from_kb(1024).bytes(), 1024 * 1024);
        assert_eq!(SizeCeiling::from_kb(u64::MAX).bytes(), u64::MAX);
    }

    #[test]
    fn walks_nested_directories_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "b.txt", 1);
        write(dir.path(), "a/inner/c.txt", 2);
        write(dir.path(), "a/z.txt", 3);

        let files = walk_files(dir.path());
        let rel: Vec<_> = files
            .iter()
            .map(|f| f.path.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("a/inner/c.txt"),
                PathBuf::from("a/z.txt"),
                PathBuf::from("b.txt"),
            ]
        );
        assert_eq!(files[0].size, 2);
    }

    #[test]
    fn missing_root_is_empty() {
        assert!(walk_files(Path::new("/nonexistent/source/dir")).is_empty());
        assert_eq!(count_files(Path::new("/nonexistent/source/dir")), 0);
    }

    #[test]
    fn oversized_files_are_excluded() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "empty.bin", 0);
        write(dir.path(), "exact.bin", 100);
        write(dir.path(), "over.bin", 101);

        let ceiling = SizeCeiling::from_bytes(100);
        let names: Vec<_> = eligible_files(dir.path(), ceiling)
            .into_iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["empty.bin", "exact.bin"]);
        assert_eq!(count_files(dir.path()), 3);
        assert_eq!(count_eligible(dir.path(), ceiling), 2);
    }

    #[cfg(unix)]
    #[test]
    fn links_are_followed_only_inside_the_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("src");
        write(&root, "real/a.bin", 4);
        write(tmp.path(), "outside/secret.bin", 8);
        std::os::unix::fs::symlink(root.join("real/a.bin"), root.join("alias.bin")).unwrap();
        std::os::unix::fs::symlink(root.join("real"), root.join("linked_dir")).unwrap();
        std::os::unix::fs::symlink(tmp.path().join("outside"), root.join("escape")).unwrap();
        std::os::unix::fs::symlink(&root, root.join("real/loop")).unwrap();

        let rel: Vec<_> = walk_files(&root)
            .iter()
            .map(|f| f.path.strip_prefix(&root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("alias.bin"),
                PathBuf::from("linked_dir/a.bin"),
                PathBuf::from("real/a.bin"),
            ]
        );
    }
}
