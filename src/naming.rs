//! Collision-free placement of admitted files into the output corpus.
//!
//! Destination names are derived from the source file name:
//!
//! - a leading `.` gets [`HIDDEN_PREFIX`] in front of it, so nothing in the
//!   corpus is hidden (`.secret` becomes `untitled.secret`);
//! - the stem is cut to [`MAX_STEM_CHARS`] characters, the extension is kept;
//! - if the name is taken, `_1`, `_2`, ... is appended to the stem.
//!
//! Names are probed against the output directory at call time, because the
//! directory fills up as the merge runs.
//!
//! Content is first written to a hidden temporary file inside the output
//! directory and then renamed into place without clobbering. A destination
//! name therefore either holds the complete source content (with the source's
//! permissions and timestamps) or does not exist.

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use filetime::FileTime;

/// Longest stem (file name without extension) kept in a destination name.
pub const MAX_STEM_CHARS: usize = 100;

/// Word prepended to dot-files so they stay visible in the corpus.
pub const HIDDEN_PREFIX: &str = "untitled";

// ---------------------------------------------------------------------------
// PlaceError
// ---------------------------------------------------------------------------

/// Errors from copying a file into the output corpus.
#[derive(Debug)]
pub enum PlaceError {
    /// The source path has no final component to derive a name from.
    NoFileName { path: PathBuf },
    /// Reading the source or writing the destination failed.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for PlaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoFileName { path } => {
                write!(f, "cannot derive a file name from {}", path.display())
            }
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for PlaceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::NoFileName { .. } => None,
        }
    }
}

fn io_at(path: &Path) -> impl FnOnce(io::Error) -> PlaceError + '_ {
    move |source| PlaceError::Io {
        path: path.to_owned(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Naming
// ---------------------------------------------------------------------------

/// Split a source file name into the `(stem, extension)` used for the
/// destination. The extension includes its leading dot, or is empty.
#[must_use]
pub fn destination_parts(file_name: &OsStr) -> (String, String) {
    let raw = file_name.to_string_lossy();
    let name = if raw.starts_with('.') {
        format!("{HIDDEN_PREFIX}{raw}")
    } else {
        raw.into_owned()
    };

    let as_path = Path::new(&name);
    let stem: String = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().chars().take(MAX_STEM_CHARS).collect())
        .unwrap_or_default();
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    (stem, ext)
}

/// The `attempt`-th candidate name: attempt 0 is the bare name, later
/// attempts carry a numeric suffix.
fn candidate_name(stem: &str, ext: &str, attempt: u64) -> String {
    if attempt == 0 {
        format!("{stem}{ext}")
    } else {
        format!("{stem}_{attempt}{ext}")
    }
}

fn is_taken(path: &Path) -> bool {
    path.symlink_metadata().is_ok()
}

/// First destination path for `file_name` that does not exist in `dest_dir`
/// right now.
#[must_use]
pub fn free_destination(dest_dir: &Path, file_name: &OsStr) -> PathBuf {
    let (stem, ext) = destination_parts(file_name);
    let mut attempt = 0;
    loop {
        let candidate = dest_dir.join(candidate_name(&stem, &ext, attempt));
        if !is_taken(&candidate) {
            return candidate;
        }
        attempt += 1;
    }
}

// ---------------------------------------------------------------------------
// Placement
// ---------------------------------------------------------------------------

/// Copy `src` into `dest_dir` under a collision-free name.
///
/// Permissions and access/modification times are carried over. Returns the
/// path that was written.
///
/// # Errors
/// Returns [`PlaceError`] if `src` cannot be read or the destination cannot
/// be written. On error no file is left under a corpus name.
pub fn place_file(src: &Path, dest_dir: &Path) -> Result<PathBuf, PlaceError> {
    let file_name = src.file_name().ok_or_else(|| PlaceError::NoFileName {
        path: src.to_owned(),
    })?;
    let (stem, ext) = destination_parts(file_name);

    let meta = fs::metadata(src).map_err(io_at(src))?;
    let mut staged = tempfile::Builder::new()
        .prefix(".seedcorpus-")
        .suffix(".part")
        .tempfile_in(dest_dir)
        .map_err(io_at(dest_dir))?;

    let mut reader = File::open(src).map_err(io_at(src))?;
    io::copy(&mut reader, staged.as_file_mut()).map_err(io_at(src))?;

    fs::set_permissions(staged.path(), meta.permissions()).map_err(io_at(staged.path()))?;
    filetime::set_file_times(
        staged.path(),
        FileTime::from_last_access_time(&meta),
        FileTime::from_last_modification_time(&meta),
    )
    .map_err(io_at(staged.path()))?;

    let mut attempt = 0;
    loop {
        let candidate = dest_dir.join(candidate_name(&stem, &ext, attempt));
        if is_taken(&candidate) {
            attempt += 1;
            continue;
        }
        match staged.persist_noclobber(&candidate) {
            Ok(_) => return Ok(candidate),
            // Lost a race for this name; keep the staged file and move on.
            Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
                staged = e.file;
                attempt += 1;
            }
            Err(e) => {
                return Err(PlaceError::Io {
                    path: candidate,
                    source: e.error,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn parts_of_plain_name() {
        assert_eq!(
            destination_parts(OsStr::new("image.png")),
            ("image".to_owned(), ".png".to_owned())
        );
        assert_eq!(
            destination_parts(OsStr::new("archive.tar.gz")),
            ("archive.tar".to_owned(), ".gz".to_owned())
        );
        assert_eq!(
            destination_parts(OsStr::new("Makefile")),
            ("Makefile".to_owned(), String::new())
        );
    }

    #[test]
    fn hidden_names_are_prefixed() {
        let (stem, ext) = destination_parts(OsStr::new(".secret"));
        let name = format!("{stem}{ext}");
        assert_eq!(name, "untitled.secret");
        assert!(!name.starts_with('.'));
    }

    #[test]
    fn long_stems_are_truncated_but_keep_extension() {
        let long = format!("{}.jpg", "x".repeat(250));
        let (stem, ext) = destination_parts(OsStr::new(&long));
        assert_eq!(stem.chars().count(), MAX_STEM_CHARS);
        assert_eq!(ext, ".jpg");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        let long = format!("{}.txt", "é".repeat(150));
        let (stem, _) = destination_parts(OsStr::new(&long));
        assert_eq!(stem.chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn same_name_twice_gets_numeric_suffix() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let first = src.path().join("one");
        let second = src.path().join("two");
        fs::create_dir_all(&first).unwrap();
        fs::create_dir_all(&second).unwrap();
        fs::write(first.join("a.txt"), b"first").unwrap();
        fs::write(second.join("a.txt"), b"second").unwrap();
        fs::write(src.path().join("a.txt"), b"third").unwrap();

        let p1 = place_file(&first.join("a.txt"), out.path()).unwrap();
        let p2 = place_file(&second.join("a.txt"), out.path()).unwrap();
        let p3 = place_file(&src.path().join("a.txt"), out.path()).unwrap();

        assert_eq!(p1, out.path().join("a.txt"));
        assert_eq!(p2, out.path().join("a_1.txt"));
        assert_eq!(p3, out.path().join("a_2.txt"));
        assert_eq!(fs::read(&p1).unwrap(), b"first");
        assert_eq!(fs::read(&p2).unwrap(), b"second");
        assert_eq!(fs::read(&p3).unwrap(), b"third");
        assert_eq!(names_in(out.path()), vec!["a.txt", "a_1.txt", "a_2.txt"]);
    }

    #[test]
    fn free_destination_skips_existing_names() {
        let out = tempfile::tempdir().unwrap();
        fs::write(out.path().join("seed.bin"), b"x").unwrap();
        fs::write(out.path().join("seed_1.bin"), b"y").unwrap();

        assert_eq!(
            free_destination(out.path(), OsStr::new("seed.bin")),
            out.path().join("seed_2.bin")
        );
        assert_eq!(
            free_destination(out.path(), OsStr::new("other.bin")),
            out.path().join("other.bin")
        );
    }

    #[test]
    fn copy_preserves_modification_time() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let path = src.path().join("old.pdf");
        fs::write(&path, b"%PDF-1.4").unwrap();
        let stamp = FileTime::from_unix_time(1_000_000_000, 0);
        filetime::set_file_mtime(&path, stamp).unwrap();

        let placed = place_file(&path, out.path()).unwrap();
        let meta = fs::metadata(&placed).unwrap();
        assert_eq!(FileTime::from_last_modification_time(&meta), stamp);
    }

    #[test]
    fn hidden_source_lands_visible() {
        let src = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        fs::write(src.path().join(".secret"), b"shh").unwrap();

        let placed = place_file(&src.path().join(".secret"), out.path()).unwrap();
        let name = placed.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(name, "untitled.secret");
        assert_eq!(names_in(out.path()), vec!["untitled.secret"]);
    }

    #[test]
    fn failed_copy_leaves_nothing_behind() {
        let out = tempfile::tempdir().unwrap();
        let err = place_file(Path::new("/nonexistent/input.gif"), out.path()).unwrap_err();
        assert!(matches!(err, PlaceError::Io { .. }));
        assert!(names_in(out.path()).is_empty());
    }
}
