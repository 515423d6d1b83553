//! Run-level errors for seedcorpus.
//!
//! [`RunError`] covers the conditions that abort a whole run before any
//! collector starts. Per-file problems during a merge are never errors at
//! this level; they are logged and counted instead.
//!
//! Messages say what went wrong and how to fix it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use tracing::info;

/// Errors that stop a run at startup.
#[derive(Debug)]
pub enum RunError {
    /// A directory from a previous run exists and deletion was not requested.
    DirectoryExists {
        /// The directory that was found.
        path: PathBuf,
    },

    /// Something other than a directory sits where a directory must go.
    NotADirectory {
        path: PathBuf,
    },

    /// No usable file type was given.
    NoFileTypes {
        /// The raw argument.
        raw: String,
    },

    /// A required trial setting was given neither in the config nor on the
    /// command line.
    MissingSetting {
        /// Config key of the missing setting.
        name: &'static str,
    },

    /// A filesystem operation on `path` failed.
    Io {
        path: PathBuf,
        source: io::Error,
    },
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DirectoryExists { path } => write!(
                f,
                "folder found at {} from the previous run.\n  To fix: add -d to delete it, or rename/delete it manually.",
                path.display()
            ),
            Self::NotADirectory { path } => write!(
                f,
                "{} exists and is not a directory.\n  To fix: choose another output path, or move the file away.",
                path.display()
            ),
            Self::NoFileTypes { raw } => write!(
                f,
                "no file type in '{raw}'.\n  Pass one or more comma-separated types, e.g. png or png,jpg"
            ),
            Self::MissingSetting { name } => write!(
                f,
                "no {name} specified.\n  Set `{name}` under [trials] in the config file or pass it on the command line."
            ),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Make sure `path` holds nothing from a previous run.
///
/// An existing directory is removed when `delete` is set and rejected with
/// [`RunError::DirectoryExists`] otherwise. Any other existing file is
/// rejected with [`RunError::NotADirectory`], `delete` or not. Returns `true`
/// if something was removed.
///
/// # Errors
/// `DirectoryExists` or `NotADirectory` as above, or `Io` if the path cannot
/// be inspected or removed.
pub fn clear_previous(path: &Path, delete: bool) -> Result<bool, RunError> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return Err(RunError::NotADirectory {
                path: path.to_owned(),
            });
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(source) => {
            return Err(RunError::Io {
                path: path.to_owned(),
                source,
            });
        }
    }
    if !delete {
        return Err(RunError::DirectoryExists {
            path: path.to_owned(),
        });
    }
    std::fs::remove_dir_all(path).map_err(|source| RunError::Io {
        path: path.to_owned(),
        source,
    })?;
    info!(path = %path.display(), "removed directory from previous run");
    Ok(true)
}
