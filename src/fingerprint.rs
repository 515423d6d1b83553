//! Content fingerprints for corpus deduplication.
//!
//! A [`ContentFingerprint`] is the SHA-256 digest of a file's full byte
//! content, rendered as 64 lowercase hex characters. It is the only key the
//! merger uses to decide whether two files are the same: names, extensions,
//! and directories of origin never take part.
//!
//! Files are streamed through the hasher in fixed-size chunks, so arbitrarily
//! large inputs never have to fit in memory.

use std::collections::HashSet;
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Read buffer size used while hashing.
const CHUNK_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// ContentFingerprint
// ---------------------------------------------------------------------------

/// Lowercase hex SHA-256 digest of a file's content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentFingerprint(String);

impl ContentFingerprint {
    /// Fingerprint an in-memory buffer.
    #[must_use]
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(format!("{:x}", hasher.finalize()))
    }

    /// The 64-character hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// HashError
// ---------------------------------------------------------------------------

/// A file could not be opened or read while computing its fingerprint.
#[derive(Debug)]
pub struct HashError {
    /// The file being hashed.
    pub path: PathBuf,
    /// The underlying I/O failure.
    pub source: io::Error,
}

impl fmt::Display for HashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to fingerprint {}: {}",
            self.path.display(),
            self.source
        )
    }
}

impl std::error::Error for HashError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

/// Compute the fingerprint of the file at `path`.
///
/// # Errors
/// Returns [`HashError`] if the file cannot be opened or a read fails part
/// way through. No partial digest is ever returned.
pub fn fingerprint_file(path: &Path) -> Result<ContentFingerprint, HashError> {
    let wrap = |source| HashError {
        path: path.to_owned(),
        source,
    };
    let file = File::open(path).map_err(wrap)?;
    fingerprint_reader(file).map_err(wrap)
}

/// Stream everything `reader` yields through SHA-256.
///
/// # Errors
/// Propagates any read error other than [`io::ErrorKind::Interrupted`].
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<ContentFingerprint> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; CHUNK_SIZE];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buf[..n]);
    }
    Ok(ContentFingerprint(format!("{:x}", hasher.finalize())))
}

// ---------------------------------------------------------------------------
// FingerprintRegistry
// ---------------------------------------------------------------------------

/// The set of fingerprints already admitted during one merge run.
///
/// One registry is created per run and passed by `&mut` through every merge
/// phase, so "already seen" is global across all source directories.
#[derive(Debug, Default)]
pub struct FingerprintRegistry {
    seen: HashSet<ContentFingerprint>,
}

impl FingerprintRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, fingerprint: &ContentFingerprint) -> bool {
        self.seen.contains(fingerprint)
    }

    /// Register a fingerprint. Returns `false` if it was already present.
    pub fn insert(&mut self, fingerprint: ContentFingerprint) -> bool {
        self.seen.insert(fingerprint)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}
