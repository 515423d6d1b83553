//! Bounded multi-source corpus merge.
//!
//! Combines several collector output directories into one output corpus:
//!
//! 1. **Ordinary phase**: every ordinary source, in the order given, is
//!    walked; each file under the size ceiling is fingerprinted and, if its
//!    content is new, copied into the output. First seen wins, permanently.
//! 2. **Deferred phase**: only if file budget remains. All deferred sources
//!    are walked into one candidate list (deduplicated against the same
//!    registry). If there are more candidates than budget, the smallest
//!    `remaining` files are kept, favouring file count over byte coverage.
//!
//! # Invariants
//!
//! - No two output files share a [`ContentFingerprint`].
//! - Every output file is within [`MergeLimits::size_ceiling`].
//! - The number of files placed never exceeds [`MergeLimits::max_files`].
//!
//! A single unreadable or uncopyable file is logged and dropped; it never
//! aborts the merge. Missing source directories are skipped.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::fingerprint::{ContentFingerprint, FingerprintRegistry, fingerprint_file};
use crate::naming::place_file;
use crate::walker::{SizeCeiling, SourceFile, eligible_files};

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// How a source directory takes part in the merge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceRole {
    /// Processed first and unconditionally.
    #[default]
    Ordinary,
    /// Consulted only when budget remains; rationed smallest-first.
    Deferred,
}

impl fmt::Display for SourceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ordinary => write!(f, "ordinary"),
            Self::Deferred => write!(f, "deferred"),
        }
    }
}

/// A directory feeding the merge, tagged with its role.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceDirectory {
    pub path: PathBuf,
    pub role: SourceRole,
}

impl SourceDirectory {
    #[must_use]
    pub fn ordinary(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: SourceRole::Ordinary,
        }
    }

    #[must_use]
    pub fn deferred(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            role: SourceRole::Deferred,
        }
    }
}

/// Admission limits for one merge run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeLimits {
    pub size_ceiling: SizeCeiling,
    pub max_files: usize,
}

/// A file that passed the size filter and was fingerprinted.
#[derive(Clone, Debug, PartialEq, Eq)]
struct FileCandidate {
    path: PathBuf,
    size: u64,
    fingerprint: ContentFingerprint,
}

// ---------------------------------------------------------------------------
// MergeReport
// ---------------------------------------------------------------------------

/// What a merge run did.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    /// Files copied from ordinary sources.
    pub ordinary_added: usize,
    /// Unique, eligible files found in deferred sources.
    pub deferred_candidates: usize,
    /// Files copied from deferred sources.
    pub deferred_added: usize,
    /// Files skipped because their content was already admitted.
    pub duplicates: usize,
    /// Files dropped because hashing or copying failed.
    pub failures: usize,
    /// Source directories that did not exist.
    pub missing_sources: Vec<PathBuf>,
}

impl MergeReport {
    /// Total number of files placed in the output directory.
    #[must_use]
    pub const fn total_added(&self) -> usize {
        self.ordinary_added + self.deferred_added
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge `sources` into `output` under `limits`.
///
/// `output` is created if needed. Files already present in it are not
/// counted against the budget and are never overwritten.
///
/// # Errors
/// Only fails if `output` cannot be created. Per-file problems are logged
/// and recorded in [`MergeReport::failures`].
pub fn merge_sources(
    sources: &[SourceDirectory],
    output: &Path,
    limits: MergeLimits,
) -> std::io::Result<MergeReport> {
    std::fs::create_dir_all(output)?;

    let mut registry = FingerprintRegistry::new();
    let mut report = MergeReport::default();

    let (ordinary, deferred): (Vec<&SourceDirectory>, Vec<&SourceDirectory>) = sources
        .iter()
        .partition(|s| s.role == SourceRole::Ordinary);

    admit_ordinary(&ordinary, output, limits, &mut registry, &mut report);

    let remaining = limits.max_files.saturating_sub(report.ordinary_added);
    if remaining == 0 || deferred.is_empty() {
        if !deferred.is_empty() {
            info!(
                added = report.ordinary_added,
                "file budget used up by ordinary sources; deferred sources not consulted"
            );
        }
        return Ok(report);
    }

    info!(
        added = report.ordinary_added,
        remaining, "ordinary sources done; collecting deferred candidates"
    );
    let mut candidates = collect_deferred(&deferred, limits.size_ceiling, &mut registry, &mut report);
    report.deferred_candidates = candidates.len();

    if candidates.len() > remaining {
        candidates.sort_by_key(|c| c.size);
        candidates.truncate(remaining);
    }

    place_deferred(candidates, output, &mut report);

    info!(
        ordinary = report.ordinary_added,
        deferred = report.deferred_added,
        duplicates = report.duplicates,
        failures = report.failures,
        "merge complete"
    );
    Ok(report)
}

/// Copy every new, eligible file from the ordinary sources until the budget
/// is spent.
fn admit_ordinary(
    sources: &[&SourceDirectory],
    output: &Path,
    limits: MergeLimits,
    registry: &mut FingerprintRegistry,
    report: &mut MergeReport,
) {
    for source in sources {
        if !source.path.is_dir() {
            debug!(source = %source.path.display(), "ordinary source missing; skipped");
            report.missing_sources.push(source.path.clone());
            continue;
        }
        info!(source = %source.path.display(), "adding files from ordinary source");

        let files = eligible_files(&source.path, limits.size_ceiling);
        if !admit_files(&files, output, limits.max_files, registry, report) {
            warn!(
                max_files = limits.max_files,
                "file budget reached during ordinary phase"
            );
            break;
        }
    }
}

/// Copy each file whose content is new into `output`, in order.
///
/// Returns `false` once `max_files` ordinary files have been placed and
/// `files` still held more. Unreadable or uncopyable files are dropped and
/// counted in [`MergeReport::failures`].
fn admit_files(
    files: &[SourceFile],
    output: &Path,
    max_files: usize,
    registry: &mut FingerprintRegistry,
    report: &mut MergeReport,
) -> bool {
    for file in files {
        if report.ordinary_added >= max_files {
            return false;
        }

        let fingerprint = match fingerprint_file(&file.path) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(error = %e, "dropping unreadable file");
                report.failures += 1;
                continue;
            }
        };
        if registry.contains(&fingerprint) {
            report.duplicates += 1;
            continue;
        }

        match place_file(&file.path, output) {
            Ok(dest) => {
                debug!(
                    src = %file.path.display(),
                    dest = %dest.display(),
                    fingerprint = %fingerprint,
                    "admitted file"
                );
                registry.insert(fingerprint);
                report.ordinary_added += 1;
            }
            Err(e) => {
                warn!(error = %e, "dropping file that could not be copied");
                report.failures += 1;
            }
        }
    }
    true
}

/// Gather the unique, eligible files of all deferred sources into one list,
/// registering each fingerprint as it is seen.
fn collect_deferred(
    sources: &[&SourceDirectory],
    ceiling: SizeCeiling,
    registry: &mut FingerprintRegistry,
    report: &mut MergeReport,
) -> Vec<FileCandidate> {
    let mut candidates = Vec::new();

    for source in sources {
        if !source.path.is_dir() {
            debug!(source = %source.path.display(), "deferred source missing; skipped");
            report.missing_sources.push(source.path.clone());
            continue;
        }
        let files = eligible_files(&source.path, ceiling);
        candidates.extend(fingerprint_new(files, registry, report));
    }

    candidates
}

/// Fingerprint `files`, keeping those whose content the registry has not
/// seen. Unreadable files are dropped.
fn fingerprint_new(
    files: Vec<SourceFile>,
    registry: &mut FingerprintRegistry,
    report: &mut MergeReport,
) -> Vec<FileCandidate> {
    let mut fresh = Vec::new();
    for file in files {
        let fingerprint = match fingerprint_file(&file.path) {
            Ok(fp) => fp,
            Err(e) => {
                warn!(error = %e, "dropping unreadable deferred file");
                report.failures += 1;
                continue;
            }
        };
        if !registry.insert(fingerprint.clone()) {
            report.duplicates += 1;
            continue;
        }
        fresh.push(FileCandidate {
            path: file.path,
            size: file.size,
            fingerprint,
        });
    }
    fresh
}

/// Copy the chosen deferred candidates into `output`.
fn place_deferred(candidates: Vec<FileCandidate>, output: &Path, report: &mut MergeReport) {
    for candidate in candidates {
        match place_file(&candidate.path, output) {
            Ok(dest) => {
                debug!(
                    src = %candidate.path.display(),
                    dest = %dest.display(),
                    size = candidate.size,
                    fingerprint = %candidate.fingerprint,
                    "admitted deferred file"
                );
                report.deferred_added += 1;
            }
            Err(e) => {
                warn!(error = %e, "dropping deferred file");
                report.failures += 1;
            }
        }
    }
}
