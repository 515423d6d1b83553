//! Post-run corpus analysis.
//!
//! - [`trace_sources`] attributes every corpus file to the collector
//!   directories holding identical content.
//! - [`compare_corpora`] measures the fingerprint overlap and size profile of
//!   two corpora (e.g. two trials of the same file type).
//! - [`smallest_subsets`] and [`random_sample`] carve fixed-size
//!   sub-corpora out of a corpus, each with a `metadata.json`.
//!
//! Every operation can be narrowed to file names matching a glob pattern.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glob::Pattern;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use serde::Serialize;
use tracing::{info, warn};

use crate::fingerprint::{ContentFingerprint, fingerprint_file};
use crate::naming::place_file;
use crate::walker::{SizeCeiling, walk_files};

/// Name of the metadata file written into every sub-corpus.
pub const METADATA_FILE: &str = "metadata.json";

/// Cap on file names listed per section of a trace report.
const LISTED_NAMES: usize = 100;

// ---------------------------------------------------------------------------
// Corpus listing
// ---------------------------------------------------------------------------

/// A file found in a corpus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CorpusFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
}

/// Regular files under `dir`, restricted to names matching `pattern`.
#[must_use]
pub fn corpus_files(dir: &Path, pattern: Option<&Pattern>) -> Vec<CorpusFile> {
    walk_files(dir)
        .into_iter()
        .filter_map(|f| {
            let name = f.path.file_name()?.to_string_lossy().into_owned();
            if pattern.is_some_and(|p| !p.matches(&name)) {
                return None;
            }
            Some(CorpusFile {
                path: f.path,
                name,
                size: f.size,
            })
        })
        .collect()
}

fn fingerprints(files: &[CorpusFile]) -> Vec<(ContentFingerprint, &CorpusFile)> {
    files
        .iter()
        .filter_map(|f| match fingerprint_file(&f.path) {
            Ok(fp) => Some((fp, f)),
            Err(e) => {
                warn!(error = %e, "skipping unreadable file");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Source tracing
// ---------------------------------------------------------------------------

/// Per-source attribution of a corpus.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TraceReport {
    pub corpus_dir: PathBuf,
    /// Corpus files credited to each source. A file found in several
    /// sources is credited to all of them.
    pub source_distribution: BTreeMap<String, usize>,
    /// Share of all credits per source, in percent.
    pub source_percentages: BTreeMap<String, f64>,
    /// Up to 100 credited file names per source.
    pub source_files: BTreeMap<String, Vec<String>>,
    /// Up to 100 corpus files whose content no source holds.
    pub unknown_files: Vec<String>,
    pub total_files: usize,
    pub total_credits: usize,
    pub total_unknown: usize,
    /// Corpus files whose content appears in more than one source.
    pub multi_source_files: usize,
}

/// Attribute the files of `corpus` to `sources` by content.
#[must_use]
pub fn trace_sources(
    corpus: &Path,
    sources: &[(String, PathBuf)],
    pattern: Option<&Pattern>,
) -> TraceReport {
    let mut holders: HashMap<ContentFingerprint, Vec<&str>> = HashMap::new();
    for (name, dir) in sources {
        if !dir.is_dir() {
            warn!(source = %name, dir = %dir.display(), "source directory not found");
            continue;
        }
        let files = corpus_files(dir, pattern);
        info!(source = %name, files = files.len(), "scanned source");
        for (fp, _) in fingerprints(&files) {
            let entry = holders.entry(fp).or_default();
            if !entry.contains(&name.as_str()) {
                entry.push(name.as_str());
            }
        }
    }

    let mut report = TraceReport {
        corpus_dir: corpus.to_owned(),
        ..TraceReport::default()
    };
    let files = corpus_files(corpus, pattern);
    for (fp, file) in fingerprints(&files) {
        report.total_files += 1;
        let Some(names) = holders.get(&fp) else {
            report.total_unknown += 1;
            if report.unknown_files.len() < LISTED_NAMES {
                report.unknown_files.push(file.name.clone());
            }
            continue;
        };
        if names.len() > 1 {
            report.multi_source_files += 1;
        }
        for name in names {
            *report.source_distribution.entry((*name).to_owned()).or_default() += 1;
            let listed = report.source_files.entry((*name).to_owned()).or_default();
            if listed.len() < LISTED_NAMES {
                listed.push(file.name.clone());
            }
        }
    }

    report.total_credits = report.source_distribution.values().sum();
    if report.total_credits > 0 {
        #[allow(clippy::cast_precision_loss)]
        let total = report.total_credits as f64;
        for (name, count) in &report.source_distribution {
            #[allow(clippy::cast_precision_loss)]
            let pct = (*count as f64 / total) * 100.0;
            report.source_percentages.insert(name.clone(), pct);
        }
    }
    report
}

// ---------------------------------------------------------------------------
// Corpus comparison
// ---------------------------------------------------------------------------

/// Size profile and distinct-content count of one corpus.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CorpusStats {
    pub dir: PathBuf,
    pub files: usize,
    pub unique: usize,
    pub min_bytes: u64,
    pub max_bytes: u64,
    pub mean_bytes: f64,
}

/// Two corpora side by side, plus their shared content.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CompareReport {
    pub first: CorpusStats,
    pub second: CorpusStats,
    /// Distinct fingerprints present in both.
    pub overlap: usize,
}

fn stats(dir: &Path, files: &[CorpusFile], unique: usize) -> CorpusStats {
    let sizes = files.iter().map(|f| f.size);
    let total: u64 = sizes.clone().sum();
    #[allow(clippy::cast_precision_loss)]
    let mean_bytes = if files.is_empty() {
        0.0
    } else {
        total as f64 / files.len() as f64
    };
    CorpusStats {
        dir: dir.to_owned(),
        files: files.len(),
        unique,
        min_bytes: sizes.clone().min().unwrap_or(0),
        max_bytes: sizes.max().unwrap_or(0),
        mean_bytes,
    }
}

/// Compare two corpora by content.
#[must_use]
pub fn compare_corpora(first: &Path, second: &Path, pattern: Option<&Pattern>) -> CompareReport {
    let files_a = corpus_files(first, pattern);
    let files_b = corpus_files(second, pattern);
    let set_a: HashSet<ContentFingerprint> = fingerprints(&files_a).into_iter().map(|(fp, _)| fp).collect();
    let set_b: HashSet<ContentFingerprint> = fingerprints(&files_b).into_iter().map(|(fp, _)| fp).collect();

    CompareReport {
        first: stats(first, &files_a, set_a.len()),
        second: stats(second, &files_b, set_b.len()),
        overlap: set_a.intersection(&set_b).count(),
    }
}

// ---------------------------------------------------------------------------
// Sub-corpora
// ---------------------------------------------------------------------------

/// One file listed in a sub-corpus `metadata.json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MetadataEntry {
    pub name: String,
    pub size_bytes: u64,
}

/// Contents of a sub-corpus `metadata.json`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubsetMetadata {
    pub corpus_name: String,
    pub file_count: usize,
    pub total_bytes: u64,
    pub max_file_bytes: u64,
    pub min_file_bytes: u64,
    pub average_file_bytes: f64,
    pub files: Vec<MetadataEntry>,
}

/// Directory name for a sub-corpus of `count` files: `corpus_40k` for round
/// thousands, `corpus_250` otherwise.
#[must_use]
pub fn subset_name(count: usize) -> String {
    if count >= 1000 && count % 1000 == 0 {
        format!("corpus_{}k", count / 1000)
    } else {
        format!("corpus_{count}")
    }
}

/// Copy `selected` into `out` and write its metadata.
///
/// The metadata file is claimed before any copy, so a corpus file of the
/// same name is placed under a suffixed name instead of being overwritten.
fn materialize(name: &str, selected: &[&CorpusFile], out: &Path) -> Result<SubsetMetadata> {
    std::fs::create_dir_all(out).with_context(|| format!("Failed to create {}", out.display()))?;
    let path = out.join(METADATA_FILE);
    std::fs::File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?;

    let mut files = Vec::with_capacity(selected.len());
    for file in selected {
        match place_file(&file.path, out) {
            Ok(dest) => files.push(MetadataEntry {
                name: dest
                    .file_name()
                    .map_or_else(|| file.name.clone(), |n| n.to_string_lossy().into_owned()),
                size_bytes: file.size,
            }),
            Err(e) => warn!(error = %e, "skipping file that could not be copied"),
        }
    }

    let total_bytes: u64 = files.iter().map(|f| f.size_bytes).sum();
    #[allow(clippy::cast_precision_loss)]
    let average_file_bytes = if files.is_empty() {
        0.0
    } else {
        total_bytes as f64 / files.len() as f64
    };
    let metadata = SubsetMetadata {
        corpus_name: name.to_owned(),
        file_count: files.len(),
        total_bytes,
        max_file_bytes: files.iter().map(|f| f.size_bytes).max().unwrap_or(0),
        min_file_bytes: files.iter().map(|f| f.size_bytes).min().unwrap_or(0),
        average_file_bytes,
        files,
    };

    let json = serde_json::to_string_pretty(&metadata).context("Failed to serialize metadata")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(corpus = name, files = metadata.file_count, total_bytes, "sub-corpus written");
    Ok(metadata)
}

/// For each target count, copy the smallest files of `corpus` (within
/// `ceiling`) into `<out_base>/<subset_name(n)>`.
///
/// Targets larger than the number of eligible files are clamped.
///
/// # Errors
/// Fails if an output directory or metadata file cannot be written.
pub fn smallest_subsets(
    corpus: &Path,
    out_base: &Path,
    ceiling: SizeCeiling,
    targets: &[usize],
    pattern: Option<&Pattern>,
) -> Result<Vec<SubsetMetadata>> {
    let mut eligible: Vec<CorpusFile> = corpus_files(corpus, pattern)
        .into_iter()
        .filter(|f| ceiling.admits(f.size))
        .collect();
    eligible.sort_by_key(|f| f.size);
    info!(eligible = eligible.len(), "eligible files for sub-corpora");

    let mut written = Vec::with_capacity(targets.len());
    for &target in targets {
        let count = if target > eligible.len() {
            warn!(requested = target, available = eligible.len(), "not enough files; clamping");
            eligible.len()
        } else {
            target
        };
        let name = subset_name(count);
        let selected: Vec<&CorpusFile> = eligible.iter().take(count).collect();
        written.push(materialize(&name, &selected, &out_base.join(&name))?);
    }
    Ok(written)
}

/// Copy a uniformly random sample of `count` files of `corpus` into `out`.
///
/// With `seed` set the selection is reproducible.
///
/// # Errors
/// Fails if `out` or its metadata file cannot be written.
pub fn random_sample(
    corpus: &Path,
    out: &Path,
    count: usize,
    seed: Option<u64>,
    pattern: Option<&Pattern>,
) -> Result<SubsetMetadata> {
    let files = corpus_files(corpus, pattern);
    if count > files.len() {
        warn!(requested = count, available = files.len(), "not enough files; sampling all");
    }
    let mut rng = seed.map_or_else(StdRng::from_os_rng, StdRng::seed_from_u64);
    let selected: Vec<&CorpusFile> = files.choose_multiple(&mut rng, count).collect();
    materialize(&format!("random_{}", selected.len()), &selected, out)
}
