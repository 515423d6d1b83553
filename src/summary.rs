//! Plain-text run summary (`combine.log`).
//!
//! Written next to the collector logs of a run. The file is built up in
//! three appends: the header with per-collector raw counts (after the
//! collectors stop), the counts under the size ceiling (after the merge),
//! and the final corpus total.

use std::fmt::Write as _;
use std::fs::{self, OpenOptions};
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::collector::CollectorPlan;
use crate::walker::{SizeCeiling, count_eligible, count_files};

/// File name of the summary inside a run's log directory.
pub const SUMMARY_FILE: &str = "combine.log";

/// Append-only handle on a run summary file.
#[derive(Debug)]
pub struct RunSummary {
    path: PathBuf,
}

impl RunSummary {
    /// Create (or truncate) the summary in `logs_dir`.
    ///
    /// # Errors
    /// Fails if the directory or file cannot be created.
    pub fn create(logs_dir: &Path) -> io::Result<Self> {
        fs::create_dir_all(logs_dir)?;
        let path = logs_dir.join(SUMMARY_FILE);
        fs::File::create(&path)?;
        Ok(Self { path })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `text` verbatim.
    ///
    /// # Errors
    /// Fails if the file cannot be opened or written.
    pub fn append(&self, text: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(text.as_bytes())
    }
}

fn disabled_line(name: &str) -> String {
    format!("{name} method not enabled, or its required API key not provided.\n")
}

/// Header plus the raw file count of every collector directory.
#[must_use]
pub fn render_generated(
    file_types: &[String],
    duration: Duration,
    size_limit_kb: u64,
    plans: &[CollectorPlan],
) -> String {
    let quoted: Vec<String> = file_types.iter().map(|t| format!("'{t}'")).collect();
    let mut out = String::new();
    let _ = writeln!(out, "File type: [{}]", quoted.join(", "));
    let _ = writeln!(out, "Run duration: {:.3} seconds", duration.as_secs_f64());
    let _ = writeln!(out, "File size limit: {size_limit_kb} KB");
    for plan in plans {
        if plan.enabled {
            let _ = writeln!(
                out,
                "{} generated {} files at {}.",
                plan.name,
                count_files(&plan.dir),
                plan.dir.display()
            );
        } else {
            out.push_str(&disabled_line(&plan.name));
        }
    }
    out
}

/// Per-collector counts of files under the size ceiling.
#[must_use]
pub fn render_filtered(size_limit_kb: u64, plans: &[CollectorPlan]) -> String {
    let ceiling = SizeCeiling::from_kb(size_limit_kb);
    let mut out = String::from("\n=== File counts after size filtering ===\n");
    for plan in plans {
        if plan.enabled {
            let _ = writeln!(
                out,
                "{} has {} files under {size_limit_kb}KB size limit at {}.",
                plan.name,
                count_eligible(&plan.dir, ceiling),
                plan.dir.display()
            );
        } else {
            out.push_str(&disabled_line(&plan.name));
        }
    }
    out
}

/// Final line with the size of the merged corpus.
#[must_use]
pub fn render_total(file_type: &str, output: &Path) -> String {
    format!(
        "Total of {} {file_type} distinct files generated at {}.\n",
        count_files(output),
        output.display()
    )
}
