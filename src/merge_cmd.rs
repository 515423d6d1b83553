//! `seedcorpus merge`: merge existing directories into a corpus without
//! running any collectors.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use seedcorpus::config::SeedConfig;
use seedcorpus::error::clear_previous;
use seedcorpus::merge::{MergeLimits, MergeReport, SourceDirectory, merge_sources};
use seedcorpus::walker::SizeCeiling;

use crate::format::OutputFormat;

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// The output corpus directory.
    pub output_dir: PathBuf,

    /// Ordinary source directory, merged first in the order given.
    #[arg(long = "source", value_name = "DIR")]
    pub sources: Vec<PathBuf>,

    /// Deferred source directory; fills the budget left after ordinary
    /// sources, smallest files first.
    #[arg(long = "deferred", value_name = "DIR")]
    pub deferred: Vec<PathBuf>,

    /// Delete the output directory if it already exists.
    #[arg(short = 'd')]
    pub delete: bool,

    /// Per-file size limit, in KB [default: from config, 1024]
    #[arg(short = 's', value_name = "KB")]
    pub size_limit: Option<u64>,

    /// Maximum number of files in the output corpus [default: from config, 40000]
    #[arg(short = 'n', value_name = "COUNT")]
    pub max_files: Option<usize>,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

pub fn run(args: &MergeArgs, config: &SeedConfig) -> Result<()> {
    clear_previous(&args.output_dir, args.delete)?;

    let sources: Vec<SourceDirectory> = args
        .sources
        .iter()
        .map(SourceDirectory::ordinary)
        .chain(args.deferred.iter().map(SourceDirectory::deferred))
        .collect();
    let limits = MergeLimits {
        size_ceiling: SizeCeiling::from_kb(args.size_limit.unwrap_or(config.run.size_limit_kb)),
        max_files: args.max_files.unwrap_or(config.run.max_files),
    };

    let report = merge_sources(&sources, &args.output_dir, limits)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;

    match args.format {
        OutputFormat::Json => println!("{}", args.format.serialize(&report)?),
        OutputFormat::Text => print_report(&report, args),
    }
    Ok(())
}

fn print_report(report: &MergeReport, args: &MergeArgs) {
    println!(
        "Merged {} files into {}",
        report.total_added(),
        args.output_dir.display()
    );
    println!("  ordinary:   {}", report.ordinary_added);
    println!(
        "  deferred:   {} of {} candidates",
        report.deferred_added, report.deferred_candidates
    );
    println!("  duplicates: {}", report.duplicates);
    if report.failures > 0 {
        println!("  failures:   {}", report.failures);
    }
    for missing in &report.missing_sources {
        println!("  skipped missing source {}", missing.display());
    }
}
