//! Corpus analysis subcommands: `trace`, `compare`, `subset`, `sample`.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::Args;
use glob::Pattern;

use seedcorpus::analysis::{
    CompareReport, CorpusStats, SubsetMetadata, TraceReport, compare_corpora, random_sample,
    smallest_subsets, trace_sources,
};
use seedcorpus::walker::SizeCeiling;

use crate::format::OutputFormat;

/// Options shared by every analysis command.
#[derive(Args, Debug)]
pub struct FilterArgs {
    /// Only consider files whose name matches this glob (e.g. "*.jpg")
    #[arg(long)]
    pub pattern: Option<String>,

    /// Output format: text or json
    #[arg(long, default_value = "text")]
    pub format: OutputFormat,
}

impl FilterArgs {
    fn pattern(&self) -> Result<Option<Pattern>> {
        self.pattern
            .as_deref()
            .map(|p| Pattern::new(p).with_context(|| format!("Invalid pattern '{p}'")))
            .transpose()
    }
}

#[derive(Args, Debug)]
pub struct TraceArgs {
    /// The merged corpus to attribute.
    pub corpus: PathBuf,

    /// A source directory as NAME=DIR; repeat for every source.
    #[arg(long = "source", value_name = "NAME=DIR", required = true)]
    pub sources: Vec<String>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args, Debug)]
pub struct CompareArgs {
    pub first: PathBuf,
    pub second: PathBuf,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args, Debug)]
pub struct SubsetArgs {
    /// The corpus to draw from.
    pub corpus: PathBuf,

    /// Directory receiving one `corpus_<N>` directory per size.
    pub out_base: PathBuf,

    /// Ignore files larger than this, in KB.
    #[arg(long, default_value_t = 1024, value_name = "KB")]
    pub max_size_kb: u64,

    /// Sub-corpus sizes to create.
    #[arg(long, value_delimiter = ',', default_value = "40000")]
    pub sizes: Vec<usize>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

#[derive(Args, Debug)]
pub struct SampleArgs {
    /// The corpus to draw from.
    pub corpus: PathBuf,

    /// Directory receiving the sample.
    pub out: PathBuf,

    /// Number of files to sample.
    pub count: usize,

    /// Seed for a reproducible sample.
    #[arg(long)]
    pub seed: Option<u64>,

    #[command(flatten)]
    pub filter: FilterArgs,
}

/// Split `NAME=DIR`.
fn parse_source(raw: &str) -> Result<(String, PathBuf)> {
    match raw.split_once('=') {
        Some((name, dir)) if !name.is_empty() && !dir.is_empty() => {
            Ok((name.to_owned(), PathBuf::from(dir)))
        }
        _ => bail!("Invalid source '{raw}'. Use NAME=DIR, e.g. github=github_queries/trial-1/png_corpus"),
    }
}

fn require_dir(path: &std::path::Path) -> Result<()> {
    if !path.is_dir() {
        bail!("Corpus directory {} does not exist", path.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// trace
// ---------------------------------------------------------------------------

pub fn trace(args: &TraceArgs) -> Result<()> {
    require_dir(&args.corpus)?;
    let sources = args
        .sources
        .iter()
        .map(|s| parse_source(s))
        .collect::<Result<Vec<_>>>()?;
    let pattern = args.filter.pattern()?;

    let report = trace_sources(&args.corpus, &sources, pattern.as_ref());
    match args.filter.format {
        OutputFormat::Json => println!("{}", args.filter.format.serialize(&report)?),
        OutputFormat::Text => print_trace(&report),
    }
    Ok(())
}

fn print_trace(report: &TraceReport) {
    println!("Corpus: {}", report.corpus_dir.display());
    println!("Total files: {}", report.total_files);
    println!();
    println!("Source distribution:");
    for (name, count) in &report.source_distribution {
        let pct = report.source_percentages.get(name).copied().unwrap_or(0.0);
        println!("  {name:<24} {count:>8}  ({pct:.1}%)");
    }
    println!();
    println!("Files found in multiple sources: {}", report.multi_source_files);
    println!("Files not found in any source: {}", report.total_unknown);
    for name in report.unknown_files.iter().take(10) {
        println!("  {name}");
    }
    if report.total_unknown > 10 {
        println!("  ... and {} more", report.total_unknown - 10);
    }
}

// ---------------------------------------------------------------------------
// compare
// ---------------------------------------------------------------------------

pub fn compare(args: &CompareArgs) -> Result<()> {
    require_dir(&args.first)?;
    require_dir(&args.second)?;
    let pattern = args.filter.pattern()?;

    let report = compare_corpora(&args.first, &args.second, pattern.as_ref());
    match args.filter.format {
        OutputFormat::Json => println!("{}", args.filter.format.serialize(&report)?),
        OutputFormat::Text => print_compare(&report),
    }
    Ok(())
}

fn print_stats(label: &str, stats: &CorpusStats) {
    println!("{label}: {}", stats.dir.display());
    println!(
        "  files {}  unique {}  size min {} / max {} / mean {:.1} bytes",
        stats.files, stats.unique, stats.min_bytes, stats.max_bytes, stats.mean_bytes
    );
}

fn print_compare(report: &CompareReport) {
    print_stats("A", &report.first);
    print_stats("B", &report.second);
    println!("Shared unique files: {}", report.overlap);
    println!(
        "Only in A: {}  Only in B: {}",
        report.first.unique.saturating_sub(report.overlap),
        report.second.unique.saturating_sub(report.overlap)
    );
}

// ---------------------------------------------------------------------------
// subset / sample
// ---------------------------------------------------------------------------

pub fn subset(args: &SubsetArgs) -> Result<()> {
    require_dir(&args.corpus)?;
    let pattern = args.filter.pattern()?;

    let written = smallest_subsets(
        &args.corpus,
        &args.out_base,
        SizeCeiling::from_kb(args.max_size_kb),
        &args.sizes,
        pattern.as_ref(),
    )?;
    match args.filter.format {
        OutputFormat::Json => println!("{}", args.filter.format.serialize(&written)?),
        OutputFormat::Text => written.iter().for_each(print_metadata),
    }
    Ok(())
}

pub fn sample(args: &SampleArgs) -> Result<()> {
    require_dir(&args.corpus)?;
    let pattern = args.filter.pattern()?;

    let metadata = random_sample(&args.corpus, &args.out, args.count, args.seed, pattern.as_ref())?;
    match args.filter.format {
        OutputFormat::Json => println!("{}", args.filter.format.serialize(&metadata)?),
        OutputFormat::Text => print_metadata(&metadata),
    }
    Ok(())
}

fn print_metadata(metadata: &SubsetMetadata) {
    println!(
        "{}: {} files, {} bytes (min {}, max {}, avg {:.1})",
        metadata.corpus_name,
        metadata.file_count,
        metadata.total_bytes,
        metadata.min_file_bytes,
        metadata.max_file_bytes,
        metadata.average_file_bytes
    );
}
