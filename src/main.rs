use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use seedcorpus::config::{CONFIG_FILE, SeedConfig};

mod analyze_cmd;
mod combine_cmd;
mod format;
mod merge_cmd;
mod telemetry;
mod trials;

/// Fuzzing seed corpus builder
///
/// Runs a set of seed collectors (web search, GitHub, Common Crawl, bug
/// trackers, or any command you configure) under a time limit, then merges
/// their output into one deduplicated corpus bounded by a per-file size
/// limit and a file count.
///
/// QUICK START:
///
///   seedcorpus combine out/png png -t 600
///
///   # Re-run, replacing the previous run's directories
///   seedcorpus combine -d out/png png
///
///   # Ten parallel trials from a config file
///   seedcorpus trials --create-template
///   seedcorpus --config parallel_config.toml trials
///
/// LOGGING:
///
///   SEEDCORPUS_LOG=debug         filter (EnvFilter syntax, default info)
///   SEEDCORPUS_LOG_FORMAT=json   one JSON object per event on stderr
#[derive(Parser)]
#[command(name = "seedcorpus")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(
    after_help = "See 'seedcorpus <command> --help' for more information on a specific command."
)]
struct Cli {
    /// Configuration file; a missing file means built-in defaults.
    #[arg(long, global = true, default_value = CONFIG_FILE, value_name = "FILE")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the collectors for one trial and merge their output
    ///
    /// Every enabled collector runs in its own process group until it
    /// exits or the time limit passes. Their directories are then merged
    /// into OUTPUT_DIR: ordinary sources first, then deferred sources
    /// smallest-first into whatever budget remains. A summary is written
    /// to <logs_dir>/<timestamp>/<trial>/combine.log.
    Combine(combine_cmd::CombineArgs),

    /// Merge existing directories into a corpus without running collectors
    Merge(merge_cmd::MergeArgs),

    /// Run several combine trials in parallel
    Trials(trials::TrialsArgs),

    /// Attribute the files of a corpus to the sources they came from
    Trace(analyze_cmd::TraceArgs),

    /// Compare the content of two corpora
    Compare(analyze_cmd::CompareArgs),

    /// Create sub-corpora of the smallest files
    Subset(analyze_cmd::SubsetArgs),

    /// Create a random sample of a corpus
    Sample(analyze_cmd::SampleArgs),
}

fn main() -> Result<()> {
    let _telemetry = telemetry::init();
    let cli = Cli::parse();
    let config = SeedConfig::load(&cli.config)?;

    match cli.command {
        Commands::Combine(ref args) => combine_cmd::run(args, &config),
        Commands::Merge(ref args) => merge_cmd::run(args, &config),
        Commands::Trials(ref args) => trials::run(args, &config, &cli.config),
        Commands::Trace(ref args) => analyze_cmd::trace(args),
        Commands::Compare(ref args) => analyze_cmd::compare(args),
        Commands::Subset(ref args) => analyze_cmd::subset(args),
        Commands::Sample(ref args) => analyze_cmd::sample(args),
    }
}
