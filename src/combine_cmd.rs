//! `seedcorpus combine`: run the collectors for one trial, then merge their
//! output into a single corpus.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{info, warn};

use seedcorpus::collector::{
    PlanContext, builtin_collectors, check_keys, parse_file_types, plan, source_directories,
};
use seedcorpus::config::SeedConfig;
use seedcorpus::error::{RunError, clear_previous};
use seedcorpus::merge::{MergeLimits, merge_sources};
use seedcorpus::summary::{RunSummary, render_filtered, render_generated, render_total};
use seedcorpus::supervise::{Supervised, WaitOutcome, interrupt_flag, spawn_logged, wait_all};
use seedcorpus::walker::SizeCeiling;

/// Timestamp format of per-run log directories.
const LOG_STAMP: &str = "%Y-%m-%d %H%M%S";

#[derive(Args, Debug)]
pub struct CombineArgs {
    /// The output corpus directory.
    pub output_dir: PathBuf,

    /// File extension(s) to collect, comma-separated (e.g. png or png,jpg).
    pub file_type: String,

    /// Delete intermediate and output directories from a previous run.
    ///
    /// Without this flag an existing directory aborts the run.
    #[arg(short = 'd')]
    pub delete: bool,

    /// Run time limit for the collectors, in seconds [default: 3600]
    #[arg(short = 't', value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Per-file size limit, in KB; larger files are ignored [default: 1024]
    #[arg(short = 's', value_name = "KB")]
    pub size_limit: Option<u64>,

    /// Maximum number of files in the output corpus [default: 40000]
    #[arg(short = 'n', value_name = "COUNT")]
    pub max_files: Option<usize>,

    /// Disable extension and magic number checking in the collectors.
    #[arg(short = 'e')]
    pub no_check: bool,

    /// Trial name; namespaces intermediate directories and logs.
    #[arg(long = "trial-name", alias = "trial_name", hide = true, default_value = "trial-1")]
    pub trial_name: String,
}

pub fn run(args: &CombineArgs, config: &SeedConfig) -> Result<()> {
    let file_types = parse_file_types(&args.file_type);
    if file_types.is_empty() {
        return Err(RunError::NoFileTypes {
            raw: args.file_type.clone(),
        }
        .into());
    }
    let timeout = Duration::from_secs(args.timeout.unwrap_or(config.run.timeout_secs));
    let size_limit_kb = args.size_limit.unwrap_or(config.run.size_limit_kb);
    let max_files = args.max_files.unwrap_or(config.run.max_files);

    clear_previous(&args.output_dir, args.delete)?;

    let stamp = chrono::Local::now().format(LOG_STAMP).to_string();
    let logs_dir = config.run.logs_dir.join(stamp).join(&args.trial_name);

    let specs = if config.collectors.is_empty() {
        builtin_collectors()
    } else {
        config.collectors.clone()
    };
    let ctx = PlanContext {
        work_root: &config.run.work_root,
        logs_dir: &logs_dir,
        trial: &args.trial_name,
        python: &config.run.python,
        no_check: args.no_check,
    };
    let mut plans = plan(&specs, &file_types, &ctx);

    for p in &plans {
        clear_previous(p.clear_unit(), args.delete)?;
    }
    check_keys(&mut plans, |key| std::env::var(key).ok());

    let summary = RunSummary::create(&logs_dir)
        .with_context(|| format!("Failed to create run summary in {}", logs_dir.display()))?;

    let interrupted = interrupt_flag();
    let mut procs: Vec<Supervised> = Vec::new();
    for p in plans.iter().filter(|p| p.enabled) {
        match spawn_logged(&p.name, &p.command, &p.log) {
            Ok(child) => procs.push(child),
            Err(e) => warn!(collector = %p.name, error = %e, "failed to start collector"),
        }
    }

    let (outcome, duration) = wait_all(
        &mut procs,
        timeout,
        &config.run.cancellation_policy(),
        &interrupted,
    );
    if outcome != WaitOutcome::Completed {
        warn!(?outcome, "collectors stopped early; merging what they produced");
    }

    summary
        .append(&render_generated(&file_types, duration, size_limit_kb, &plans))
        .context("Failed to write run summary")?;

    info!(output = %args.output_dir.display(), "combining collector output");
    let limits = MergeLimits {
        size_ceiling: SizeCeiling::from_kb(size_limit_kb),
        max_files,
    };
    let report = merge_sources(&source_directories(&plans), &args.output_dir, limits)
        .with_context(|| format!("Failed to create {}", args.output_dir.display()))?;
    info!(
        added = report.total_added(),
        duplicates = report.duplicates,
        failures = report.failures,
        "merge finished"
    );

    summary
        .append(&render_filtered(size_limit_kb, &plans))
        .context("Failed to write run summary")?;
    let total = render_total(&args.file_type, &args.output_dir);
    summary.append(&total).context("Failed to write run summary")?;

    print!("{total}");
    println!("Run summary: {}", summary.path().display());
    Ok(())
}
