//! `seedcorpus trials`: run a batch of independent `combine` trials in
//! parallel and record their outcomes.
//!
//! Each trial is a child `seedcorpus combine` process in its own process
//! group, writing to `<output_base>/trial_<i>`. At most
//! `max_parallel_trials` run at once and launches are spaced by
//! `stagger_secs`. On Ctrl-C the batch stops launching and forwards SIGINT to
//! every running trial, which then merges what its collectors produced.

use std::collections::BTreeMap;
use std::os::unix::process::CommandExt as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use seedcorpus::config::{SeedConfig, TrialsConfig};
use seedcorpus::error::{RunError, clear_previous};
use seedcorpus::supervise::{interrupt_flag, signal_group};

/// Directory (relative to the working directory) for batch result files.
pub const RESULTS_DIR: &str = "parallel_corpus_logs";

/// File written by `--create-template`.
pub const TEMPLATE_FILE: &str = "parallel_config.toml";

const POLL: Duration = Duration::from_millis(200);

#[derive(Args, Debug, Default)]
pub struct TrialsArgs {
    /// File type(s) to collect [config: trials.file_type]
    #[arg(long)]
    pub file_type: Option<String>,

    /// Collector time limit per trial, in seconds [config: trials.timeout_secs]
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,

    /// Per-file size limit, in KB [config: trials.size_limit_kb]
    #[arg(long, value_name = "KB")]
    pub file_size: Option<u64>,

    /// Base output directory [config: trials.output_base]
    #[arg(long, value_name = "DIR")]
    pub output_base: Option<PathBuf>,

    /// Delete results of a previous batch first.
    #[arg(long)]
    pub delete_previous: bool,

    /// Number of trials to run [config: trials.trials_num]
    #[arg(long, value_name = "N")]
    pub trials_num: Option<usize>,

    /// Maximum number of trials running at once [config: trials.max_parallel_trials]
    #[arg(long, value_name = "N")]
    pub max_parallel_trials: Option<usize>,

    /// Pause between trial launches, in seconds [config: trials.stagger_secs]
    #[arg(long, value_name = "SECONDS")]
    pub stagger_secs: Option<u64>,

    /// Write a configuration template to parallel_config.toml and exit.
    #[arg(long)]
    pub create_template: bool,
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Fully resolved batch settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrialSettings {
    pub file_type: String,
    pub timeout_secs: u64,
    pub size_limit_kb: u64,
    pub output_base: PathBuf,
    pub delete_previous: bool,
    pub trials_num: usize,
    pub max_parallel_trials: usize,
    pub stagger_secs: u64,
}

impl TrialSettings {
    /// Merge flags over config values; every setting must end up present.
    ///
    /// # Errors
    /// `RunError::MissingSetting` naming the first absent setting.
    pub fn resolve(config: &TrialsConfig, args: &TrialsArgs) -> Result<Self, RunError> {
        let file_type = args
            .file_type
            .clone()
            .or_else(|| config.file_type.clone())
            .filter(|t| !t.trim().is_empty())
            .ok_or(RunError::MissingSetting { name: "file_type" })?;
        let timeout_secs = args
            .timeout
            .or(config.timeout_secs)
            .ok_or(RunError::MissingSetting { name: "timeout_secs" })?;
        let size_limit_kb = args
            .file_size
            .or(config.size_limit_kb)
            .ok_or(RunError::MissingSetting { name: "size_limit_kb" })?;
        let trials_num = args
            .trials_num
            .or(config.trials_num)
            .ok_or(RunError::MissingSetting { name: "trials_num" })?;
        let max_parallel_trials = args
            .max_parallel_trials
            .or(config.max_parallel_trials)
            .filter(|n| *n > 0)
            .ok_or(RunError::MissingSetting {
                name: "max_parallel_trials",
            })?;

        Ok(Self {
            file_type,
            timeout_secs,
            size_limit_kb,
            output_base: args
                .output_base
                .clone()
                .unwrap_or_else(|| config.output_base.clone()),
            delete_previous: args.delete_previous || config.delete_previous,
            trials_num,
            max_parallel_trials,
            stagger_secs: args.stagger_secs.unwrap_or(config.stagger_secs),
        })
    }
}

/// Trial name of trial `id`: `trial-<id><output_base with '/' as '-'>`.
#[must_use]
pub fn trial_name(id: usize, output_base: &Path) -> String {
    format!(
        "trial-{id}{}",
        output_base.to_string_lossy().replace('/', "-")
    )
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of one trial process.
#[derive(Clone, Debug, Serialize)]
pub struct TrialResult {
    pub trial: usize,
    pub success: bool,
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub output_dir: PathBuf,
}

/// One batch, as written to the results file.
#[derive(Clone, Debug, Serialize)]
pub struct BatchResult {
    pub file_type: String,
    pub total_trials: usize,
    pub duration_sec: f64,
    pub results: Vec<TrialResult>,
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Process group ids of running trials, keyed by trial id.
type Registry = Arc<Mutex<BTreeMap<usize, u32>>>;

pub fn run(args: &TrialsArgs, config: &SeedConfig, config_path: &Path) -> Result<()> {
    if args.create_template {
        return create_template(Path::new(TEMPLATE_FILE));
    }

    let settings = TrialSettings::resolve(&config.trials, args)?;
    println!("Configuration:");
    println!("  File type: {}", settings.file_type);
    println!("  Timeout: {}", settings.timeout_secs);
    println!("  File size: {}", settings.size_limit_kb);
    println!("  Output base: {}", settings.output_base.display());
    println!("  Delete previous: {}", settings.delete_previous);
    println!("  Number of trials: {}", settings.trials_num);
    println!("  Max parallel trials: {}", settings.max_parallel_trials);

    if settings.delete_previous {
        clear_previous(&settings.output_base, true)?;
    }

    let exe = std::env::current_exe().context("Failed to locate the seedcorpus executable")?;
    let interrupted = interrupt_flag();
    let batch = run_batch(&exe, config_path, &settings, &interrupted);

    let path = write_results(Path::new(RESULTS_DIR), &batch)?;
    let failed = batch.results.iter().filter(|r| !r.success).count();
    println!(
        "{} of {} trials succeeded in {:.1} seconds. Results: {}",
        batch.results.len() - failed,
        batch.total_trials,
        batch.duration_sec,
        path.display()
    );
    Ok(())
}

fn run_batch(
    exe: &Path,
    config_path: &Path,
    settings: &TrialSettings,
    interrupted: &AtomicBool,
) -> BatchResult {
    info!(
        file_type = %settings.file_type,
        trials = settings.trials_num,
        parallel = settings.max_parallel_trials,
        "starting trial batch"
    );
    let start = Instant::now();
    let registry: Registry = Arc::default();
    let (tx, rx) = mpsc::channel::<TrialResult>();
    let mut results = Vec::with_capacity(settings.trials_num);
    let mut running = 0_usize;
    let mut forwarded = false;

    for id in 1..=settings.trials_num {
        while running >= settings.max_parallel_trials {
            if let Some(result) = next_result(&rx, &registry, interrupted, &mut forwarded) {
                running -= 1;
                report(&result);
                results.push(result);
            }
        }
        if interrupted.load(Ordering::SeqCst) {
            warn!(trial = id, "interrupted; not launching remaining trials");
            break;
        }

        let command = trial_command(exe, config_path, settings, id);
        let output_dir = settings.output_base.join(format!("trial_{id}"));
        let tx = tx.clone();
        let registry = Arc::clone(&registry);
        thread::spawn(move || {
            let result = run_trial(id, command, output_dir, &registry);
            // The receiver only goes away once the batch is over.
            let _ = tx.send(result);
        });
        running += 1;
        info!(trial = id, "trial started");

        if id < settings.trials_num {
            stagger(Duration::from_secs(settings.stagger_secs), interrupted);
        }
    }
    drop(tx);

    println!("Waiting for trials to finish...");
    while running > 0 {
        if let Some(result) = next_result(&rx, &registry, interrupted, &mut forwarded) {
            running -= 1;
            report(&result);
            results.push(result);
        }
    }

    BatchResult {
        file_type: settings.file_type.clone(),
        total_trials: settings.trials_num,
        duration_sec: start.elapsed().as_secs_f64(),
        results,
    }
}

/// Wait briefly for a finished trial, forwarding a pending interrupt once.
fn next_result(
    rx: &mpsc::Receiver<TrialResult>,
    registry: &Registry,
    interrupted: &AtomicBool,
    forwarded: &mut bool,
) -> Option<TrialResult> {
    if !*forwarded && interrupted.load(Ordering::SeqCst) {
        forward_interrupt(registry);
        *forwarded = true;
    }
    rx.recv_timeout(POLL).ok()
}

fn forward_interrupt(registry: &Registry) {
    let pgids: Vec<(usize, u32)> = match registry.lock() {
        Ok(map) => map.iter().map(|(id, pgid)| (*id, *pgid)).collect(),
        Err(poisoned) => poisoned
            .into_inner()
            .iter()
            .map(|(id, pgid)| (*id, *pgid))
            .collect(),
    };
    for (trial, pgid) in pgids {
        warn!(trial, pgid, "forwarding interrupt to trial");
        if let Err(e) = signal_group(pgid, "INT") {
            warn!(trial, pgid, error = %e, "could not signal trial");
        }
    }
}

fn stagger(pause: Duration, interrupted: &AtomicBool) {
    if pause.is_zero() {
        return;
    }
    info!(secs = pause.as_secs(), "pausing before next launch");
    let until = Instant::now() + pause;
    while Instant::now() < until && !interrupted.load(Ordering::SeqCst) {
        thread::sleep(POLL.min(until.saturating_duration_since(Instant::now())));
    }
}

fn report(result: &TrialResult) {
    if result.success {
        println!("Trial {} succeeded.", result.trial);
    } else {
        println!("Trial {} failed: {}", result.trial, result.stderr.trim_end());
    }
}

/// The `seedcorpus combine` invocation for trial `id`.
fn trial_command(exe: &Path, config_path: &Path, settings: &TrialSettings, id: usize) -> Command {
    let mut cmd = Command::new(exe);
    cmd.arg("--config").arg(config_path).arg("combine");
    if settings.delete_previous {
        cmd.arg("-d");
    }
    cmd.arg("-t")
        .arg(settings.timeout_secs.to_string())
        .arg("-s")
        .arg(settings.size_limit_kb.to_string())
        .arg("--trial-name")
        .arg(trial_name(id, &settings.output_base))
        .arg(settings.output_base.join(format!("trial_{id}")))
        .arg(&settings.file_type);
    cmd
}

fn run_trial(id: usize, mut command: Command, output_dir: PathBuf, registry: &Registry) -> TrialResult {
    let failed = |stderr: String| TrialResult {
        trial: id,
        success: false,
        return_code: -1,
        stdout: String::new(),
        stderr,
        output_dir: output_dir.clone(),
    };

    let child = match command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return failed(format!("failed to start trial: {e}")),
    };
    if let Ok(mut map) = registry.lock() {
        map.insert(id, child.id());
    }

    let output = child.wait_with_output();
    if let Ok(mut map) = registry.lock() {
        map.remove(&id);
    }

    match output {
        Ok(out) => TrialResult {
            trial: id,
            success: out.status.success(),
            return_code: out.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&out.stderr).into_owned(),
            output_dir: output_dir.clone(),
        },
        Err(e) => failed(format!("failed to wait for trial: {e}")),
    }
}

fn write_results(dir: &Path, batch: &BatchResult) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = dir.join(format!("corpus_results_{stamp}.json"));
    let json = serde_json::to_string_pretty(&[batch]).context("Failed to serialize results")?;
    std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn create_template(path: &Path) -> Result<()> {
    #[derive(Serialize)]
    struct Template {
        trials: TrialsConfig,
    }
    let text = toml::to_string_pretty(&Template {
        trials: TrialsConfig::template(),
    })
    .context("Failed to serialize template")?;
    std::fs::write(path, text).with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Configuration template created: {}", path.display());
    println!("Run it with: seedcorpus --config {} trials", path.display());
    Ok(())
}
