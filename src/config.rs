//! seedcorpus configuration (`seedcorpus.toml`).
//!
//! Defines run defaults for the `combine` command, optional overrides of the
//! collector table, and the settings for parallel trial batches. Every field
//! has a default; a missing file means all defaults.
//!
//! ```toml
//! [run]
//! timeout_secs = 600
//! size_limit_kb = 512
//! max_files = 10000
//!
//! [[collectors]]
//! name = "local_mirror"
//! command = "rsync -a mirror/{file_type}/ {dir}/"
//! role = "deferred"
//!
//! [trials]
//! file_type = "png"
//! trials_num = 4
//! max_parallel_trials = 2
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::collector::CollectorSpec;
use crate::supervise::CancellationPolicy;

/// Default config file name, looked up in the working directory.
pub const CONFIG_FILE: &str = "seedcorpus.toml";

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SeedConfig {
    /// Defaults for a single `combine` run.
    #[serde(default)]
    pub run: RunConfig,

    /// Replacement collector table. Empty means the built-in collectors.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub collectors: Vec<CollectorSpec>,

    /// Parallel trial batch settings.
    #[serde(default)]
    pub trials: TrialsConfig,
}

// ---------------------------------------------------------------------------
// RunConfig
// ---------------------------------------------------------------------------

/// Defaults for `seedcorpus combine`. Command-line flags win over these.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    /// Wall-clock limit for the collectors, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Per-file size ceiling for merge admission, in KiB.
    #[serde(default = "default_size_limit_kb")]
    pub size_limit_kb: u64,

    /// Maximum number of files in the output corpus.
    #[serde(default = "default_max_files")]
    pub max_files: usize,

    /// How often collector processes are polled, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Wait between SIGTERM and SIGKILL, in seconds.
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    /// Wait after SIGKILL before giving up on a process group, in seconds.
    #[serde(default = "default_kill_wait_secs")]
    pub kill_wait_secs: u64,

    /// Directory under which collector output directories are created.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,

    /// Directory under which per-run log directories are created.
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Interpreter substituted for `{python}` in collector commands.
    #[serde(default = "default_python")]
    pub python: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            size_limit_kb: default_size_limit_kb(),
            max_files: default_max_files(),
            poll_interval_ms: default_poll_interval_ms(),
            grace_secs: default_grace_secs(),
            kill_wait_secs: default_kill_wait_secs(),
            work_root: default_work_root(),
            logs_dir: default_logs_dir(),
            python: default_python(),
        }
    }
}

impl RunConfig {
    /// The termination policy described by this config.
    #[must_use]
    pub const fn cancellation_policy(&self) -> CancellationPolicy {
        CancellationPolicy {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            grace: Duration::from_secs(self.grace_secs),
            kill_wait: Duration::from_secs(self.kill_wait_secs),
        }
    }
}

const fn default_timeout_secs() -> u64 {
    3600
}

const fn default_size_limit_kb() -> u64 {
    1024
}

const fn default_max_files() -> usize {
    40_000
}

const fn default_poll_interval_ms() -> u64 {
    1000
}

const fn default_grace_secs() -> u64 {
    2
}

const fn default_kill_wait_secs() -> u64 {
    1
}

fn default_work_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_python() -> String {
    "python3".to_owned()
}

// ---------------------------------------------------------------------------
// TrialsConfig
// ---------------------------------------------------------------------------

/// Settings for `seedcorpus trials`.
///
/// Most fields are optional here because they may come from the command
/// line instead; the trials command rejects a batch with any of them unset.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct TrialsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit_kb: Option<u64>,

    #[serde(default = "default_output_base")]
    pub output_base: PathBuf,

    #[serde(default)]
    pub delete_previous: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trials_num: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel_trials: Option<usize>,

    /// Pause between trial launches, in seconds. Keeps the search-backed
    /// collectors under their providers' rate limits.
    #[serde(default = "default_stagger_secs")]
    pub stagger_secs: u64,
}

impl Default for TrialsConfig {
    fn default() -> Self {
        Self {
            file_type: None,
            timeout_secs: None,
            size_limit_kb: None,
            output_base: default_output_base(),
            delete_previous: false,
            trials_num: None,
            max_parallel_trials: None,
            stagger_secs: default_stagger_secs(),
        }
    }
}

impl TrialsConfig {
    /// A fully populated example, written by `trials --create-template`.
    #[must_use]
    pub fn template() -> Self {
        Self {
            file_type: Some("png".to_owned()),
            timeout_secs: Some(default_timeout_secs()),
            size_limit_kb: Some(default_size_limit_kb()),
            output_base: default_output_base(),
            delete_previous: true,
            trials_num: Some(10),
            max_parallel_trials: Some(10),
            stagger_secs: default_stagger_secs(),
        }
    }
}

fn default_output_base() -> PathBuf {
    PathBuf::from("corpus_output")
}

const fn default_stagger_secs() -> u64 {
    180
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

/// Error loading a configuration file.
#[derive(Debug)]
pub struct ConfigError {
    /// The path that was being loaded (if available).
    pub path: Option<PathBuf>,
    /// Human-readable message with line-level detail when possible.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(p) = &self.path {
            write!(f, "{}: {}", p.display(), self.message)
        } else {
            write!(f, "config error: {}", self.message)
        }
    }
}

impl std::error::Error for ConfigError {}

impl SeedConfig {
    /// Load configuration from a TOML file.
    ///
    /// A missing file yields all defaults.
    ///
    /// # Errors
    /// Returns `ConfigError` on I/O errors (other than not-found) or parse errors.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(ConfigError {
                    path: Some(path.to_owned()),
                    message: format!("could not read file: {e}"),
                });
            }
        };
        Self::parse(&contents).map_err(|mut e| {
            e.path = Some(path.to_owned());
            e
        })
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError` on invalid TOML or unknown fields.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        toml::from_str(toml_str).map_err(|e| {
            let mut message = e.message().to_owned();
            if let Some(span) = e.span() {
                let line = toml_str[..span.start]
                    .chars()
                    .filter(|&c| c == '\n')
                    .count()
                    + 1;
                message = format!("line {line}: {message}");
            }
            ConfigError {
                path: None,
                message,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::merge::SourceRole;

    #[test]
    fn defaults_all_fields() {
        let cfg = SeedConfig::default();
        assert_eq!(cfg.run.timeout_secs, 3600);
        assert_eq!(cfg.run.size_limit_kb, 1024);
        assert_eq!(cfg.run.max_files, 40_000);
        assert_eq!(cfg.run.poll_interval_ms, 1000);
        assert_eq!(cfg.run.work_root, PathBuf::from("."));
        assert_eq!(cfg.run.logs_dir, PathBuf::from("logs"));
        assert!(cfg.collectors.is_empty());
        assert_eq!(cfg.trials.output_base, PathBuf::from("corpus_output"));
        assert_eq!(cfg.trials.stagger_secs, 180);
        assert_eq!(cfg.trials.trials_num, None);
    }

    #[test]
    fn parse_empty_string() {
        assert_eq!(SeedConfig::parse("").unwrap(), SeedConfig::default());
    }

    #[test]
    fn parse_full_config() {
        let toml = r#"
[run]
timeout_secs = 60
size_limit_kb = 16
max_files = 100
grace_secs = 5
work_root = "/tmp/work"

[[collectors]]
name = "mirror"
command = "cp -r /srv/seeds/{file_type} {dir}"
role = "deferred"

[[collectors]]
name = "generator"
command = "gen --out {dir}"
keys = ["GEN_TOKEN"]
enabled = false

[trials]
file_type = "pdf"
trials_num = 3
max_parallel_trials = 2
stagger_secs = 0
"#;
        let cfg = SeedConfig::parse(toml).unwrap();
        assert_eq!(cfg.run.timeout_secs, 60);
        assert_eq!(cfg.run.size_limit_kb, 16);
        assert_eq!(cfg.run.max_files, 100);
        assert_eq!(cfg.run.work_root, PathBuf::from("/tmp/work"));
        assert_eq!(cfg.run.kill_wait_secs, 1);
        assert_eq!(cfg.collectors.len(), 2);
        assert_eq!(cfg.collectors[0].role, SourceRole::Deferred);
        assert!(cfg.collectors[0].enabled);
        assert_eq!(cfg.collectors[1].keys, vec!["GEN_TOKEN"]);
        assert!(!cfg.collectors[1].enabled);
        assert_eq!(cfg.trials.file_type.as_deref(), Some("pdf"));
        assert_eq!(cfg.trials.stagger_secs, 0);
    }

    #[test]
    fn cancellation_policy_from_run_config() {
        let cfg = SeedConfig::parse("[run]\npoll_interval_ms = 250\ngrace_secs = 4\n").unwrap();
        let policy = cfg.run.cancellation_policy();
        assert_eq!(policy.poll_interval, Duration::from_millis(250));
        assert_eq!(policy.grace, Duration::from_secs(4));
        assert_eq!(policy.kill_wait, Duration::from_secs(1));
    }

    #[test]
    fn parse_rejects_unknown_field() {
        let err = SeedConfig::parse("[run]\ntimeout = 5\n").unwrap_err();
        assert!(err.message.contains("unknown field"), "{}", err.message);
    }

    #[test]
    fn parse_includes_line_number_on_error() {
        let err = SeedConfig::parse("[run]\n\nmax_files = \"many\"\n").unwrap_err();
        assert!(err.message.contains("line 3"), "{}", err.message);
    }

    #[test]
    fn load_missing_file_returns_defaults() {
        let cfg = SeedConfig::load(Path::new("/nonexistent/seedcorpus.toml")).unwrap();
        assert_eq!(cfg, SeedConfig::default());
    }

    #[test]
    fn load_invalid_file_shows_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "not valid [[[toml").unwrap();
        let err = SeedConfig::load(&path).unwrap_err();
        assert_eq!(err.path.as_deref(), Some(path.as_path()));
        assert!(err.to_string().starts_with(&path.display().to_string()));
    }

    #[test]
    fn template_round_trips_through_toml() {
        #[derive(Serialize)]
        struct Wrapper {
            trials: TrialsConfig,
        }
        let text = toml::to_string(&Wrapper {
            trials: TrialsConfig::template(),
        })
        .unwrap();
        let cfg = SeedConfig::parse(&text).unwrap();
        assert_eq!(cfg.trials, TrialsConfig::template());
    }
}
