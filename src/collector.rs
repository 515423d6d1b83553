//! Collector table: which seed producers run, how, and where they write.
//!
//! A collector is an external command that fills one directory with
//! candidate seed files for a file type (web search, GitHub, Common Crawl,
//! bug trackers, ...). The merger treats them as black boxes; this module
//! only decides their command lines, output directories, log files, and
//! whether they are enabled.
//!
//! Command templates understand these placeholders:
//!
//! | placeholder   | replaced with                                   |
//! |---------------|-------------------------------------------------|
//! | `{python}`    | interpreter from `[run] python`                 |
//! | `{dir}`       | the collector's output directory                |
//! | `{file_type}` | the file type being collected                   |
//! | `{trial}`     | the trial name                                  |
//! | `{no_check}`  | `" -e"` when type checking is disabled, else "" |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::merge::{SourceDirectory, SourceRole};

// ---------------------------------------------------------------------------
// CollectorSpec
// ---------------------------------------------------------------------------

/// One entry of the collector table.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorSpec {
    /// Short identifier; also the first component of its output directory.
    pub name: String,

    /// Shell command template (see module docs for placeholders).
    pub command: String,

    /// Environment variables that must be set and non-empty for the
    /// collector to run.
    #[serde(default)]
    pub keys: Vec<String>,

    /// Merge role of the collector's output.
    #[serde(default)]
    pub role: SourceRole,

    /// Set to `false` to keep the collector out of runs entirely.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Treat the parent of the output directory (`<name>/<trial>`) as the
    /// unit that is checked and deleted between runs. For collectors that
    /// leave scratch directories next to their output.
    #[serde(default)]
    pub clear_parent: bool,
}

const fn default_enabled() -> bool {
    true
}

impl CollectorSpec {
    fn new(name: &str, command: &str, keys: &[&str]) -> Self {
        Self {
            name: name.to_owned(),
            command: command.to_owned(),
            keys: keys.iter().map(|k| (*k).to_owned()).collect(),
            role: SourceRole::Ordinary,
            enabled: true,
            clear_parent: false,
        }
    }
}

/// The built-in collectors, in merge order.
///
/// `github_queries` is deferred: repository clones are broad but noisy, so
/// they only fill whatever budget the other sources leave.
#[must_use]
pub fn builtin_collectors() -> Vec<CollectorSpec> {
    vec![
        CollectorSpec::new(
            "search_queries",
            "{python} -u -m search_queries.search_queries {dir} {file_type}{no_check}",
            &["OPENAI_API_KEY", "SERP_API_KEY"],
        ),
        CollectorSpec::new(
            "search_features",
            "{python} -u -m search_features.corpus_searcher {file_type} {dir}",
            &["OPENAI_API_KEY", "GOOGLE_API_KEY", "SEARCH_ENGINE_ID"],
        ),
        CollectorSpec {
            role: SourceRole::Deferred,
            ..CollectorSpec::new(
                "github_queries",
                "{python} -u -m github_queries.github_search.github_downloader {file_type} {dir} {trial}{no_check}",
                &["OPENAI_API_KEY", "GITHUB_API_KEY"],
            )
        },
        CollectorSpec::new(
            "common_crawl",
            "{python} -u common_crawl/scripts/extract_seed_files_cc/get_seeds_common_crawl.py --output {dir} {file_type}",
            &["AWS_ACCESS_KEY_ID", "AWS_SECRET_ACCESS_KEY", "AWS_REGION_NAME"],
        ),
        CollectorSpec {
            clear_parent: true,
            ..CollectorSpec::new(
                "bug_tracker",
                "{python} -u -m scripts.bug_trackers.bug_tracker_extraction --dir \"{dir}\" --type {file_type} --source both{no_check} \
                 && {python} -u -m scripts.check_file_types --dir \"{dir}\" --type {file_type}{no_check}",
                &["OPENAI_API_KEY"],
            )
        },
    ]
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Where and how collectors are instantiated for one run.
#[derive(Clone, Copy, Debug)]
pub struct PlanContext<'a> {
    pub work_root: &'a Path,
    pub logs_dir: &'a Path,
    pub trial: &'a str,
    pub python: &'a str,
    pub no_check: bool,
}

/// A collector instantiated for one file type in one run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectorPlan {
    /// `name`, or `name_<type>` when several file types are collected.
    pub name: String,
    pub file_type: String,
    /// Fully rendered shell command.
    pub command: String,
    pub dir: PathBuf,
    pub log: PathBuf,
    pub keys: Vec<String>,
    pub role: SourceRole,
    pub clear_parent: bool,
    pub enabled: bool,
}

impl CollectorPlan {
    /// The directory checked and deleted before the run.
    #[must_use]
    pub fn clear_unit(&self) -> &Path {
        if self.clear_parent {
            self.dir.parent().unwrap_or(&self.dir)
        } else {
            &self.dir
        }
    }
}

/// Split a comma-separated file type argument, dropping empty items.
#[must_use]
pub fn parse_file_types(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Instantiate `specs` for every file type.
///
/// Plans are grouped by file type, then in table order. With more than one
/// file type, names and log files carry a `_<type>` suffix.
#[must_use]
pub fn plan(specs: &[CollectorSpec], file_types: &[String], ctx: &PlanContext<'_>) -> Vec<CollectorPlan> {
    let multi = file_types.len() > 1;
    let mut plans = Vec::with_capacity(specs.len() * file_types.len());

    for file_type in file_types {
        for spec in specs {
            let name = if multi {
                format!("{}_{file_type}", spec.name)
            } else {
                spec.name.clone()
            };
            let dir = ctx
                .work_root
                .join(&spec.name)
                .join(ctx.trial)
                .join(format!("{file_type}_corpus"));
            let log = ctx.logs_dir.join(format!("{name}.log"));
            let command = render(&spec.command, &dir, file_type, ctx);

            plans.push(CollectorPlan {
                name,
                file_type: file_type.clone(),
                command,
                dir,
                log,
                keys: spec.keys.clone(),
                role: spec.role,
                clear_parent: spec.clear_parent,
                enabled: spec.enabled,
            });
        }
    }

    plans
}

fn render(template: &str, dir: &Path, file_type: &str, ctx: &PlanContext<'_>) -> String {
    template
        .replace("{python}", ctx.python)
        .replace("{dir}", &dir.display().to_string())
        .replace("{file_type}", file_type)
        .replace("{trial}", ctx.trial)
        .replace("{no_check}", if ctx.no_check { " -e" } else { "" })
}

/// Disable every plan with a required key that `lookup` reports missing or
/// empty.
pub fn check_keys<F>(plans: &mut [CollectorPlan], lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for plan in plans.iter_mut().filter(|p| p.enabled) {
        let missing = plan
            .keys
            .iter()
            .find(|key| lookup(key.as_str()).is_none_or(|v| v.is_empty()));
        if let Some(key) = missing {
            warn!(collector = %plan.name, key = %key, "required key not set; collector disabled");
            plan.enabled = false;
        } else {
            info!(collector = %plan.name, "all required keys present");
        }
    }
}

/// Merge inputs for a run: every planned directory, enabled or not, in plan
/// order. Directories of collectors that never ran are simply absent.
#[must_use]
pub fn source_directories(plans: &[CollectorPlan]) -> Vec<SourceDirectory> {
    plans
        .iter()
        .map(|p| SourceDirectory {
            path: p.dir.clone(),
            role: p.role,
        })
        .collect()
}
