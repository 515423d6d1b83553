//! seedcorpus library crate.
//!
//! The primary interface is the `seedcorpus` binary. This lib.rs exposes the
//! merge engine, collector planning, and supervision so that integration
//! tests can exercise them directly without going through the CLI.

pub mod analysis;
pub mod collector;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod merge;
pub mod naming;
pub mod summary;
pub mod supervise;
pub mod walker;

// Private modules only used by the binary, not re-exported:
// analyze_cmd, combine_cmd, format, merge_cmd, telemetry, trials
