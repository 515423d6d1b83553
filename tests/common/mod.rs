//! Shared test helpers for seedcorpus integration tests.
//!
//! All tests use temp directories; nothing touches the working tree.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use seedcorpus::fingerprint::{ContentFingerprint, fingerprint_file};
use tempfile::TempDir;

/// Write `content` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().expect("path has a parent"))
        .expect("failed to create parent directory");
    std::fs::write(&path, content).expect("failed to write file");
    path
}

/// A source directory under a temp root, filled with `files` (name, content).
pub fn source_tree(root: &TempDir, name: &str, files: &[(&str, Vec<u8>)]) -> PathBuf {
    let dir = root.path().join(name);
    std::fs::create_dir_all(&dir).expect("failed to create source dir");
    for (rel, content) in files {
        write_file(&dir, rel, content);
    }
    dir
}

/// `len` bytes of content unique to `tag`.
pub fn sized(tag: &str, len: usize) -> Vec<u8> {
    tag.bytes().chain(std::iter::repeat(b'.')).take(len).collect()
}

/// Every regular file in `dir` (recursively), with its size.
pub fn listing(dir: &Path) -> Vec<(PathBuf, u64)> {
    let mut out: Vec<(PathBuf, u64)> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let size = e.metadata().expect("metadata").len();
            (e.into_path(), size)
        })
        .collect();
    out.sort();
    out
}

/// Sorted file names of the files in `dir`.
pub fn names_in(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = listing(dir)
        .into_iter()
        .map(|(p, _)| p.file_name().expect("file name").to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Sorted sizes of the files in `dir`.
pub fn sizes(dir: &Path) -> Vec<u64> {
    let mut s: Vec<u64> = listing(dir).into_iter().map(|(_, size)| size).collect();
    s.sort_unstable();
    s
}

/// Count of files per fingerprint in `dir`.
pub fn fingerprint_counts(dir: &Path) -> HashMap<ContentFingerprint, usize> {
    let mut counts = HashMap::new();
    for (path, _) in listing(dir) {
        let fp = fingerprint_file(&path).expect("fingerprint");
        *counts.entry(fp).or_insert(0) += 1;
    }
    counts
}

/// Run the seedcorpus binary in `dir`.
pub fn seedcorpus_in(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_seedcorpus"))
        .args(args)
        .current_dir(dir)
        .env("SEEDCORPUS_LOG", "warn")
        .output()
        .expect("failed to execute seedcorpus")
}

/// Run seedcorpus and assert it succeeds. Returns stdout as string.
pub fn seedcorpus_ok(dir: &Path, args: &[&str]) -> String {
    let out = seedcorpus_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(
        out.status.success(),
        "seedcorpus {} failed:\nstdout: {stdout}\nstderr: {stderr}",
        args.join(" "),
    );
    stdout.to_string()
}

/// Run seedcorpus and assert it fails. Returns stderr as string.
pub fn seedcorpus_err(dir: &Path, args: &[&str]) -> String {
    let out = seedcorpus_in(dir, args);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(
        !out.status.success(),
        "seedcorpus {} should have failed but succeeded:\nstdout: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stdout),
    );
    stderr.to_string()
}
