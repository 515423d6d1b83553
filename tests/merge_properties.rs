//! Property tests for the merge invariants.
//!
//! Random source trees are built from a tiny content alphabet so duplicate
//! content across files and sources is common. For every generated input:
//!
//! - no two output files share content;
//! - every output file is within the size ceiling;
//! - the output never holds more than `max_files` files;
//! - the output holds exactly `min(max_files, distinct eligible contents)`;
//! - when the ordinary sources fit the budget, all their distinct eligible
//!   content is present.

mod common;

use std::collections::HashSet;

use proptest::prelude::*;
use seedcorpus::fingerprint::ContentFingerprint;
use seedcorpus::merge::{MergeLimits, SourceDirectory, merge_sources};
use seedcorpus::walker::SizeCeiling;
use tempfile::TempDir;

use common::{fingerprint_counts, sizes, write_file};

/// One generated file: content byte, length, and whether it sits in a
/// nested directory.
type FileSpec = (u8, usize, bool);

/// One generated source: deferred flag and its files.
type SourceSpec = (bool, Vec<FileSpec>);

fn content((byte, len, _): &FileSpec) -> Vec<u8> {
    vec![*byte; *len]
}

fn arb_source() -> impl Strategy<Value = SourceSpec> {
    (
        any::<bool>(),
        prop::collection::vec((0_u8..4, 0_usize..24, any::<bool>()), 0..8),
    )
}

/// Materialize `specs` under `root`; returns the merge inputs.
fn build(root: &TempDir, specs: &[SourceSpec]) -> Vec<SourceDirectory> {
    specs
        .iter()
        .enumerate()
        .map(|(i, (deferred, files))| {
            let dir = root.path().join(format!("src{i}"));
            std::fs::create_dir_all(&dir).unwrap();
            for (j, file) in files.iter().enumerate() {
                // Same file names in every source, to exercise collisions.
                let rel = if file.2 {
                    format!("nested/f{j}.bin")
                } else {
                    format!("f{j}.bin")
                };
                write_file(&dir, &rel, &content(file));
            }
            if *deferred {
                SourceDirectory::deferred(dir)
            } else {
                SourceDirectory::ordinary(dir)
            }
        })
        .collect()
}

fn eligible(specs: &[SourceSpec], ceiling: u64, deferred: Option<bool>) -> HashSet<ContentFingerprint> {
    specs
        .iter()
        .filter(|(d, _)| deferred.is_none_or(|want| *d == want))
        .flat_map(|(_, files)| files.iter())
        .filter(|f| f.1 as u64 <= ceiling)
        .map(|f| ContentFingerprint::of_bytes(&content(f)))
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_merge_invariants(
        specs in prop::collection::vec(arb_source(), 0..5),
        ceiling in 0_u64..24,
        max_files in 0_usize..12,
    ) {
        let root = TempDir::new().unwrap();
        let sources = build(&root, &specs);
        let output = root.path().join("out");
        let limits = MergeLimits {
            size_ceiling: SizeCeiling::from_bytes(ceiling),
            max_files,
        };

        let report = merge_sources(&sources, &output, limits).unwrap();
        let counts = fingerprint_counts(&output);
        let placed: usize = counts.values().sum();

        prop_assert!(counts.values().all(|&n| n == 1), "duplicate content in output");
        prop_assert!(sizes(&output).iter().all(|&s| s <= ceiling), "file over ceiling");
        prop_assert!(placed <= max_files);
        prop_assert_eq!(placed, report.total_added());

        let all = eligible(&specs, ceiling, None);
        prop_assert_eq!(placed, all.len().min(max_files));
        prop_assert!(counts.keys().all(|fp| all.contains(fp)));

        let ordinary = eligible(&specs, ceiling, Some(false));
        if ordinary.len() <= max_files {
            prop_assert!(ordinary.iter().all(|fp| counts.contains_key(fp)));
        }
    }

    #[test]
    fn prop_deferred_fill_is_smallest_first(
        lens in prop::collection::hash_set(1_usize..64, 1..16),
        max_files in 1_usize..8,
    ) {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("deferred");
        for (i, len) in lens.iter().enumerate() {
            // Distinct lengths give distinct content.
            write_file(&dir, &format!("d{i}.bin"), &vec![b'x'; *len]);
        }
        let output = root.path().join("out");
        let limits = MergeLimits {
            size_ceiling: SizeCeiling::from_kb(1),
            max_files,
        };

        merge_sources(&[SourceDirectory::deferred(dir)], &output, limits).unwrap();

        let mut expected: Vec<u64> = lens.iter().map(|l| *l as u64).collect();
        expected.sort_unstable();
        expected.truncate(max_files);
        prop_assert_eq!(sizes(&output), expected);
    }
}
