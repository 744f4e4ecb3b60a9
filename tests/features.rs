mod common;

use std::collections::HashSet;

use kira_vmr::features::{FeatureMatrix, FeatureMatrixBuilder};
use kira_vmr::flags::{FlagLog, Stage};
use kira_vmr::store::WorkDir;

use common::temp_root;

const MATCHES: &str = "\
sort_1_1_1_5000_1\tPF00910_1\t88.2\t310\n\
sort_1_1_1_5000_4\tPF00910_1\t75.0\t290\n\
sort_1_1_1_5000_2\tPF00680_3\t61.5\t402\n\
sort_2_1_1_4200_1\tPF00680_1\t90.0\t380\n\
sort_9_9_1_1000_1\tPF00910_1\t50.0\t100\n\
broken-line\n\
sort_2_1_1_4200_2\tnosuffix\t40.0\t80\n";

fn known() -> HashSet<String> {
    ["sort_1_1_1_5000", "sort_2_1_1_4200", "sort_3_1_1_3000"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[test]
fn pivot_dedupes_pairs_and_flags_bad_lines() {
    let known = known();
    let mut flags = FlagLog::new();
    let matrix = FeatureMatrixBuilder::new(&known)
        .build(MATCHES.as_bytes(), &mut flags)
        .unwrap();

    assert_eq!(matrix.len(), 2);
    assert_eq!(matrix.markers().collect::<Vec<_>>(), vec!["PF00680", "PF00910"]);
    assert!(matrix.is_present("sort_1_1_1_5000", "PF00910"));
    assert!(matrix.is_present("sort_1_1_1_5000", "PF00680"));
    assert!(matrix.is_present("sort_2_1_1_4200", "PF00680"));
    assert!(!matrix.is_present("sort_2_1_1_4200", "PF00910"));
    assert!(!matrix.contains_header("sort_3_1_1_3000"));

    assert_eq!(flags.len(), 3);
    assert!(flags.contains(Stage::FeatureMatrix, "line 5"));
    assert!(flags.contains(Stage::FeatureMatrix, "line 6"));
    assert!(flags.contains(Stage::FeatureMatrix, "line 7"));
}

#[test]
fn rows_are_subset_of_known_headers() {
    let known = known();
    let mut flags = FlagLog::new();
    let matrix = FeatureMatrixBuilder::new(&known)
        .build(MATCHES.as_bytes(), &mut flags)
        .unwrap();
    assert!(matrix.headers().all(|header| known.contains(header)));
}

#[test]
fn matrix_file_round_trip() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    let known = known();
    let mut flags = FlagLog::new();
    let matrix = FeatureMatrixBuilder::new(&known)
        .build(MATCHES.as_bytes(), &mut flags)
        .unwrap();

    matrix.write(&workdir.feature_matrix_path()).unwrap();
    let text = std::fs::read_to_string(workdir.feature_matrix_path().as_std_path()).unwrap();
    assert_eq!(text.lines().next(), Some("header\tPF00680\tPF00910"));
    assert!(text.contains("sort_2_1_1_4200\t1\t0"));

    let loaded = FeatureMatrix::read(&workdir.feature_matrix_path()).unwrap();
    assert_eq!(loaded, matrix);
}
