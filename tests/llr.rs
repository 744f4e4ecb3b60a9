mod common;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::AtomicBool;

use kira_vmr::features::FeatureMatrix;
use kira_vmr::llr::{LlrPrecomputer, Tier, background, classify, log_odds_absent, log_odds_present};
use kira_vmr::store::WorkDir;

use common::{temp_root, test_config};

/// Genus A: 3 members all carrying M1. Genus B: 3 members carrying only M2.
/// Genus C: 2 members carrying M1 and M2.
fn fixture() -> (FeatureMatrix, BTreeMap<String, String>) {
    let mut matrix = FeatureMatrix::default();
    let mut membership = BTreeMap::new();
    for idx in 1..=3 {
        let a = format!("sort_{idx}_1_1_5000");
        matrix.insert(&a, "M1");
        membership.insert(a, "Alphavirus".to_string());
        let b = format!("sort_{}_1_1_4000", idx + 10);
        matrix.insert(&b, "M2");
        membership.insert(b, "Betavirus".to_string());
    }
    for idx in 1..=2 {
        let c = format!("sort_{}_1_1_3000", idx + 20);
        matrix.insert(&c, "M1");
        matrix.insert(&c, "M2");
        membership.insert(c, "Gammavirus".to_string());
    }
    membership.insert("sort_99_1_1_2000".to_string(), "Alphavirus".to_string());
    (matrix, membership)
}

#[test]
fn single_strong_group_background() {
    let bg = background([1.0, 0.0, 0.0]);
    assert!(bg < 1.0);
    assert!((bg - 0.292_893).abs() < 1e-6);
    let present = log_odds_present(1.0, bg, 0.001);
    assert!(present > 1.0);
    assert!(log_odds_absent(1.0, bg, 0.001) < -5.0);
}

#[test]
fn equal_numerator_and_background_cancel() {
    for rate in [0.0, 0.25, 0.5, 1.0] {
        assert!(log_odds_present(rate, rate, 0.001).abs() < 1e-9);
        assert!(log_odds_absent(rate, rate, 0.001).abs() < 1e-9);
    }
}

#[test]
fn small_genera_get_no_model() {
    let (matrix, membership) = fixture();
    let config = test_config();
    let precomputer = LlrPrecomputer::new(&matrix, &membership, &config);
    let tasks = precomputer.tasks();
    let genera = tasks.iter().map(|t| t.genus.as_str()).collect::<Vec<_>>();
    assert_eq!(genera, vec!["Alphavirus", "Betavirus"]);
    for task in &tasks {
        assert_eq!(Tier::from_members(task.members.len()), Some(task.tier));
        assert_eq!(task.tier, Tier::Minimal);
    }
    // the header absent from the matrix does not count as a member
    assert_eq!(tasks[0].members.len(), 3);
}

#[test]
fn background_pools_every_genus() {
    let (matrix, membership) = fixture();
    let config = test_config();
    let precomputer = LlrPrecomputer::new(&matrix, &membership, &config);
    let backgrounds = precomputer.backgrounds();
    // M1: Alphavirus 1.0, Gammavirus 1.0 -> S = 4
    assert!((backgrounds[0] - 0.5).abs() < 1e-12);
    assert!((backgrounds[1] - 0.5).abs() < 1e-12);
}

#[test]
fn run_writes_models_and_classifies() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    let (matrix, membership) = fixture();
    let config = test_config();
    let cancel = AtomicBool::new(false);

    let outcome = LlrPrecomputer::new(&matrix, &membership, &config)
        .run(&workdir, config.workers, &cancel)
        .unwrap();
    assert_eq!(outcome.models.len(), 2);
    assert!(outcome.skipped.is_empty());
    assert_eq!(outcome.excluded.get("Gammavirus"), Some(&2));

    let alpha = &outcome.models[0];
    assert_eq!(alpha.genus, "Alphavirus");
    assert_eq!(alpha.markers, vec!["M1", "M2"]);
    assert!(alpha.present[0] > 0.0);
    assert!(alpha.present[1] < 0.0);

    let path = workdir.llr_model_path("minimal", "Alphavirus");
    let text = std::fs::read_to_string(path.as_std_path()).unwrap();
    assert!(text.starts_with("marker\tpresent\tabsent\n"));
    assert_eq!(text.lines().count(), 3);
    let summary = std::fs::read_to_string(workdir.llr_summary_path().as_std_path()).unwrap();
    assert!(summary.contains("Betavirus\tminimal\t3"));

    let query = BTreeSet::from(["M2".to_string()]);
    assert_eq!(classify(&outcome.models, &query).unwrap().genus, "Betavirus");
    let query = BTreeSet::from(["M1".to_string()]);
    assert_eq!(classify(&outcome.models, &query).unwrap().genus, "Alphavirus");
}

#[test]
fn cancelled_run_skips_unstarted_genera() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    let (matrix, membership) = fixture();
    let config = test_config();
    let cancel = AtomicBool::new(true);

    let outcome = LlrPrecomputer::new(&matrix, &membership, &config)
        .run(&workdir, 1, &cancel)
        .unwrap();
    assert!(outcome.models.is_empty());
    assert_eq!(outcome.skipped, vec!["Alphavirus", "Betavirus"]);
    assert!(!workdir.llr_model_path("minimal", "Alphavirus").as_std_path().exists());
}
