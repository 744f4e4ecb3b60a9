mod common;

use kira_vmr::cache::{FetchCache, SideIndex};
use kira_vmr::domain::GroupKey;
use kira_vmr::flags::{FlagLog, Stage};
use kira_vmr::resolve::AccessionResolver;
use kira_vmr::store::WorkDir;

use common::{MockNcbi, accessions, temp_root, test_config};

#[test]
fn second_ensure_issues_no_fetch_calls() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    workdir.ensure().unwrap();
    let ncbi = MockNcbi::with_sequences(&[("AB123456", 1500), ("CD654321", 1200), ("K01234", 900)]);
    let config = test_config();
    let ids = accessions(&["AB123456", "CD654321", "K01234"]);

    let mut flags = FlagLog::new();
    let first = FetchCache::new(&workdir, &ncbi, &config)
        .ensure(&ids, &mut flags)
        .unwrap();
    assert_eq!(first.entries.len(), 3);
    assert_eq!(first.stats.fetched, 3);
    assert_eq!(ncbi.fetch_call_count(), 1);
    assert!(flags.is_empty());

    let second = FetchCache::new(&workdir, &ncbi, &config)
        .ensure(&ids, &mut flags)
        .unwrap();
    assert_eq!(ncbi.fetch_call_count(), 1);
    assert_eq!(second.stats.cached, 3);
    assert_eq!(second.stats.fetched, 0);
    assert_eq!(second.entries, first.entries);
}

#[test]
fn only_novel_accessions_are_requested() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    workdir.ensure().unwrap();
    let ncbi = MockNcbi::with_sequences(&[("AB123456", 1500), ("CD654321", 1200)]);
    let config = test_config();
    let mut flags = FlagLog::new();
    let cache = FetchCache::new(&workdir, &ncbi, &config);

    cache.ensure(&accessions(&["AB123456"]), &mut flags).unwrap();
    cache
        .ensure(&accessions(&["AB123456", "CD654321"]), &mut flags)
        .unwrap();
    assert_eq!(ncbi.fetched_ids(), vec!["AB123456", "CD654321"]);
}

#[test]
fn short_batch_falls_back_to_single_requests() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    workdir.ensure().unwrap();
    let mut ncbi =
        MockNcbi::with_sequences(&[("AB111111", 1500), ("AB222222", 1500), ("AB333333", 1500)]);
    ncbi.unretrievable.insert("AB333333".to_string());
    let config = test_config();
    let mut flags = FlagLog::new();

    let ensured = FetchCache::new(&workdir, &ncbi, &config)
        .ensure(&accessions(&["AB111111", "AB222222", "AB333333"]), &mut flags)
        .unwrap();

    assert_eq!(ensured.entries.len(), 2);
    assert_eq!(ensured.stats.fallback_batches, 1);
    assert_eq!(ensured.stats.single_calls, 3);
    assert_eq!(ensured.stats.failed, 1);
    assert!(flags.contains(Stage::Fetch, "AB333333"));
    assert!(!workdir.sequence_entry_path("AB333333").as_std_path().exists());
    // one batch call, then exactly one retry per accession
    assert_eq!(ncbi.fetch_call_count(), 4);
}

#[test]
fn batch_omission_recovered_by_single_request() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    workdir.ensure().unwrap();
    let mut ncbi = MockNcbi::with_sequences(&[("AB111111", 1500), ("AB222222", 1500)]);
    ncbi.batch_omitted.insert("AB222222".to_string());
    let config = test_config();
    let mut flags = FlagLog::new();

    let ensured = FetchCache::new(&workdir, &ncbi, &config)
        .ensure(&accessions(&["AB111111", "AB222222"]), &mut flags)
        .unwrap();
    assert_eq!(ensured.entries.len(), 2);
    assert!(flags.is_empty());
}

#[test]
fn missing_accessions_are_chunked_by_batch_size() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    workdir.ensure().unwrap();
    let ncbi = MockNcbi::with_sequences(&[("AB111111", 100), ("AB222222", 100), ("AB333333", 100)]);
    let mut config = test_config();
    config.batch_size = 2;
    let mut flags = FlagLog::new();

    let ensured = FetchCache::new(&workdir, &ncbi, &config)
        .ensure(&accessions(&["AB111111", "AB222222", "AB333333"]), &mut flags)
        .unwrap();
    assert_eq!(ensured.stats.batch_calls, 2);
    assert_eq!(ncbi.fetch_call_count(), 2);
}

#[test]
fn entry_keeps_sequence_and_provenance() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    workdir.ensure().unwrap();
    let ncbi = MockNcbi::with_sequences(&[("AB123456", 130)]);
    let config = test_config();
    let mut flags = FlagLog::new();
    let cache = FetchCache::new(&workdir, &ncbi, &config);

    let ids = accessions(&["AB123456"]);
    cache.ensure(&ids, &mut flags).unwrap();
    let entry = cache.load(&ids[0]).unwrap().unwrap();
    assert_eq!(entry.sequence, common::sequence(130));
    assert_eq!(entry.host.as_deref(), Some("Homo sapiens"));
    assert_eq!(entry.country.as_deref(), Some("Japan"));
    assert_eq!(entry.topology.as_deref(), Some("linear"));
}

#[test]
fn side_index_reloads() {
    let temp = tempfile::tempdir().unwrap();
    let workdir = WorkDir::new(temp_root(&temp));
    let resolver = AccessionResolver::new(&test_config()).unwrap();
    let taxa = vec![kira_vmr::domain::NormalizedTaxon {
        group_key: GroupKey::from("4_1"),
        lineage: Default::default(),
        virus_name: None,
        isolate: None,
        genome_coverage: None,
        genome_composition: None,
        host_source: None,
        exemplar: None,
        identifier_field: "seg1:AB123456(10.50); seg2:CD654321".to_string(),
    }];
    let mut flags = FlagLog::new();
    let rows = resolver.resolve_rows(&taxa, &mut flags);

    let index = SideIndex::from_rows(&rows);
    index.write(&workdir.index_path()).unwrap();
    let loaded = SideIndex::load(&workdir.index_path()).unwrap();
    assert_eq!(loaded, index);
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded.entries()[0].partition.as_deref(), Some("seg1"));
    assert!(loaded.entries()[1].range.is_none());

    assert!(SideIndex::load(&workdir.root().join("absent.tsv")).unwrap().is_empty());
}
