mod common;

use kira_vmr::config::RunConfig;
use kira_vmr::domain::{AccessionShape, CoordinateRange, GroupKey, NormalizedTaxon, classify_shape};
use kira_vmr::flags::{FlagLog, Stage};
use kira_vmr::resolve::{AccessionResolver, validate_existence};

use common::{MockNcbi, accessions, test_config};

fn taxon(key: &str, field: &str) -> NormalizedTaxon {
    NormalizedTaxon {
        group_key: GroupKey::from(key),
        lineage: Default::default(),
        virus_name: None,
        isolate: None,
        genome_coverage: None,
        genome_composition: None,
        host_source: None,
        exemplar: None,
        identifier_field: field.to_string(),
    }
}

#[test]
fn documented_shapes_are_accepted() {
    let resolver = AccessionResolver::new(&RunConfig::default()).unwrap();
    for (token, shape) in [
        ("K01234", AccessionShape::Legacy),
        ("AB123456", AccessionShape::Intermediate),
        ("ABCD12345678", AccessionShape::Current),
    ] {
        assert_eq!(classify_shape(token), Some(shape));
        assert_eq!(resolver.resolve_token(token).unwrap().as_str(), token);
    }
    for token in [
        "AB12345",
        "A123456",
        "ABC123456",
        "ABCD1234567",
        "12345678",
        "AB123456X",
    ] {
        assert!(resolver.resolve_token(token).is_none(), "{token}");
    }
}

#[test]
fn semicolon_list_gives_plain_descriptors() {
    let resolver = AccessionResolver::new(&RunConfig::default()).unwrap();
    let resolution = resolver.resolve_field("AB123456;CD654321");
    assert_eq!(resolution.descriptors.len(), 2);
    assert_eq!(resolution.descriptors[0].accession.as_str(), "AB123456");
    assert_eq!(resolution.descriptors[1].accession.as_str(), "CD654321");
    assert!(
        resolution
            .descriptors
            .iter()
            .all(|d| d.partition.is_none() && d.range.is_none())
    );
}

#[test]
fn labelled_range_descriptor() {
    let resolver = AccessionResolver::new(&RunConfig::default()).unwrap();
    let resolution = resolver.resolve_field("seg1:AB123456(10.50)");
    assert_eq!(resolution.descriptors.len(), 1);
    let descriptor = &resolution.descriptors[0];
    assert_eq!(descriptor.accession.as_str(), "AB123456");
    assert_eq!(descriptor.partition.as_deref(), Some("seg1"));
    assert_eq!(descriptor.range, Some(CoordinateRange::new(10, 50).unwrap()));
    assert_eq!(descriptor.extracted_len(5000), 41);
    assert_eq!(descriptor.to_string(), "seg1:AB123456(10.50)");
}

#[test]
fn range_stays_with_its_token_across_separators() {
    let resolver = AccessionResolver::new(&RunConfig::default()).unwrap();

    let resolution = resolver.resolve_field("AB123456(10.50)-CD654321");
    assert!(resolution.unresolved.is_empty());
    assert_eq!(resolution.descriptors.len(), 2);
    assert_eq!(resolution.descriptors[0].accession.as_str(), "AB123456");
    assert_eq!(
        resolution.descriptors[0].range,
        Some(CoordinateRange::new(10, 50).unwrap())
    );
    assert_eq!(resolution.descriptors[1].accession.as_str(), "CD654321");
    assert_eq!(resolution.descriptors[1].range, None);

    let resolution = resolver.resolve_field("AB123456+CD654321(5.20)");
    assert_eq!(resolution.descriptors[0].range, None);
    assert_eq!(
        resolution.descriptors[1].range,
        Some(CoordinateRange::new(5, 20).unwrap())
    );
}

#[test]
fn configured_tables_extend_builtins() {
    let mut config = RunConfig::default();
    config
        .typo_corrections
        .insert("MZ0I2345".to_string(), "MZ012345".to_string());
    config.invalid_accessions.push("OK654321".to_string());
    let resolver = AccessionResolver::new(&config).unwrap();

    let resolution = resolver.resolve_field("MZ0I2345 OK654321 AF0O5485");
    let ids = resolution
        .descriptors
        .iter()
        .map(|d| d.accession.as_str())
        .collect::<Vec<_>>();
    assert_eq!(ids, vec!["MZ012345", "AF005485"]);
    assert_eq!(resolution.rejected.len(), 1);
}

#[test]
fn empty_rows_are_flagged_and_dropped() {
    let resolver = AccessionResolver::new(&RunConfig::default()).unwrap();
    let taxa = vec![
        taxon("1_1", "AB123456"),
        taxon("2_1", "pending"),
        taxon("3_1", "AB000000"),
        taxon("4_1", "ZZ99999999"),
    ];
    let mut flags = FlagLog::new();
    let rows = resolver.resolve_rows(&taxa, &mut flags);

    assert_eq!(rows.len(), 1);
    assert!(rows.get(&GroupKey::from("1_1")).is_some());
    assert!(flags.contains(Stage::Resolve, "2_1"));
    assert!(flags.contains(Stage::Resolve, "3_1"));
    assert!(flags.contains(Stage::Resolve, "AB000000"));
    assert!(flags.contains(Stage::Resolve, "ZZ99999999"));
}

#[test]
fn unconfirmed_accessions_are_flagged() {
    let ncbi = MockNcbi::with_sequences(&[("AB123456", 10), ("K01234", 10)]);
    let mut config = test_config();
    config.validation_batch_size = 2;
    let mut flags = FlagLog::new();

    let candidates = accessions(&["AB123456", "CD654321", "K01234"]);
    let confirmed = validate_existence(&ncbi, &candidates, &config, &mut flags);

    assert_eq!(confirmed.len(), 2);
    assert!(confirmed.contains(&candidates[0]));
    assert!(confirmed.contains(&candidates[2]));
    assert!(flags.contains(Stage::Validate, "CD654321"));
    assert_eq!(*ncbi.check_calls.lock().unwrap(), 2);
}

#[test]
fn retain_builds_new_rows() {
    let resolver = AccessionResolver::new(&RunConfig::default()).unwrap();
    let taxa = vec![
        taxon("1_1", "AB123456; CD654321"),
        taxon("2_1", "EF111111"),
    ];
    let mut flags = FlagLog::new();
    let rows = resolver.resolve_rows(&taxa, &mut flags);
    assert_eq!(rows.accessions().len(), 3);

    let kept = rows.retain_accessions(|a| a.as_str() != "EF111111", Stage::Fetch, &mut flags);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept.get(&GroupKey::from("1_1")).unwrap().len(), 2);
    assert!(flags.contains(Stage::Fetch, "2_1"));
}
