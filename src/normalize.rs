use std::collections::{HashMap, HashSet};

use indexmap::IndexMap;

use crate::domain::{GroupKey, Lineage, NormalizedTaxon, Rank};
use crate::error::KiraError;
use crate::flags::{FlagLog, Stage};
use crate::sheet::RawSheet;

pub const SORT: &str = "sort";
pub const ISOLATE_SORT: &str = "isolate_sort";
pub const IDENTIFIERS: &str = "identifiers";
pub const VIRUS_NAME: &str = "virus_name";
pub const ISOLATE: &str = "isolate";
pub const GENOME_COVERAGE: &str = "genome_coverage";
pub const GENOME_COMPOSITION: &str = "genome_composition";
pub const HOST_SOURCE: &str = "host_source";
pub const EXEMPLAR: &str = "exemplar";

/// Historical column names and the canonical field each one feeds, in
/// priority order: when several aliases of one field are present, the last
/// listed wins. Matching ignores ASCII case and repeated whitespace.
pub const COLUMN_ALIASES: &[(&str, &str)] = &[
    ("Species Sort", SORT),
    ("Sort", SORT),
    ("Isolate ID", ISOLATE_SORT),
    ("Isolate Sort", ISOLATE_SORT),
    ("Realm", "realm"),
    ("Subrealm", "subrealm"),
    ("Kingdom", "kingdom"),
    ("Subkingdom", "subkingdom"),
    ("Phylum", "phylum"),
    ("Subphylum", "subphylum"),
    ("Class", "class"),
    ("Subclass", "subclass"),
    ("Order", "order"),
    ("Suborder", "suborder"),
    ("Family", "family"),
    ("Subfamily", "subfamily"),
    ("Genus", "genus"),
    ("Subgenus", "subgenus"),
    ("Species", "species"),
    ("Virus names", VIRUS_NAME),
    ("Virus name", VIRUS_NAME),
    ("Virus name(s)", VIRUS_NAME),
    ("Isolate designation", ISOLATE),
    ("Virus isolate designation", ISOLATE),
    ("GenBank Accession", IDENTIFIERS),
    ("Virus GenBank accession", IDENTIFIERS),
    ("Virus GENBANK accession", IDENTIFIERS),
    ("Genome", GENOME_COVERAGE),
    ("Genome coverage", GENOME_COVERAGE),
    ("Genome Composition", GENOME_COMPOSITION),
    ("Genome composition", GENOME_COMPOSITION),
    ("Host", HOST_SOURCE),
    ("Host source", HOST_SOURCE),
    ("Host Source", HOST_SOURCE),
    ("Exemplar", EXEMPLAR),
    ("Exemplar or additional isolate", EXEMPLAR),
];

#[derive(Debug, Clone)]
pub struct NormalizeOutcome {
    pub taxa: Vec<NormalizedTaxon>,
    pub synthesized_sort: bool,
    pub reset_fallback: bool,
}

/// Canonical field name -> column index for one sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnMap(HashMap<&'static str, usize>);

impl ColumnMap {
    pub fn resolve(headers: &[String], aliases: &[(&str, &'static str)]) -> Self {
        let normalized = headers
            .iter()
            .map(|header| normalize_header(header))
            .collect::<Vec<_>>();
        let mut columns = HashMap::new();
        for (alias, canonical) in aliases {
            let alias = normalize_header(alias);
            if let Some(index) = normalized.iter().position(|header| *header == alias) {
                columns.insert(*canonical, index);
            }
        }
        Self(columns)
    }

    pub fn get(&self, canonical: &str) -> Option<usize> {
        self.0.get(canonical).copied()
    }
}

pub fn normalize(sheet: &RawSheet, flags: &mut FlagLog) -> Result<NormalizeOutcome, KiraError> {
    let columns = ColumnMap::resolve(&sheet.headers, COLUMN_ALIASES);
    let rows = sheet
        .rows
        .iter()
        .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
        .collect::<Vec<_>>();

    let field = |row: &[String], canonical: &str| -> Option<String> {
        columns
            .get(canonical)
            .and_then(|index| row.get(index))
            .map(|cell| cell.trim())
            .filter(|cell| !cell.is_empty())
            .map(str::to_string)
    };

    let sort_cells = rows
        .iter()
        .map(|row| field(row, SORT))
        .collect::<Vec<_>>();
    let synthesized_sort = !sort_cells
        .iter()
        .any(|cell| cell.as_deref().and_then(parse_ordinal).is_some());
    let sorts = if synthesized_sort {
        tracing::info!("group column missing or non-numeric; synthesizing running ordinal");
        (1..=rows.len()).map(|n| n.to_string()).collect::<Vec<_>>()
    } else {
        sort_cells
            .iter()
            .map(|cell| ordinal_text(cell.as_deref()))
            .collect()
    };

    let isolates = rows
        .iter()
        .map(|row| {
            let cell = field(row, ISOLATE_SORT);
            let ordinal = cell.as_deref().and_then(parse_ordinal).unwrap_or(1);
            (ordinal, ordinal.to_string())
        })
        .collect::<Vec<_>>();

    let mut keys = sorts
        .iter()
        .zip(&isolates)
        .map(|(sort, (_, isolate))| GroupKey::new(sort, isolate))
        .collect::<Vec<_>>();
    let reset_fallback = has_duplicates(&keys);
    if reset_fallback {
        tracing::info!("composite keys collide; numbering species by isolate resets");
        keys = reset_counter_keys(isolates.iter().map(|(ordinal, _)| *ordinal));
    }

    let mut unique: IndexMap<GroupKey, &Vec<String>> = IndexMap::new();
    for (key, row) in keys.into_iter().zip(&rows) {
        if unique.contains_key(&key) {
            flags.flag(Stage::Normalize, key.as_str(), "duplicate group key; keeping first row");
            continue;
        }
        unique.insert(key, *row);
    }

    let mut taxa = Vec::with_capacity(unique.len());
    for (group_key, row) in unique {
        let Some(identifier_field) = field(row, IDENTIFIERS) else {
            flags.flag(Stage::Normalize, group_key.as_str(), "no identifier field");
            continue;
        };
        let mut lineage = Lineage::default();
        for rank in Rank::ALL {
            lineage.set(rank, field(row, rank.as_str()));
        }
        taxa.push(NormalizedTaxon {
            group_key,
            lineage,
            virus_name: field(row, VIRUS_NAME),
            isolate: field(row, ISOLATE),
            genome_coverage: field(row, GENOME_COVERAGE),
            genome_composition: field(row, GENOME_COMPOSITION),
            host_source: field(row, HOST_SOURCE),
            exemplar: field(row, EXEMPLAR),
            identifier_field,
        });
    }

    if taxa.is_empty() {
        return Err(KiraError::NoUsableRows);
    }
    tracing::info!(rows = taxa.len(), "normalized spreadsheet rows");
    Ok(NormalizeOutcome {
        taxa,
        synthesized_sort,
        reset_fallback,
    })
}

/// Numbers species by counting isolate-ordinal resets to 1, keeping each
/// row's isolate ordinal as the second key component.
pub fn reset_counter_keys(ordinals: impl IntoIterator<Item = u64>) -> Vec<GroupKey> {
    let mut species = 0u64;
    ordinals
        .into_iter()
        .map(|ordinal| {
            if ordinal == 1 || species == 0 {
                species += 1;
            }
            GroupKey::new(&species.to_string(), &ordinal.to_string())
        })
        .collect()
}

fn has_duplicates(keys: &[GroupKey]) -> bool {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().any(|key| !seen.insert(key))
}

/// Integer value of a cell holding `12` or `12.0`.
fn parse_ordinal(cell: &str) -> Option<u64> {
    let value = cell.trim().parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0 && value.fract() == 0.0).then_some(value as u64)
}

fn ordinal_text(cell: Option<&str>) -> String {
    match cell {
        Some(text) => parse_ordinal(text)
            .map(|n| n.to_string())
            .unwrap_or_else(|| text.replace(char::is_whitespace, "")),
        None => "0".to_string(),
    }
}

fn normalize_header(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}
