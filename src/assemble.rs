use std::collections::{BTreeMap, HashSet};

use camino::Utf8Path;
use serde::Serialize;

use crate::cache::CacheEntry;
use crate::config::RunConfig;
use crate::domain::{Accession, AccessionDescriptor, GroupKey, NormalizedTaxon, Rank};
use crate::error::KiraError;
use crate::flags::{FlagLog, Stage};
use crate::resolve::ResolvedRows;
use crate::store::WorkDir;

/// Bacterial chromosomes linked to prophage entries without provirus
/// boundaries.
pub const CONTAMINANTS: &[&str] = &["AE017196", "CP001391", "AM999887", "CP003884"];

const FASTA_WIDTH: usize = 80;

const GROUP_KEY: &str = "group_key";
const IDENTIFIERS: &str = "identifiers";
const HEADER: &str = "header";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssembledRecord {
    pub group_key: GroupKey,
    pub descriptors: Vec<AccessionDescriptor>,
    #[serde(skip)]
    pub sequence: String,
    pub length: u64,
    pub gc: f64,
    pub header: String,
    #[serde(skip)]
    pub taxon: NormalizedTaxon,
}

impl AssembledRecord {
    pub fn segment_count(&self) -> usize {
        self.descriptors.len()
    }
}

pub fn record_header(group_key: &GroupKey, segment_count: usize, length: u64) -> String {
    format!("sort_{group_key}_{segment_count}_{length}")
}

/// Fraction of G and C over the whole sequence, 0 when empty.
pub fn gc_fraction(sequence: &str) -> f64 {
    if sequence.is_empty() {
        return 0.0;
    }
    let gc = sequence
        .bytes()
        .filter(|base| matches!(base.to_ascii_uppercase(), b'G' | b'C'))
        .count();
    gc as f64 / sequence.len() as f64
}

pub struct RecordAssembler {
    min_genome_length: u64,
    contaminants: HashSet<String>,
}

impl RecordAssembler {
    pub fn new(config: &RunConfig) -> Self {
        let contaminants = CONTAMINANTS
            .iter()
            .map(|accession| accession.to_string())
            .chain(config.contaminants.iter().map(|accession| accession.trim().to_string()))
            .collect();
        Self {
            min_genome_length: config.min_genome_length,
            contaminants,
        }
    }

    pub fn is_contaminant(&self, accession: &Accession) -> bool {
        self.contaminants.contains(accession.as_str())
    }

    /// One record per taxon that has descriptors, in taxon order. Groups that
    /// fail a quality filter are flagged and skipped.
    pub fn assemble(
        &self,
        taxa: &[NormalizedTaxon],
        rows: &ResolvedRows,
        entries: &BTreeMap<Accession, CacheEntry>,
        flags: &mut FlagLog,
    ) -> Vec<AssembledRecord> {
        let records = taxa
            .iter()
            .filter_map(|taxon| {
                let descriptors = rows.get(&taxon.group_key)?;
                self.assemble_one(taxon, descriptors, entries, flags)
            })
            .collect::<Vec<_>>();
        tracing::info!(records = records.len(), "assembled records");
        records
    }

    fn assemble_one(
        &self,
        taxon: &NormalizedTaxon,
        descriptors: &[AccessionDescriptor],
        entries: &BTreeMap<Accession, CacheEntry>,
        flags: &mut FlagLog,
    ) -> Option<AssembledRecord> {
        let key = taxon.group_key.as_str();
        if let Some(descriptor) = descriptors
            .iter()
            .find(|descriptor| self.is_contaminant(&descriptor.accession))
        {
            flags.flag(
                Stage::Assemble,
                key,
                format!("{} is a known contaminant", descriptor.accession),
            );
            return None;
        }

        let mut kept = Vec::with_capacity(descriptors.len());
        let mut sequence = String::new();
        for descriptor in descriptors {
            let Some(entry) = entries.get(&descriptor.accession) else {
                flags.flag(
                    Stage::Assemble,
                    descriptor.to_string(),
                    "identifier not in cache; segment dropped",
                );
                continue;
            };
            let piece = match descriptor.range {
                Some(range) => match range.slice_bounds(entry.sequence.len()) {
                    Some(bounds) => &entry.sequence[bounds],
                    None => {
                        flags.flag(
                            Stage::Assemble,
                            descriptor.to_string(),
                            format!("range exceeds record length {}", entry.sequence.len()),
                        );
                        continue;
                    }
                },
                None => entry.sequence.as_str(),
            };
            sequence.push_str(piece);
            kept.push(descriptor.clone());
        }

        if kept.is_empty() {
            flags.flag(Stage::Assemble, key, "no sequence for any identifier");
            return None;
        }
        let length = sequence.len() as u64;
        if length <= self.min_genome_length {
            flags.flag(
                Stage::Assemble,
                key,
                format!("total length {length} not above {}", self.min_genome_length),
            );
            return None;
        }

        Some(AssembledRecord {
            group_key: taxon.group_key.clone(),
            header: record_header(&taxon.group_key, kept.len(), length),
            gc: gc_fraction(&sequence),
            descriptors: kept,
            sequence,
            length,
            taxon: taxon.clone(),
        })
    }
}

fn taxonomy_header() -> Vec<&'static str> {
    let mut header = vec![GROUP_KEY, IDENTIFIERS];
    header.extend(Rank::ALL.iter().map(|rank| rank.as_str()));
    header.extend([
        "virus_name",
        "host_source",
        "genome_composition",
        "segment_count",
        "length",
        "gc",
        HEADER,
        "sequence",
    ]);
    header
}

pub fn write_taxonomy(path: &Utf8Path, records: &[AssembledRecord]) -> Result<(), KiraError> {
    WorkDir::write_table_atomic(
        path,
        &taxonomy_header(),
        records.iter().map(|record| {
            let taxon = &record.taxon;
            let identifiers = record
                .descriptors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(";");
            let mut row = vec![record.group_key.to_string(), identifiers];
            row.extend(
                taxon
                    .lineage
                    .iter()
                    .map(|(_, name)| name.unwrap_or_default().to_string()),
            );
            row.extend([
                taxon.virus_name.clone().unwrap_or_default(),
                taxon.host_source.clone().unwrap_or_default(),
                taxon.genome_composition.clone().unwrap_or_default(),
                record.segment_count().to_string(),
                record.length.to_string(),
                format!("{:.4}", record.gc),
                record.header.clone(),
                record.sequence.clone(),
            ]);
            row
        }),
    )
}

pub fn write_fasta(path: &Utf8Path, records: &[AssembledRecord]) -> Result<(), KiraError> {
    let capacity = records
        .iter()
        .map(|record| record.header.len() + record.sequence.len() * 81 / 80 + 3)
        .sum();
    let mut out = String::with_capacity(capacity);
    for record in records {
        out.push('>');
        out.push_str(&record.header);
        out.push('\n');
        for line in record.sequence.as_bytes().chunks(FASTA_WIDTH) {
            out.push_str(&String::from_utf8_lossy(line));
            out.push('\n');
        }
    }
    WorkDir::write_bytes_atomic(path, out.as_bytes())
}

/// Header and genus of each row in a taxonomy table written by
/// [`write_taxonomy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomyRow {
    pub header: String,
    pub genus: Option<String>,
}

pub fn read_taxonomy(path: &Utf8Path) -> Result<Vec<TaxonomyRow>, KiraError> {
    let (columns, rows) = WorkDir::read_table(path)?;
    let position = |name: &str| {
        columns
            .iter()
            .position(|column| column == name)
            .ok_or_else(|| KiraError::Table {
                path: path.to_string(),
                message: format!("missing column {name}"),
            })
    };
    let header_idx = position(HEADER)?;
    let genus_idx = position(Rank::Genus.as_str())?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let header = row.get(header_idx)?.clone();
            let genus = row
                .get(genus_idx)
                .filter(|genus| !genus.is_empty())
                .cloned();
            Some(TaxonomyRow { header, genus })
        })
        .collect())
}
