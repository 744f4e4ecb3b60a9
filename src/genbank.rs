use std::collections::HashSet;

use gb_io::reader::SeqReader;
use gb_io::seq::{Seq, Topology};

use crate::error::KiraError;

/// First keyword of every record in a GenBank flat-file blob.
pub const RECORD_START: &str = "LOCUS";

/// Fields kept from one parsed flat-file record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenbankRecord {
    /// Names the record answers to: versioned accession prefix, primary
    /// accession, and LOCUS name.
    pub ids: Vec<String>,
    pub sequence: String,
    pub molecule_type: Option<String>,
    pub topology: Option<String>,
    pub date: Option<String>,
    pub host: Option<String>,
    pub country: Option<String>,
}

/// Number of distinct records announced by `LOCUS` lines in `blob`.
pub fn count_record_starts(blob: &str) -> usize {
    blob.lines()
        .filter(|line| line.starts_with(RECORD_START))
        .map(|line| line.split_whitespace().nth(1).unwrap_or_default())
        .collect::<HashSet<_>>()
        .len()
}

/// Splits a blob into per-record chunks at each `LOCUS` line. Text before the
/// first marker is dropped; a truncated trailing record is still returned.
pub fn split_records(blob: &str) -> Vec<String> {
    let mut records = Vec::new();
    let mut current: Option<String> = None;
    for line in blob.lines() {
        if line.starts_with(RECORD_START) {
            if let Some(done) = current.take() {
                records.push(done);
            }
            current = Some(String::new());
        }
        if let Some(text) = current.as_mut() {
            text.push_str(line);
            text.push('\n');
        }
    }
    records.extend(current);
    records
}

pub fn parse_record(text: &str) -> Result<GenbankRecord, KiraError> {
    let seq = SeqReader::new(text.as_bytes())
        .next()
        .ok_or_else(|| KiraError::GenbankParse("no record found".to_string()))?
        .map_err(|err| KiraError::GenbankParse(err.to_string()))?;
    Ok(record_from_seq(&seq))
}

fn record_from_seq(seq: &Seq) -> GenbankRecord {
    let mut ids = Vec::new();
    let versioned = seq
        .version
        .as_deref()
        .map(|version| version.split_once('.').map(|(acc, _)| acc).unwrap_or(version));
    let primary = seq
        .accession
        .as_deref()
        .and_then(|accession| accession.split_whitespace().next());
    for id in [versioned, primary, seq.name.as_deref()].into_iter().flatten() {
        let id = id.trim().to_string();
        if !id.is_empty() && !ids.contains(&id) {
            ids.push(id);
        }
    }

    let topology = match seq.topology {
        Topology::Linear => "linear",
        Topology::Circular => "circular",
    };

    GenbankRecord {
        ids,
        sequence: String::from_utf8_lossy(&seq.seq).to_ascii_uppercase(),
        molecule_type: seq.molecule_type.clone(),
        topology: Some(topology.to_string()),
        date: seq.date.as_ref().map(|date| date.to_string()),
        host: first_qualifier(seq, &["host", "lab_host"]),
        country: first_qualifier(seq, &["country", "geo_loc_name"]),
    }
}

fn first_qualifier(seq: &Seq, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| {
        seq.features.iter().find_map(|feature| {
            feature
                .qualifier_values((*key).into())
                .next()
                .map(|value| value.trim().to_string())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = "\
LOCUS       AB123456                  20 bp    DNA     circular VRL 15-JUN-2021
DEFINITION  Test virus DNA, complete genome.
ACCESSION   AB123456
VERSION     AB123456.1
FEATURES             Location/Qualifiers
     source          1..20
                     /organism=\"Test virus\"
                     /mol_type=\"genomic DNA\"
                     /lab_host=\"Vero cells\"
                     /country=\"Japan\"
ORIGIN
        1 acgtacgtac ggccggccaa
//
";

    #[test]
    fn split_and_count_markers() {
        let blob = format!("preamble\n{RECORD}{}", RECORD.replace("AB123456", "CD654321"));
        assert_eq!(count_record_starts(&blob), 2);
        let records = split_records(&blob);
        assert_eq!(records.len(), 2);
        assert!(records[1].starts_with("LOCUS       CD654321"));
    }

    #[test]
    fn repeated_locus_counts_once() {
        let blob = format!("{RECORD}{RECORD}");
        assert_eq!(count_record_starts(&blob), 1);
    }

    #[test]
    fn parse_record_fields() {
        let record = parse_record(RECORD).unwrap();
        assert_eq!(record.ids[0], "AB123456");
        assert_eq!(record.sequence, "ACGTACGTACGGCCGGCCAA");
        assert_eq!(record.topology.as_deref(), Some("circular"));
        assert_eq!(record.host.as_deref(), Some("Vero cells"));
        assert_eq!(record.country.as_deref(), Some("Japan"));
        assert_eq!(record.molecule_type.as_deref(), Some("DNA"));
    }

    #[test]
    fn empty_blob_has_no_records() {
        assert!(split_records("Error: ID list is empty\n").is_empty());
        assert_eq!(count_record_starts(""), 0);
    }
}
