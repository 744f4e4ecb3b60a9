use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Read;

use camino::Utf8Path;

use crate::error::KiraError;
use crate::flags::{FlagLog, Stage};
use crate::store::WorkDir;

const HEADER_COLUMN: &str = "header";

/// Presence/absence of markers per assembled record header. Only headers
/// with at least one marker hit have a row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FeatureMatrix {
    rows: BTreeMap<String, BTreeSet<String>>,
    markers: BTreeSet<String>,
}

impl FeatureMatrix {
    pub fn insert(&mut self, header: &str, marker: &str) -> bool {
        self.markers.insert(marker.to_string());
        self.rows
            .entry(header.to_string())
            .or_default()
            .insert(marker.to_string())
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn markers(&self) -> impl Iterator<Item = &str> {
        self.markers.iter().map(String::as_str)
    }

    pub fn marker_count(&self) -> usize {
        self.markers.len()
    }

    pub fn contains_header(&self, header: &str) -> bool {
        self.rows.contains_key(header)
    }

    pub fn is_present(&self, header: &str, marker: &str) -> bool {
        self.rows
            .get(header)
            .is_some_and(|markers| markers.contains(marker))
    }

    /// Markers present for `header`.
    pub fn row(&self, header: &str) -> Option<&BTreeSet<String>> {
        self.rows.get(header)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        let mut columns = vec![HEADER_COLUMN];
        columns.extend(self.markers());
        WorkDir::write_table_atomic(
            path,
            &columns,
            self.rows.iter().map(|(header, present)| {
                let mut row = vec![header.clone()];
                row.extend(
                    self.markers
                        .iter()
                        .map(|marker| (if present.contains(marker) { "1" } else { "0" }).to_string()),
                );
                row
            }),
        )
    }

    pub fn read(path: &Utf8Path) -> Result<Self, KiraError> {
        let (columns, rows) = WorkDir::read_table(path)?;
        let Some((first, markers)) = columns.split_first() else {
            return Err(KiraError::Table {
                path: path.to_string(),
                message: "empty header".to_string(),
            });
        };
        if first != HEADER_COLUMN {
            return Err(KiraError::Table {
                path: path.to_string(),
                message: format!("first column is {first}, expected {HEADER_COLUMN}"),
            });
        }
        let mut matrix = Self {
            markers: markers.iter().cloned().collect(),
            ..Self::default()
        };
        for row in rows {
            let Some((header, cells)) = row.split_first() else {
                continue;
            };
            let entry = matrix.rows.entry(header.clone()).or_default();
            for (marker, cell) in markers.iter().zip(cells) {
                if cell == "1" {
                    entry.insert(marker.clone());
                }
            }
        }
        Ok(matrix)
    }
}

/// Recovers the part of a tool identifier before its positional suffix:
/// `sort_1_1_1_5000_3` -> `sort_1_1_1_5000`.
pub fn strip_suffix(id: &str) -> Option<&str> {
    let (base, suffix) = id.rsplit_once('_')?;
    (!base.is_empty() && !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()))
        .then_some(base)
}

/// Pivots a tab-separated match table (`query`, `target`, alignment columns)
/// into a [`FeatureMatrix`] restricted to `known_headers`.
pub struct FeatureMatrixBuilder<'a> {
    known_headers: &'a HashSet<String>,
}

impl<'a> FeatureMatrixBuilder<'a> {
    pub fn new(known_headers: &'a HashSet<String>) -> Self {
        Self { known_headers }
    }

    pub fn build<R: Read>(&self, reader: R, flags: &mut FlagLog) -> Result<FeatureMatrix, KiraError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);
        let mut matrix = FeatureMatrix::default();
        let mut pairs = 0usize;
        for (line, record) in reader.records().enumerate() {
            let record = record.map_err(|err| KiraError::Table {
                path: "match table".to_string(),
                message: err.to_string(),
            })?;
            let item = format!("line {}", line + 1);
            let (Some(query), Some(target)) = (record.get(0), record.get(1)) else {
                flags.flag(Stage::FeatureMatrix, item, "fewer than two columns");
                continue;
            };
            let (Some(header), Some(marker)) = (strip_suffix(query), strip_suffix(target)) else {
                flags.flag(
                    Stage::FeatureMatrix,
                    item,
                    format!("no positional suffix on {query} or {target}"),
                );
                continue;
            };
            if !self.known_headers.contains(header) {
                flags.flag(
                    Stage::FeatureMatrix,
                    item,
                    format!("{header} is not an assembled record"),
                );
                continue;
            }
            if matrix.insert(header, marker) {
                pairs += 1;
            }
        }
        tracing::info!(
            rows = matrix.len(),
            markers = matrix.marker_count(),
            pairs,
            "built feature matrix"
        );
        Ok(matrix)
    }
}
