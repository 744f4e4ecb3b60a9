use std::io::Read;

use calamine::{Data, Reader, open_workbook_auto};
use camino::Utf8Path;

use crate::error::KiraError;

/// Untyped spreadsheet contents: trimmed header cells and string rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawSheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawSheet {
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        Self {
            headers: headers.iter().map(|h| clean_header(h)).collect(),
            rows,
        }
    }

    /// Parses delimited text whose first record is the header.
    pub fn from_delimited<R: Read>(reader: R, delimiter: u8) -> Result<Self, KiraError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .has_headers(false)
            .from_reader(reader);
        let mut records = reader.records();
        let headers = match records.next() {
            Some(record) => record
                .map_err(|err| KiraError::Spreadsheet(err.to_string()))?
                .iter()
                .map(str::to_string)
                .collect::<Vec<_>>(),
            None => return Err(KiraError::Spreadsheet("sheet is empty".to_string())),
        };
        let mut rows = Vec::new();
        for record in records {
            let record = record.map_err(|err| KiraError::Spreadsheet(err.to_string()))?;
            rows.push(record.iter().map(|cell| cell.trim().to_string()).collect());
        }
        Ok(Self::new(headers, rows))
    }
}

/// Reads the sheet whose name starts with `sheet_prefix` (case-insensitive)
/// from a workbook, or the whole file for `.csv`/`.tsv`.
pub fn read_sheet(path: &Utf8Path, sheet_prefix: &str) -> Result<RawSheet, KiraError> {
    match path.extension().map(str::to_ascii_lowercase).as_deref() {
        Some("csv") => read_delimited(path, b','),
        Some("tsv") | Some("txt") => read_delimited(path, b'\t'),
        _ => read_workbook(path, sheet_prefix),
    }
}

fn read_delimited(path: &Utf8Path, delimiter: u8) -> Result<RawSheet, KiraError> {
    let file = std::fs::File::open(path.as_std_path())
        .map_err(|err| KiraError::Spreadsheet(format!("open {path}: {err}")))?;
    RawSheet::from_delimited(file, delimiter)
}

fn read_workbook(path: &Utf8Path, sheet_prefix: &str) -> Result<RawSheet, KiraError> {
    let mut workbook = open_workbook_auto(path.as_std_path())
        .map_err(|err| KiraError::Spreadsheet(format!("open {path}: {err}")))?;
    let names = workbook.sheet_names();
    let name = select_sheet(&names, sheet_prefix)
        .ok_or_else(|| KiraError::Spreadsheet(format!("workbook {path} has no sheets")))?;
    tracing::info!(sheet = %name, "reading worksheet");
    let range = workbook
        .worksheet_range(&name)
        .map_err(|err| KiraError::Spreadsheet(format!("sheet {name}: {err}")))?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .ok_or_else(|| KiraError::Spreadsheet(format!("sheet {name} is empty")))?
        .iter()
        .map(cell_text)
        .collect::<Vec<_>>();
    let rows = rows
        .map(|row| row.iter().map(cell_text).collect::<Vec<_>>())
        .collect::<Vec<_>>();
    Ok(RawSheet::new(headers, rows))
}

pub fn select_sheet(names: &[String], prefix: &str) -> Option<String> {
    let prefix = prefix.to_ascii_lowercase();
    names
        .iter()
        .find(|name| name.to_ascii_lowercase().starts_with(&prefix))
        .or_else(|| names.first())
        .cloned()
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        other => other.to_string().trim().to_string(),
    }
}

fn clean_header(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
