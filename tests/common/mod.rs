#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};

use kira_vmr::config::RunConfig;
use kira_vmr::domain::Accession;
use kira_vmr::error::KiraError;
use kira_vmr::ncbi::NcbiClient;
use kira_vmr::tools::{MarkerSearch, ToolInfo};

/// NCBI-style flat-file text for one record.
pub fn genbank_record(accession: &str, sequence: &str) -> String {
    let mut text = format!(
        "LOCUS       {accession:<16}{:>12} bp    DNA     linear   VRL 15-JUN-2021\n",
        sequence.len()
    );
    text.push_str(&format!("DEFINITION  Test virus {accession}, complete genome.\n"));
    text.push_str(&format!("ACCESSION   {accession}\n"));
    text.push_str(&format!("VERSION     {accession}.1\n"));
    text.push_str("FEATURES             Location/Qualifiers\n");
    text.push_str(&format!("     source          1..{}\n", sequence.len()));
    text.push_str("                     /organism=\"Test virus\"\n");
    text.push_str("                     /host=\"Homo sapiens\"\n");
    text.push_str("                     /country=\"Japan\"\n");
    text.push_str("ORIGIN\n");
    let lower = sequence.to_ascii_lowercase();
    for (line_idx, line) in lower.as_bytes().chunks(60).enumerate() {
        let groups = line
            .chunks(10)
            .map(|group| String::from_utf8_lossy(group).into_owned())
            .collect::<Vec<_>>()
            .join(" ");
        text.push_str(&format!("{:>9} {}\n", line_idx * 60 + 1, groups));
    }
    text.push_str("//\n");
    text
}

/// Deterministic sequence of `len` bases.
pub fn sequence(len: usize) -> String {
    const PATTERN: &[u8] = b"ACGGTCATTGCA";
    (0..len)
        .map(|idx| PATTERN[idx % PATTERN.len()] as char)
        .collect()
}

pub fn test_config() -> RunConfig {
    RunConfig {
        pause: Duration::ZERO,
        workers: 2,
        ..RunConfig::default()
    }
}

pub fn temp_root(temp: &tempfile::TempDir) -> Utf8PathBuf {
    Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap()
}

pub fn accessions(values: &[&str]) -> Vec<Accession> {
    values.iter().map(|value| value.parse().unwrap()).collect()
}

/// In-memory authority. Accessions in `batch_omitted` are left out of
/// multi-accession responses but served on single requests; accessions in
/// `unretrievable` are never served.
#[derive(Default)]
pub struct MockNcbi {
    pub sequences: HashMap<String, String>,
    pub batch_omitted: HashSet<String>,
    pub unretrievable: HashSet<String>,
    pub sheet: String,
    pub fetch_calls: Mutex<Vec<Vec<String>>>,
    pub check_calls: Mutex<usize>,
    pub downloads: Mutex<usize>,
}

impl MockNcbi {
    pub fn with_sequences(entries: &[(&str, usize)]) -> Self {
        Self {
            sequences: entries
                .iter()
                .map(|(accession, len)| (accession.to_string(), sequence(*len)))
                .collect(),
            ..Self::default()
        }
    }

    pub fn fetch_call_count(&self) -> usize {
        self.fetch_calls.lock().unwrap().len()
    }

    pub fn fetched_ids(&self) -> Vec<String> {
        self.fetch_calls
            .lock()
            .unwrap()
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

impl NcbiClient for MockNcbi {
    fn check_accessions(&self, accessions: &[Accession]) -> Result<Vec<String>, KiraError> {
        *self.check_calls.lock().unwrap() += 1;
        Ok(accessions
            .iter()
            .filter(|accession| self.sequences.contains_key(accession.as_str()))
            .map(|accession| format!("{accession}.1"))
            .collect())
    }

    fn fetch_genbank(&self, accessions: &[Accession]) -> Result<String, KiraError> {
        self.fetch_calls
            .lock()
            .unwrap()
            .push(accessions.iter().map(|a| a.to_string()).collect());
        let batch = accessions.len() > 1;
        let mut blob = String::new();
        for accession in accessions {
            let id = accession.as_str();
            if self.unretrievable.contains(id) || (batch && self.batch_omitted.contains(id)) {
                continue;
            }
            if let Some(sequence) = self.sequences.get(id) {
                blob.push_str(&genbank_record(id, sequence));
            }
        }
        Ok(blob)
    }

    fn download(&self, _url: &str, destination: &Path) -> Result<(), KiraError> {
        *self.downloads.lock().unwrap() += 1;
        std::fs::write(destination, &self.sheet)
            .map_err(|err| KiraError::SheetDownload(err.to_string()))
    }
}

/// Writes a fixed match table instead of running external tools.
#[derive(Default)]
pub struct MockSearch {
    pub matches: String,
    pub calls: Mutex<usize>,
}

impl MarkerSearch for MockSearch {
    fn call_orfs(&self, _genomes: &Utf8Path, orfs: &Utf8Path) -> Result<(), KiraError> {
        *self.calls.lock().unwrap() += 1;
        std::fs::write(orfs.as_std_path(), ">orf\nM\n")
            .map_err(|err| KiraError::ToolFailed(err.to_string()))
    }

    fn search(
        &self,
        _orfs: &Utf8Path,
        _markers: &Utf8Path,
        matches: &Utf8Path,
        tmp_dir: &Utf8Path,
    ) -> Result<(), KiraError> {
        *self.calls.lock().unwrap() += 1;
        std::fs::write(tmp_dir.join("scratch").as_std_path(), b"tmp")
            .map_err(|err| KiraError::ToolFailed(err.to_string()))?;
        std::fs::write(matches.as_std_path(), &self.matches)
            .map_err(|err| KiraError::ToolFailed(err.to_string()))
    }

    fn tool_info(&self) -> ToolInfo {
        ToolInfo::default()
    }
}
