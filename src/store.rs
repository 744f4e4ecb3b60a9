use std::fs;
use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tempfile::Builder;

use crate::error::KiraError;

/// Every artifact path below one working directory.
#[derive(Debug, Clone)]
pub struct WorkDir {
    root: Utf8PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn config_path(&self) -> Utf8PathBuf {
        self.root.join("kira-vmr.json")
    }

    /// Local copy of the source spreadsheet, keeping the source extension.
    pub fn sheet_path(&self, source_url: &str) -> Utf8PathBuf {
        let ext = source_url
            .rsplit('/')
            .next()
            .and_then(|name| name.rsplit_once('.'))
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| matches!(ext.as_str(), "xlsx" | "xls" | "ods" | "csv" | "tsv"))
            .unwrap_or_else(|| "xlsx".to_string());
        self.root.join(format!("source_sheet.{ext}"))
    }

    /// URL the local spreadsheet copy was downloaded from.
    pub fn sheet_source_path(&self) -> Utf8PathBuf {
        self.root.join("source_sheet.url")
    }

    /// True when the local spreadsheet exists and came from `source_url`.
    pub fn has_sheet_from(&self, source_url: &str) -> bool {
        if !self.sheet_path(source_url).as_std_path().is_file() {
            return false;
        }
        fs::read_to_string(self.sheet_source_path().as_std_path())
            .map(|recorded| recorded.trim() == source_url.trim())
            .unwrap_or(false)
    }

    pub fn cache_dir(&self) -> Utf8PathBuf {
        self.root.join("cache")
    }

    pub fn sequence_entry_path(&self, accession: &str) -> Utf8PathBuf {
        self.cache_dir()
            .join("sequences")
            .join(format!("{accession}.json"))
    }

    pub fn index_path(&self) -> Utf8PathBuf {
        self.cache_dir().join("index.tsv")
    }

    pub fn flagged_path(&self) -> Utf8PathBuf {
        self.root.join("flagged.tsv")
    }

    pub fn taxonomy_path(&self) -> Utf8PathBuf {
        self.root.join("taxonomy.tsv")
    }

    pub fn sequences_path(&self) -> Utf8PathBuf {
        self.root.join("sequences.fasta")
    }

    pub fn orfs_path(&self) -> Utf8PathBuf {
        self.root.join("orfs.faa")
    }

    pub fn default_markers_path(&self) -> Utf8PathBuf {
        self.root.join("markers.faa")
    }

    pub fn matches_path(&self) -> Utf8PathBuf {
        self.root.join("matches.m8")
    }

    pub fn tool_tmp_dir(&self) -> Utf8PathBuf {
        self.root.join("tmp")
    }

    pub fn feature_matrix_path(&self) -> Utf8PathBuf {
        self.root.join("feature_matrix.tsv")
    }

    pub fn llr_dir(&self) -> Utf8PathBuf {
        self.root.join("llr")
    }

    pub fn llr_model_path(&self, tier: &str, genus: &str) -> Utf8PathBuf {
        self.llr_dir().join(tier).join(format!("{genus}.tsv"))
    }

    pub fn llr_summary_path(&self) -> Utf8PathBuf {
        self.llr_dir().join("summary.tsv")
    }

    pub fn ensure(&self) -> Result<(), KiraError> {
        fs::create_dir_all(self.root.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {}: {err}", self.root)))?;
        fs::create_dir_all(self.cache_dir().join("sequences").as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))
    }

    /// Fails with `MissingArtifact` unless an upstream stage produced `path`.
    pub fn require(&self, path: &Utf8Path) -> Result<(), KiraError> {
        if !path.as_std_path().is_file() {
            return Err(KiraError::MissingArtifact(path.to_string()));
        }
        Ok(())
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), KiraError> {
        let parent = path
            .parent()
            .ok_or_else(|| KiraError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        let mut temp = Builder::new()
            .prefix("kira-vmr")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.write_all(content)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Ok(())
    }

    pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), KiraError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    /// Writes a tab-separated table with a header row, atomically.
    pub fn write_table_atomic(
        path: &Utf8Path,
        header: &[&str],
        rows: impl IntoIterator<Item = Vec<String>>,
    ) -> Result<(), KiraError> {
        let table_err = |err: csv::Error| KiraError::Table {
            path: path.to_string(),
            message: err.to_string(),
        };
        let mut writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(Vec::new());
        writer.write_record(header).map_err(table_err)?;
        for row in rows {
            writer.write_record(&row).map_err(table_err)?;
        }
        let content = writer
            .into_inner()
            .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    /// Reads a tab-separated table written by `write_table_atomic`.
    pub fn read_table(path: &Utf8Path) -> Result<(Vec<String>, Vec<Vec<String>>), KiraError> {
        let table_err = |err: csv::Error| KiraError::Table {
            path: path.to_string(),
            message: err.to_string(),
        };
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .flexible(true)
            .from_path(path.as_std_path())
            .map_err(table_err)?;
        let header = reader
            .headers()
            .map_err(table_err)?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(table_err)?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok((header, rows))
    }

    pub fn remove_dir_if_exists(path: &Utf8Path) -> Result<(), KiraError> {
        if path.as_std_path().exists() {
            fs::remove_dir_all(path.as_std_path())
                .map_err(|err| KiraError::Filesystem(err.to_string()))?;
        }
        Ok(())
    }
}
