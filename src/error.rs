use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum KiraError {
    #[error("invalid accession: {0}")]
    InvalidAccession(String),

    #[error("invalid coordinate range: {0}")]
    InvalidRange(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid batch size {0}: must be between 1 and 100")]
    InvalidBatchSize(usize),

    #[error("NCBI request failed: {0}")]
    NcbiHttp(String),

    #[error("NCBI returned status {status}: {message}")]
    NcbiStatus { status: u16, message: String },

    #[error("spreadsheet download failed: {0}")]
    SheetDownload(String),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(String),

    #[error("normalization left no rows with a usable identifier field")]
    NoUsableRows,

    #[error("required artifact missing: {0} (run the upstream stage first)")]
    MissingArtifact(String),

    #[error("failed to parse GenBank record: {0}")]
    GenbankParse(String),

    #[error("failed to read table {path}: {message}")]
    Table { path: String, message: String },

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("required tool not found: {0}")]
    MissingTool(String),

    #[error("external tool failed: {0}")]
    ToolFailed(String),

    #[error("worker pool error: {0}")]
    WorkerPool(String),
}
