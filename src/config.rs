use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const DEFAULT_SOURCE_URL: &str =
    "https://ictv.global/sites/default/files/VMR/VMR_MSL_latest.xlsx";
pub const DEFAULT_SHEET_PREFIX: &str = "VMR";
pub const DEFAULT_FETCH_BATCH_SIZE: usize = 100;
pub const DEFAULT_VALIDATION_BATCH_SIZE: usize = 500;
pub const DEFAULT_PAUSE_MS: u64 = 350;
pub const DEFAULT_MIN_GENOME_LENGTH: u64 = 1000;
pub const DEFAULT_MIN_RECORD_LENGTH: usize = 1;
pub const DEFAULT_EPSILON: f64 = 0.001;
pub const DEFAULT_MIN_GROUP_SIZE: usize = 3;
pub const MAX_FETCH_BATCH_SIZE: usize = 100;

/// On-disk shape of `kira-vmr.json`. Every field is optional.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub sheet_prefix: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub validation_batch_size: Option<usize>,
    #[serde(default)]
    pub pause_ms: Option<u64>,
    #[serde(default)]
    pub min_genome_length: Option<u64>,
    #[serde(default)]
    pub epsilon: Option<f64>,
    #[serde(default)]
    pub min_group_size: Option<usize>,
    #[serde(default)]
    pub workers: Option<usize>,
    #[serde(default)]
    pub cleanup: Option<bool>,
    #[serde(default)]
    pub markers_path: Option<String>,
    #[serde(default)]
    pub typo_corrections: BTreeMap<String, String>,
    #[serde(default)]
    pub invalid_accessions: Vec<String>,
    #[serde(default)]
    pub contaminants: Vec<String>,
}

/// Command-line values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub source_url: Option<String>,
    pub batch_size: Option<usize>,
    pub workers: Option<usize>,
    pub cleanup: bool,
}

/// Immutable run tunables threaded through every stage.
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub source_url: String,
    pub sheet_prefix: String,
    pub batch_size: usize,
    pub validation_batch_size: usize,
    pub pause: Duration,
    pub min_genome_length: u64,
    pub min_record_length: usize,
    pub epsilon: f64,
    pub min_group_size: usize,
    pub workers: usize,
    pub cleanup: bool,
    pub markers_path: Option<String>,
    pub typo_corrections: BTreeMap<String, String>,
    pub invalid_accessions: Vec<String>,
    pub contaminants: Vec<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            source_url: DEFAULT_SOURCE_URL.to_string(),
            sheet_prefix: DEFAULT_SHEET_PREFIX.to_string(),
            batch_size: DEFAULT_FETCH_BATCH_SIZE,
            validation_batch_size: DEFAULT_VALIDATION_BATCH_SIZE,
            pause: Duration::from_millis(DEFAULT_PAUSE_MS),
            min_genome_length: DEFAULT_MIN_GENOME_LENGTH,
            min_record_length: DEFAULT_MIN_RECORD_LENGTH,
            epsilon: DEFAULT_EPSILON,
            min_group_size: DEFAULT_MIN_GROUP_SIZE,
            workers: default_workers(),
            cleanup: false,
            markers_path: None,
            typo_corrections: BTreeMap::new(),
            invalid_accessions: Vec::new(),
            contaminants: Vec::new(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads `path` if given, else `kira-vmr.json` inside the working
    /// directory when present, else defaults; then applies `overrides`.
    pub fn resolve(
        path: Option<&str>,
        workdir_config: PathBuf,
        overrides: ConfigOverrides,
    ) -> Result<RunConfig, KiraError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => workdir_config.exists().then_some(workdir_config),
        };

        let file = match config_path {
            Some(config_path) => {
                let content = fs::read_to_string(&config_path)
                    .map_err(|_| KiraError::ConfigRead(config_path.clone()))?;
                serde_json::from_str(&content)
                    .map_err(|err| KiraError::ConfigParse(err.to_string()))?
            }
            None => ConfigFile::default(),
        };

        Self::resolve_config(file, overrides)
    }

    pub fn resolve_config(
        file: ConfigFile,
        overrides: ConfigOverrides,
    ) -> Result<RunConfig, KiraError> {
        let defaults = RunConfig::default();
        let batch_size = overrides
            .batch_size
            .or(file.batch_size)
            .unwrap_or(defaults.batch_size);
        validate_batch_size(batch_size)?;

        Ok(RunConfig {
            source_url: overrides
                .source_url
                .or(file.source_url)
                .unwrap_or(defaults.source_url),
            sheet_prefix: file.sheet_prefix.unwrap_or(defaults.sheet_prefix),
            batch_size,
            validation_batch_size: file
                .validation_batch_size
                .unwrap_or(defaults.validation_batch_size)
                .max(1),
            pause: file
                .pause_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.pause),
            min_genome_length: file.min_genome_length.unwrap_or(defaults.min_genome_length),
            min_record_length: defaults.min_record_length,
            epsilon: file.epsilon.unwrap_or(defaults.epsilon),
            min_group_size: file.min_group_size.unwrap_or(defaults.min_group_size),
            workers: overrides
                .workers
                .or(file.workers)
                .unwrap_or(defaults.workers)
                .max(1),
            cleanup: overrides.cleanup || file.cleanup.unwrap_or(false),
            markers_path: file.markers_path,
            typo_corrections: file.typo_corrections,
            invalid_accessions: file.invalid_accessions,
            contaminants: file.contaminants,
        })
    }
}

pub fn validate_batch_size(batch_size: usize) -> Result<(), KiraError> {
    if !(1..=MAX_FETCH_BATCH_SIZE).contains(&batch_size) {
        return Err(KiraError::InvalidBatchSize(batch_size));
    }
    Ok(())
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
