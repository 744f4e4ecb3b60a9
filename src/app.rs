use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;

use crate::assemble::{RecordAssembler, read_taxonomy, write_fasta, write_taxonomy};
use crate::cache::{FetchCache, FetchStats, SideIndex};
use crate::config::RunConfig;
use crate::error::KiraError;
use crate::features::{FeatureMatrix, FeatureMatrixBuilder};
use crate::flags::{FlagLog, Stage};
use crate::llr::{LlrPrecomputer, Tier};
use crate::ncbi::NcbiClient;
use crate::normalize::normalize;
use crate::resolve::{AccessionResolver, validate_existence};
use crate::sheet::read_sheet;
use crate::store::WorkDir;
use crate::tools::{MarkerSearch, ToolInfo};

const INGEST_STAGES: [Stage; 5] = [
    Stage::Normalize,
    Stage::Resolve,
    Stage::Validate,
    Stage::Fetch,
    Stage::Assemble,
];

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub sheet_path: String,
    pub sheet_downloaded: bool,
    pub rows: usize,
    pub synthesized_sort: bool,
    pub reset_fallback: bool,
    pub resolved_groups: usize,
    pub fetch: FetchStats,
    pub records: usize,
    pub flagged: usize,
    pub taxonomy_path: String,
    pub sequences_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarkerMatchResult {
    pub matches_path: String,
    pub feature_matrix_path: String,
    pub rows: usize,
    pub markers: usize,
    pub flagged: usize,
    pub tools: ToolInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelSummary {
    pub genus: String,
    pub tier: Tier,
    pub members: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PrecomputeResult {
    pub models: Vec<ModelSummary>,
    pub excluded: BTreeMap<String, usize>,
    pub skipped: Vec<String>,
    pub flagged: usize,
    pub summary_path: String,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

pub struct App<N: NcbiClient, M: MarkerSearch> {
    workdir: WorkDir,
    config: RunConfig,
    ncbi: N,
    search: M,
}

impl<N: NcbiClient, M: MarkerSearch> App<N, M> {
    pub fn new(workdir: WorkDir, config: RunConfig, ncbi: N, search: M) -> Self {
        Self {
            workdir,
            config,
            ncbi,
            search,
        }
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn ncbi(&self) -> &N {
        &self.ncbi
    }

    pub fn search(&self) -> &M {
        &self.search
    }

    /// Spreadsheet to taxonomy table and sequence file, fetching only
    /// accessions not already cached.
    pub fn ingest(&self, sink: &dyn ProgressSink) -> Result<IngestResult, KiraError> {
        let started = Instant::now();
        self.workdir.ensure()?;
        let mut flags = FlagLog::new();

        let sheet_path = self.workdir.sheet_path(&self.config.source_url);
        let sheet_downloaded = !self.workdir.has_sheet_from(&self.config.source_url);
        if sheet_downloaded {
            sink.event(ProgressEvent {
                message: format!("phase=Download; {}", self.config.source_url),
                elapsed: None,
            });
            self.ncbi
                .download(&self.config.source_url, sheet_path.as_std_path())?;
            WorkDir::write_bytes_atomic(
                &self.workdir.sheet_source_path(),
                self.config.source_url.as_bytes(),
            )?;
        } else {
            tracing::info!(path = %sheet_path, "reusing local spreadsheet");
        }

        sink.event(ProgressEvent {
            message: "phase=Normalize; reading spreadsheet".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let sheet = read_sheet(&sheet_path, &self.config.sheet_prefix)?;
        let normalized = normalize(&sheet, &mut flags)?;

        sink.event(ProgressEvent {
            message: format!("phase=Resolve; {} rows", normalized.taxa.len()),
            elapsed: Some(started.elapsed()),
        });
        let resolver = AccessionResolver::new(&self.config)?;
        let rows = resolver.resolve_rows(&normalized.taxa, &mut flags);

        let cache = FetchCache::new(&self.workdir, &self.ncbi, &self.config);
        let uncached = rows
            .accessions()
            .into_iter()
            .filter(|accession| !cache.contains(accession))
            .collect::<Vec<_>>();
        sink.event(ProgressEvent {
            message: format!("phase=Validate; {} uncached identifiers", uncached.len()),
            elapsed: Some(started.elapsed()),
        });
        let confirmed = validate_existence(&self.ncbi, &uncached, &self.config, &mut flags);
        let rows = rows.retain_accessions(
            |accession| cache.contains(accession) || confirmed.contains(accession),
            Stage::Validate,
            &mut flags,
        );

        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} identifiers", rows.accessions().len()),
            elapsed: Some(started.elapsed()),
        });
        let ensured = cache.ensure(&rows.accessions(), &mut flags)?;
        let rows = rows.retain_accessions(
            |accession| ensured.entries.contains_key(accession),
            Stage::Fetch,
            &mut flags,
        );
        SideIndex::from_rows(&rows).write(&self.workdir.index_path())?;

        sink.event(ProgressEvent {
            message: format!("phase=Assemble; {} groups", rows.len()),
            elapsed: Some(started.elapsed()),
        });
        let records = RecordAssembler::new(&self.config).assemble(
            &normalized.taxa,
            &rows,
            &ensured.entries,
            &mut flags,
        );
        let taxonomy_path = self.workdir.taxonomy_path();
        let sequences_path = self.workdir.sequences_path();
        write_taxonomy(&taxonomy_path, &records)?;
        write_fasta(&sequences_path, &records)?;
        flags.persist_stages(&self.workdir.flagged_path(), &INGEST_STAGES)?;

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} records", records.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(IngestResult {
            sheet_path: sheet_path.to_string(),
            sheet_downloaded,
            rows: normalized.taxa.len(),
            synthesized_sort: normalized.synthesized_sort,
            reset_fallback: normalized.reset_fallback,
            resolved_groups: rows.len(),
            fetch: ensured.stats,
            records: records.len(),
            flagged: flags.len(),
            taxonomy_path: taxonomy_path.to_string(),
            sequences_path: sequences_path.to_string(),
        })
    }

    /// Runs the external ORF caller and marker search over the assembled
    /// sequences, then pivots the match table into the feature matrix.
    pub fn marker_match(&self, sink: &dyn ProgressSink) -> Result<MarkerMatchResult, KiraError> {
        let started = Instant::now();
        let sequences = self.workdir.sequences_path();
        let taxonomy = self.workdir.taxonomy_path();
        let markers = self
            .config
            .markers_path
            .as_ref()
            .map(Utf8PathBuf::from)
            .unwrap_or_else(|| self.workdir.default_markers_path());
        self.workdir.require(&sequences)?;
        self.workdir.require(&taxonomy)?;
        self.workdir.require(&markers)?;

        let orfs = self.workdir.orfs_path();
        let matches = self.workdir.matches_path();
        let tmp_dir = self.workdir.tool_tmp_dir();
        fs::create_dir_all(tmp_dir.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("create {tmp_dir}: {err}")))?;

        sink.event(ProgressEvent {
            message: "phase=Orfs; calling open reading frames".to_string(),
            elapsed: None,
        });
        self.search.call_orfs(&sequences, &orfs)?;
        sink.event(ProgressEvent {
            message: "phase=Search; matching markers".to_string(),
            elapsed: Some(started.elapsed()),
        });
        self.search.search(&orfs, &markers, &matches, &tmp_dir)?;
        if self.config.cleanup {
            WorkDir::remove_dir_if_exists(&tmp_dir)?;
        }
        self.workdir.require(&matches)?;

        sink.event(ProgressEvent {
            message: "phase=Features; building feature matrix".to_string(),
            elapsed: Some(started.elapsed()),
        });
        let known = read_taxonomy(&taxonomy)?
            .into_iter()
            .map(|row| row.header)
            .collect::<HashSet<_>>();
        let file = fs::File::open(matches.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("open {matches}: {err}")))?;
        let mut flags = FlagLog::new();
        let matrix = FeatureMatrixBuilder::new(&known).build(file, &mut flags)?;
        let matrix_path = self.workdir.feature_matrix_path();
        matrix.write(&matrix_path)?;
        flags.persist_stages(&self.workdir.flagged_path(), &[Stage::FeatureMatrix])?;

        Ok(MarkerMatchResult {
            matches_path: matches.to_string(),
            feature_matrix_path: matrix_path.to_string(),
            rows: matrix.len(),
            markers: matrix.marker_count(),
            flagged: flags.len(),
            tools: self.search.tool_info(),
        })
    }

    /// Regenerates every per-genus LLR model from the feature matrix and the
    /// taxonomy table. Setting `cancel` skips genera not yet started.
    pub fn precompute(
        &self,
        cancel: &AtomicBool,
        sink: &dyn ProgressSink,
    ) -> Result<PrecomputeResult, KiraError> {
        let started = Instant::now();
        let matrix_path = self.workdir.feature_matrix_path();
        let taxonomy = self.workdir.taxonomy_path();
        self.workdir.require(&matrix_path)?;
        self.workdir.require(&taxonomy)?;

        let matrix = FeatureMatrix::read(&matrix_path)?;
        let mut flags = FlagLog::new();
        let mut membership = BTreeMap::new();
        for row in read_taxonomy(&taxonomy)? {
            match row.genus {
                Some(genus) => {
                    membership.insert(row.header, genus);
                }
                None if matrix.contains_header(&row.header) => {
                    flags.flag(Stage::Precompute, row.header, "no genus; excluded from modeling");
                }
                None => {}
            }
        }

        sink.event(ProgressEvent {
            message: format!(
                "phase=Precompute; {} rows x {} markers",
                matrix.len(),
                matrix.marker_count()
            ),
            elapsed: None,
        });
        WorkDir::remove_dir_if_exists(&self.workdir.llr_dir())?;
        let outcome = LlrPrecomputer::new(&matrix, &membership, &self.config).run(
            &self.workdir,
            self.config.workers,
            cancel,
        )?;
        flags.persist_stages(&self.workdir.flagged_path(), &[Stage::Precompute])?;

        sink.event(ProgressEvent {
            message: format!("phase=Done; {} models", outcome.models.len()),
            elapsed: Some(started.elapsed()),
        });
        Ok(PrecomputeResult {
            models: outcome
                .models
                .iter()
                .map(|model| ModelSummary {
                    genus: model.genus.clone(),
                    tier: model.tier,
                    members: model.members,
                })
                .collect(),
            excluded: outcome.excluded,
            skipped: outcome.skipped,
            flagged: flags.len(),
            summary_path: self.workdir.llr_summary_path().to_string(),
        })
    }
}
