use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::thread;

use camino::Utf8Path;
use serde::{Deserialize, Serialize};

use crate::config::RunConfig;
use crate::domain::{Accession, CoordinateRange, GroupKey};
use crate::error::KiraError;
use crate::flags::{FlagLog, Stage};
use crate::genbank::{GenbankRecord, count_record_starts, parse_record, split_records};
use crate::ncbi::NcbiClient;
use crate::resolve::ResolvedRows;
use crate::store::WorkDir;

/// One persisted sequence record. Written once, never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub accession: Accession,
    pub sequence: String,
    pub molecule_type: Option<String>,
    pub topology: Option<String>,
    pub date: Option<String>,
    pub host: Option<String>,
    pub country: Option<String>,
    pub fetched_at: String,
}

impl CacheEntry {
    pub fn from_record(accession: Accession, record: GenbankRecord) -> Self {
        Self {
            accession,
            sequence: record.sequence,
            molecule_type: record.molecule_type,
            topology: record.topology,
            date: record.date,
            host: record.host,
            country: record.country,
            fetched_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub requested: usize,
    pub cached: usize,
    pub fetched: usize,
    pub failed: usize,
    pub batch_calls: usize,
    pub single_calls: usize,
    pub fallback_batches: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Ensured {
    pub entries: BTreeMap<Accession, CacheEntry>,
    pub stats: FetchStats,
}

pub struct FetchCache<'a, N: NcbiClient + ?Sized> {
    workdir: &'a WorkDir,
    client: &'a N,
    config: &'a RunConfig,
}

impl<'a, N: NcbiClient + ?Sized> FetchCache<'a, N> {
    pub fn new(workdir: &'a WorkDir, client: &'a N, config: &'a RunConfig) -> Self {
        Self {
            workdir,
            client,
            config,
        }
    }

    pub fn contains(&self, accession: &Accession) -> bool {
        self.workdir
            .sequence_entry_path(accession.as_str())
            .as_std_path()
            .is_file()
    }

    pub fn load(&self, accession: &Accession) -> Result<Option<CacheEntry>, KiraError> {
        let path = self.workdir.sequence_entry_path(accession.as_str());
        if !path.as_std_path().is_file() {
            return Ok(None);
        }
        let content = fs::read(path.as_std_path())
            .map_err(|err| KiraError::Filesystem(format!("read {path}: {err}")))?;
        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|err| KiraError::Filesystem(format!("corrupt cache entry {path}: {err}")))
    }

    /// Makes every retrievable accession in `accessions` present on disk and
    /// returns the persisted entries. Accessions that cannot be retrieved are
    /// flagged and left out of the result.
    pub fn ensure(
        &self,
        accessions: &[Accession],
        flags: &mut FlagLog,
    ) -> Result<Ensured, KiraError> {
        let requested = accessions.iter().cloned().collect::<BTreeSet<_>>();
        let (cached, missing): (Vec<_>, Vec<_>) = requested
            .iter()
            .cloned()
            .partition(|accession| self.contains(accession));

        let mut stats = FetchStats {
            requested: requested.len(),
            cached: cached.len(),
            ..FetchStats::default()
        };
        tracing::info!(
            requested = stats.requested,
            cached = stats.cached,
            missing = missing.len(),
            "fetch cache lookup"
        );

        for (batch_idx, batch) in missing.chunks(self.config.batch_size).enumerate() {
            if batch_idx > 0 {
                thread::sleep(self.config.pause);
            }
            self.fetch_batch(batch, &mut stats, flags)?;
        }

        let mut entries = BTreeMap::new();
        for accession in &requested {
            if let Some(entry) = self.load(accession)? {
                entries.insert(accession.clone(), entry);
            }
        }
        tracing::info!(
            fetched = stats.fetched,
            failed = stats.failed,
            "fetch cache ready"
        );
        Ok(Ensured { entries, stats })
    }

    fn fetch_batch(
        &self,
        batch: &[Accession],
        stats: &mut FetchStats,
        flags: &mut FlagLog,
    ) -> Result<(), KiraError> {
        stats.batch_calls += 1;
        tracing::debug!(size = batch.len(), "batch retrieval");
        let mut outstanding = batch.iter().collect::<Vec<_>>();
        match self.client.fetch_genbank(batch) {
            Ok(blob) => {
                let found = count_record_starts(&blob);
                if found == batch.len() {
                    let stored = self.store_records(&blob, batch)?;
                    stats.fetched += stored.len();
                    outstanding.retain(|accession| !stored.contains(*accession));
                } else {
                    tracing::info!(
                        expected = batch.len(),
                        found,
                        "record count mismatch; retrying one at a time"
                    );
                    stats.fallback_batches += 1;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "batch retrieval failed; retrying one at a time");
                stats.fallback_batches += 1;
            }
        }

        for accession in outstanding {
            thread::sleep(self.config.pause);
            stats.single_calls += 1;
            let single = std::slice::from_ref(accession);
            let reason = match self.client.fetch_genbank(single) {
                Ok(blob) => {
                    if self.store_records(&blob, single)?.contains(accession) {
                        stats.fetched += 1;
                        continue;
                    }
                    "empty or implausibly short record".to_string()
                }
                Err(err) => format!("retrieval failed: {err}"),
            };
            stats.failed += 1;
            flags.flag(Stage::Fetch, accession.as_str(), reason);
        }
        Ok(())
    }

    /// Persists every record in `blob` that answers to an accession in
    /// `wanted`, returning the accessions written.
    fn store_records(
        &self,
        blob: &str,
        wanted: &[Accession],
    ) -> Result<HashSet<Accession>, KiraError> {
        let lookup = wanted
            .iter()
            .map(|accession| (accession.as_str(), accession))
            .collect::<HashMap<_, _>>();
        let mut stored = HashSet::new();
        for chunk in split_records(blob) {
            let record = match parse_record(&chunk) {
                Ok(record) => record,
                Err(err) => {
                    tracing::warn!(error = %err, "skipping unparseable record");
                    continue;
                }
            };
            let Some(accession) = record
                .ids
                .iter()
                .find_map(|id| lookup.get(id.as_str()).copied())
            else {
                tracing::debug!(ids = ?record.ids, "record matches no requested accession");
                continue;
            };
            if stored.contains(accession) || record.sequence.len() < self.config.min_record_length {
                continue;
            }
            let entry = CacheEntry::from_record(accession.clone(), record);
            WorkDir::write_json_atomic(
                &self.workdir.sequence_entry_path(accession.as_str()),
                &entry,
            )?;
            stored.insert(accession.clone());
        }
        Ok(stored)
    }
}

const INDEX_HEADER: [&str; 5] = ["identifier", "group_key", "partition", "start", "end"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    pub accession: Accession,
    pub group_key: GroupKey,
    pub partition: Option<String>,
    pub range: Option<CoordinateRange>,
}

/// Which group, partition, and sub-range each cached accession was used for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SideIndex {
    entries: Vec<IndexEntry>,
}

impl SideIndex {
    pub fn from_rows(rows: &ResolvedRows) -> Self {
        let entries = rows
            .iter()
            .flat_map(|(group_key, descriptors)| {
                descriptors.iter().map(move |descriptor| IndexEntry {
                    accession: descriptor.accession.clone(),
                    group_key: group_key.clone(),
                    partition: descriptor.partition.clone(),
                    range: descriptor.range,
                })
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn write(&self, path: &Utf8Path) -> Result<(), KiraError> {
        WorkDir::write_table_atomic(
            path,
            &INDEX_HEADER,
            self.entries.iter().map(|entry| {
                vec![
                    entry.accession.to_string(),
                    entry.group_key.to_string(),
                    entry.partition.clone().unwrap_or_default(),
                    entry.range.map(|r| r.start.to_string()).unwrap_or_default(),
                    entry.range.map(|r| r.end.to_string()).unwrap_or_default(),
                ]
            }),
        )
    }

    /// Loads an index written by `write`; a missing file is an empty index.
    pub fn load(path: &Utf8Path) -> Result<Self, KiraError> {
        if !path.as_std_path().is_file() {
            return Ok(Self::default());
        }
        let (_, rows) = WorkDir::read_table(path)?;
        let bad_row = |message: String| KiraError::Table {
            path: path.to_string(),
            message,
        };
        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let [accession, group_key, partition, start, end] = row.as_slice() else {
                return Err(bad_row(format!("expected 5 columns, got {}", row.len())));
            };
            let range = match (start.as_str(), end.as_str()) {
                ("", "") => None,
                (start, end) => {
                    let start = start.parse().map_err(|_| bad_row(format!("bad start {start}")))?;
                    let end = end.parse().map_err(|_| bad_row(format!("bad end {end}")))?;
                    Some(CoordinateRange::new(start, end)?)
                }
            };
            entries.push(IndexEntry {
                accession: accession.parse()?,
                group_key: GroupKey::from(group_key.as_str()),
                partition: (!partition.is_empty()).then(|| partition.clone()),
                range,
            });
        }
        Ok(Self { entries })
    }
}
