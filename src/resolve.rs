use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;
use std::thread;

use indexmap::IndexMap;
use regex::Regex;

use crate::config::RunConfig;
use crate::domain::{
    Accession, AccessionDescriptor, CoordinateRange, GroupKey, NormalizedTaxon, classify_shape,
};
use crate::error::KiraError;
use crate::flags::{FlagLog, Stage};
use crate::ncbi::{NcbiClient, accession_prefix};

/// Known transcription errors in the source sheet, mapped to the intended
/// accession.
pub const TYPO_CORRECTIONS: &[(&str, &str)] = &[
    ("AF0O5485", "AF005485"),
    ("AY3IO614", "AY310614"),
    ("KC5O3940", "KC503940"),
    ("MK25O279", "MK250279"),
    ("JX4I8352", "JX418352"),
    ("EU7O4354", "EU704354"),
    ("HQ6133170", "HQ613317"),
    ("KY0654911", "KY065491"),
];

/// Accessions never to be fetched: suppressed records, records of the wrong
/// organism, and parses of historical sheet artifacts.
pub const INVALID_ACCESSIONS: &[&str] = &[
    "AB000000", "AF000000", "MN000000", "KX000000", "X00000", "DQ000001",
];

const TOKEN_SEPARATORS: &[char] = &[' ', '\t', ':', ';', ',', '+', '-'];
const MIN_TOKEN_LEN: usize = 6;

static RANGE_GLUE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\(\s*(\d+)\s*\.+\s*(\d+)\s*\)").expect("range glue pattern is valid")
});

static RANGE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<core>[^()]+)\((?P<start>\d+)\.(?P<end>\d+)\)$")
        .expect("range suffix pattern is valid")
});

/// Descriptors resolved from one identifier field, plus what was thrown away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldResolution {
    pub descriptors: Vec<AccessionDescriptor>,
    pub unresolved: Vec<String>,
    pub rejected: Vec<Accession>,
}

#[derive(Debug, Clone)]
pub struct AccessionResolver {
    corrections: HashMap<String, Accession>,
    invalid: HashSet<String>,
}

impl AccessionResolver {
    /// Built-in curated tables extended by the config's entries.
    pub fn new(config: &RunConfig) -> Result<Self, KiraError> {
        let mut corrections = HashMap::new();
        let configured = config
            .typo_corrections
            .iter()
            .map(|(from, to)| (from.as_str(), to.as_str()));
        for (from, to) in TYPO_CORRECTIONS.iter().copied().chain(configured) {
            corrections.insert(from.to_string(), to.parse::<Accession>()?);
        }
        let invalid = INVALID_ACCESSIONS
            .iter()
            .map(|value| value.to_string())
            .chain(config.invalid_accessions.iter().cloned())
            .collect();
        Ok(Self {
            corrections,
            invalid,
        })
    }

    pub fn is_invalid(&self, accession: &Accession) -> bool {
        self.invalid.contains(accession.as_str())
    }

    /// Shape match on the token, else the typo table.
    pub fn resolve_token(&self, token: &str) -> Option<Accession> {
        if classify_shape(token).is_some() {
            return token.parse().ok();
        }
        self.corrections.get(token).cloned()
    }

    pub fn resolve_field(&self, field: &str) -> FieldResolution {
        let glued = RANGE_GLUE.replace_all(field, "($1.$2)");
        let mut resolution = FieldResolution::default();
        for chunk in glued.split([';', ',']) {
            self.resolve_chunk(chunk, &mut resolution);
        }
        resolution
    }

    /// A chunk may hold several `label: accession ...` runs; the words after
    /// the last accession of one colon-delimited piece label the next piece.
    fn resolve_chunk(&self, chunk: &str, resolution: &mut FieldResolution) {
        let pieces = chunk.split(':').collect::<Vec<_>>();
        let mut label: Option<String> = None;
        for (index, piece) in pieces.iter().enumerate() {
            let is_last = index + 1 == pieces.len();
            let words = piece
                .split(|ch: char| ch.is_whitespace() || ch == '+')
                .filter(|word| !word.is_empty())
                .collect::<Vec<_>>();
            let last_accession = words.iter().rposition(|word| self.is_accession_word(word));
            let (body, trailing) = match (last_accession, is_last) {
                (_, true) => (&words[..], &words[words.len()..]),
                (Some(position), false) => words.split_at(position + 1),
                (None, false) => (&words[..0], &words[..]),
            };
            for word in body {
                self.resolve_word(word, label.as_deref(), resolution);
            }
            label = (!trailing.is_empty()).then(|| trailing.join(" "));
        }
    }

    fn is_accession_word(&self, word: &str) -> bool {
        word.split(TOKEN_SEPARATORS).any(|piece| {
            let core = split_range(piece).map(|(core, _)| core).unwrap_or(piece);
            self.resolve_token(core).is_some()
        })
    }

    /// Splits on separators first so a `(start.end)` suffix stays bound to
    /// the token it follows.
    fn resolve_word(&self, word: &str, label: Option<&str>, resolution: &mut FieldResolution) {
        for piece in word.split(TOKEN_SEPARATORS) {
            let (token, range) = match split_range(piece) {
                Some((core, range)) => (core, Some(range)),
                None => (piece, None),
            };
            if !is_candidate_token(token) {
                continue;
            }
            let Some(accession) = self.resolve_token(token) else {
                resolution.unresolved.push(piece.to_string());
                continue;
            };
            let range = match range {
                Some(Ok(range)) => Some(range),
                Some(Err(bad)) => {
                    resolution.unresolved.push(format!("{token}({bad})"));
                    continue;
                }
                None => None,
            };
            if self.is_invalid(&accession) {
                resolution.rejected.push(accession);
                continue;
            }
            let descriptor = AccessionDescriptor {
                accession,
                partition: label.map(str::to_string),
                range,
            };
            if !resolution.descriptors.contains(&descriptor) {
                resolution.descriptors.push(descriptor);
            }
        }
    }

    /// Resolves every taxon's identifier field; taxa left without
    /// descriptors are dropped and flagged.
    pub fn resolve_rows(&self, taxa: &[NormalizedTaxon], flags: &mut FlagLog) -> ResolvedRows {
        let mut rows = IndexMap::new();
        for taxon in taxa {
            let resolution = self.resolve_field(&taxon.identifier_field);
            for token in &resolution.unresolved {
                flags.flag(
                    Stage::Resolve,
                    token.as_str(),
                    format!("unrecognized identifier in row {}", taxon.group_key),
                );
            }
            for accession in &resolution.rejected {
                flags.flag(
                    Stage::Resolve,
                    accession.as_str(),
                    format!("curated invalid identifier in row {}", taxon.group_key),
                );
            }
            if resolution.descriptors.is_empty() {
                flags.flag(
                    Stage::Resolve,
                    taxon.group_key.as_str(),
                    "row yielded no identifiers",
                );
                continue;
            }
            rows.insert(taxon.group_key.clone(), resolution.descriptors);
        }
        tracing::info!(rows = rows.len(), "resolved identifier fields");
        ResolvedRows { rows }
    }
}

/// Ordered descriptors per surviving group key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRows {
    rows: IndexMap<GroupKey, Vec<AccessionDescriptor>>,
}

impl ResolvedRows {
    pub fn from_rows(rows: IndexMap<GroupKey, Vec<AccessionDescriptor>>) -> Self {
        Self { rows }
    }

    pub fn get(&self, key: &GroupKey) -> Option<&[AccessionDescriptor]> {
        self.rows.get(key).map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, &[AccessionDescriptor])> {
        self.rows
            .iter()
            .map(|(key, descriptors)| (key, descriptors.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct accessions in first-seen order.
    pub fn accessions(&self) -> Vec<Accession> {
        let mut seen = HashSet::new();
        self.rows
            .values()
            .flatten()
            .filter(|descriptor| seen.insert(descriptor.accession.clone()))
            .map(|descriptor| descriptor.accession.clone())
            .collect()
    }

    /// Keeps descriptors whose accession satisfies `keep`, dropping rows that
    /// end up empty. Builds a new collection rather than editing in place.
    pub fn retain_accessions(
        self,
        keep: impl Fn(&Accession) -> bool,
        stage: Stage,
        flags: &mut FlagLog,
    ) -> Self {
        let mut rows = IndexMap::with_capacity(self.rows.len());
        for (key, descriptors) in self.rows {
            let kept = descriptors
                .into_iter()
                .filter(|descriptor| keep(&descriptor.accession))
                .collect::<Vec<_>>();
            if kept.is_empty() {
                flags.flag(stage, key.as_str(), "no identifiers left for row");
                continue;
            }
            rows.insert(key, kept);
        }
        Self { rows }
    }
}

/// Confirms `candidates` against the authority's index in batches. Returned
/// strings are matched to queries by the prefix before the first '.'.
/// Unconfirmed accessions are flagged; a failed batch call is logged and its
/// accessions are passed through for the fetch stage to settle.
pub fn validate_existence<N: NcbiClient + ?Sized>(
    client: &N,
    candidates: &[Accession],
    config: &RunConfig,
    flags: &mut FlagLog,
) -> HashSet<Accession> {
    let mut confirmed = HashSet::with_capacity(candidates.len());
    for (batch_idx, batch) in candidates.chunks(config.validation_batch_size).enumerate() {
        if batch_idx > 0 {
            thread::sleep(config.pause);
        }
        tracing::debug!(batch = batch_idx, size = batch.len(), "existence check");
        let returned = match client.check_accessions(batch) {
            Ok(returned) => returned,
            Err(err) => {
                tracing::warn!(error = %err, batch = batch_idx, "existence check failed; passing batch through");
                confirmed.extend(batch.iter().cloned());
                continue;
            }
        };
        let found = returned
            .iter()
            .map(|value| accession_prefix(value).to_string())
            .collect::<HashSet<_>>();
        for accession in batch {
            if found.contains(accession.as_str()) {
                confirmed.insert(accession.clone());
            } else {
                flags.flag(
                    Stage::Validate,
                    accession.as_str(),
                    "not found in the sequence database index",
                );
            }
        }
    }
    tracing::info!(
        confirmed = confirmed.len(),
        requested = candidates.len(),
        "validated identifiers"
    );
    confirmed
}

fn split_range(word: &str) -> Option<(&str, Result<CoordinateRange, String>)> {
    let captures = RANGE_SUFFIX.captures(word)?;
    let core = captures.name("core")?.as_str();
    let start = captures.name("start")?.as_str();
    let end = captures.name("end")?.as_str();
    let range = match (start.parse::<u64>(), end.parse::<u64>()) {
        (Ok(start), Ok(end)) => {
            CoordinateRange::new(start, end).map_err(|_| format!("{start}.{end}"))
        }
        _ => Err(format!("{start}.{end}")),
    };
    Some((core, range))
}

/// Length, case, and transcription-artifact filters applied before shape
/// matching.
fn is_candidate_token(token: &str) -> bool {
    token.len() >= MIN_TOKEN_LEN
        && !token.chars().any(|ch| ch.is_ascii_lowercase())
        && !token.contains("DNA")
}
