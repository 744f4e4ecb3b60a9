use std::fmt;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::KiraError;
use crate::store::WorkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Normalize,
    Resolve,
    Validate,
    Fetch,
    Assemble,
    FeatureMatrix,
    Precompute,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Normalize => "normalize",
            Stage::Resolve => "resolve",
            Stage::Validate => "validate",
            Stage::Fetch => "fetch",
            Stage::Assemble => "assemble",
            Stage::FeatureMatrix => "feature-matrix",
            Stage::Precompute => "precompute",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlaggedItem {
    pub stage: Stage,
    pub item: String,
    pub reason: String,
}

/// Accumulates recoverable per-item failures. Nothing recorded here aborts a run.
#[derive(Debug, Clone, Default)]
pub struct FlagLog {
    items: Vec<FlaggedItem>,
}

impl FlagLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flag(&mut self, stage: Stage, item: impl Into<String>, reason: impl Into<String>) {
        let item = item.into();
        let reason = reason.into();
        tracing::warn!(%stage, item = %item, "{reason}");
        self.items.push(FlaggedItem {
            stage,
            item,
            reason,
        });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, stage: Stage, item: &str) -> bool {
        self.items
            .iter()
            .any(|flagged| flagged.stage == stage && flagged.item == item)
    }

    /// Rewrites `path` keeping rows from earlier runs of other stages and
    /// replacing every row of the stages in `owned` with this log.
    pub fn persist_stages(&self, path: &Utf8Path, owned: &[Stage]) -> Result<(), KiraError> {
        let owned = owned.iter().map(Stage::to_string).collect::<Vec<_>>();
        let mut rows = if path.as_std_path().is_file() {
            let (_, rows) = WorkDir::read_table(path)?;
            rows.into_iter()
                .filter(|row| row.first().is_some_and(|stage| !owned.contains(stage)))
                .collect::<Vec<_>>()
        } else {
            Vec::new()
        };
        rows.extend(self.rows());
        WorkDir::write_table_atomic(path, &FLAGGED_HEADER, rows)
    }

    fn rows(&self) -> impl Iterator<Item = Vec<String>> + '_ {
        self.items.iter().map(|flagged| {
            vec![
                flagged.stage.to_string(),
                flagged.item.clone(),
                flagged.reason.clone(),
            ]
        })
    }
}

const FLAGGED_HEADER: [&str; 3] = ["stage", "item", "reason"];

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn later_stage_keeps_earlier_rows() {
        let temp = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).unwrap();
        let path = root.join("flagged.tsv");

        let mut ingest = FlagLog::new();
        ingest.flag(Stage::Fetch, "AB123456", "retrieval failed");
        ingest.persist_stages(&path, &[Stage::Fetch]).unwrap();

        let mut features = FlagLog::new();
        features.flag(Stage::FeatureMatrix, "line 3", "fewer than two columns");
        features.persist_stages(&path, &[Stage::FeatureMatrix]).unwrap();
        features.persist_stages(&path, &[Stage::FeatureMatrix]).unwrap();

        let (_, rows) = WorkDir::read_table(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], "fetch");
        assert_eq!(rows[1][0], "feature-matrix");
    }
}
