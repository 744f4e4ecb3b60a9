use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Serialize;

use crate::config::RunConfig;
use crate::error::KiraError;
use crate::features::FeatureMatrix;
use crate::store::WorkDir;

/// Member-count band of a genus. Genera with fewer than three members in the
/// feature matrix have no tier and get no model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Large,
    Medium,
    Small,
    Minimal,
}

impl Tier {
    pub fn from_members(members: usize) -> Option<Self> {
        match members {
            25.. => Some(Tier::Large),
            10..25 => Some(Tier::Medium),
            5..10 => Some(Tier::Small),
            3..5 => Some(Tier::Minimal),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Large => "large",
            Tier::Medium => "medium",
            Tier::Small => "small",
            Tier::Minimal => "minimal",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Saturating pooled rate of one marker over per-genus means: with
/// S = sum of 2^mean over genera whose mean is positive, 1 - 1/sqrt(S),
/// or 0 when no genus carries the marker.
pub fn background(means: impl IntoIterator<Item = f64>) -> f64 {
    let mut sum = 0.0;
    let mut any = false;
    for mean in means.into_iter().filter(|mean| *mean > 0.0) {
        sum += mean.exp2();
        any = true;
    }
    if any { 1.0 - 1.0 / sum.sqrt() } else { 0.0 }
}

pub fn log_odds_present(numerator: f64, background: f64, epsilon: f64) -> f64 {
    ((numerator + epsilon) / (background + epsilon)).ln()
}

pub fn log_odds_absent(numerator: f64, background: f64, epsilon: f64) -> f64 {
    ((1.0 - numerator + epsilon) / (1.0 - background + epsilon)).ln()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenusLlrModel {
    pub genus: String,
    pub tier: Tier,
    pub members: usize,
    pub markers: Vec<String>,
    pub present: Vec<f64>,
    pub absent: Vec<f64>,
}

impl GenusLlrModel {
    /// Sum of the present term for every marker in `presence` and the absent
    /// term for every other marker.
    pub fn score(&self, presence: &BTreeSet<String>) -> f64 {
        self.markers
            .iter()
            .zip(self.present.iter().zip(&self.absent))
            .map(|(marker, (present, absent))| {
                if presence.contains(marker) {
                    *present
                } else {
                    *absent
                }
            })
            .sum()
    }

    fn rows(&self) -> Vec<Vec<String>> {
        self.markers
            .iter()
            .zip(self.present.iter().zip(&self.absent))
            .map(|(marker, (present, absent))| {
                vec![marker.clone(), format!("{present:.6}"), format!("{absent:.6}")]
            })
            .collect()
    }
}

/// Model with the highest score for `presence`.
pub fn classify<'m>(
    models: &'m [GenusLlrModel],
    presence: &BTreeSet<String>,
) -> Option<&'m GenusLlrModel> {
    models
        .iter()
        .map(|model| (model, model.score(presence)))
        .max_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(model, _)| model)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenusTask {
    pub genus: String,
    pub tier: Tier,
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PrecomputeOutcome {
    pub models: Vec<GenusLlrModel>,
    /// Genera left out for having too few members in the feature matrix.
    pub excluded: BTreeMap<String, usize>,
    /// Genera whose task never started because the run was cancelled.
    pub skipped: Vec<String>,
}

/// Builds one model per sufficiently large genus from a feature matrix and a
/// header -> genus membership map.
pub struct LlrPrecomputer<'a> {
    matrix: &'a FeatureMatrix,
    markers: Vec<String>,
    genera: BTreeMap<String, Vec<String>>,
    epsilon: f64,
    min_group_size: usize,
}

impl<'a> LlrPrecomputer<'a> {
    pub fn new(
        matrix: &'a FeatureMatrix,
        membership: &BTreeMap<String, String>,
        config: &RunConfig,
    ) -> Self {
        let mut genera: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (header, genus) in membership {
            if matrix.contains_header(header) {
                genera.entry(genus.clone()).or_default().push(header.clone());
            }
        }
        Self {
            matrix,
            markers: matrix.markers().map(str::to_string).collect(),
            genera,
            epsilon: config.epsilon,
            min_group_size: config.min_group_size,
        }
    }

    /// Genera that get a model, with their tier and member headers.
    pub fn tasks(&self) -> Vec<GenusTask> {
        self.genera
            .iter()
            .filter(|(_, members)| members.len() >= self.min_group_size)
            .filter_map(|(genus, members)| {
                Tier::from_members(members.len()).map(|tier| GenusTask {
                    genus: genus.clone(),
                    tier,
                    members: members.clone(),
                })
            })
            .collect()
    }

    /// Mean presence of every marker over `members`.
    pub fn means(&self, members: &[String]) -> Vec<f64> {
        let mut counts = vec![0usize; self.markers.len()];
        for member in members {
            let Some(present) = self.matrix.row(member) else {
                continue;
            };
            for (count, marker) in counts.iter_mut().zip(&self.markers) {
                if present.contains(marker) {
                    *count += 1;
                }
            }
        }
        let total = members.len().max(1) as f64;
        counts.into_iter().map(|count| count as f64 / total).collect()
    }

    /// Per-marker background over every genus in the matrix, modeled or not.
    pub fn backgrounds(&self) -> Vec<f64> {
        let per_genus = self
            .genera
            .values()
            .map(|members| self.means(members))
            .collect::<Vec<_>>();
        (0..self.markers.len())
            .map(|idx| background(per_genus.iter().map(|means| means[idx])))
            .collect()
    }

    pub fn compute(&self, task: &GenusTask, backgrounds: &[f64]) -> GenusLlrModel {
        let numerators = self.means(&task.members);
        let (present, absent) = numerators
            .iter()
            .zip(backgrounds)
            .map(|(num, bg)| {
                (
                    log_odds_present(*num, *bg, self.epsilon),
                    log_odds_absent(*num, *bg, self.epsilon),
                )
            })
            .unzip();
        GenusLlrModel {
            genus: task.genus.clone(),
            tier: task.tier,
            members: task.members.len(),
            markers: self.markers.clone(),
            present,
            absent,
        }
    }

    /// Computes and persists every model on a pool of `workers` threads.
    /// Once `cancel` is set, tasks that have not started are skipped.
    pub fn run(
        &self,
        workdir: &WorkDir,
        workers: usize,
        cancel: &AtomicBool,
    ) -> Result<PrecomputeOutcome, KiraError> {
        let tasks = self.tasks();
        let excluded = self
            .genera
            .iter()
            .filter(|(genus, _)| !tasks.iter().any(|task| &task.genus == *genus))
            .map(|(genus, members)| (genus.clone(), members.len()))
            .collect::<BTreeMap<_, _>>();
        for (genus, members) in &excluded {
            tracing::debug!(genus = %genus, members, "genus below minimum size");
        }
        tracing::info!(
            genera = tasks.len(),
            excluded = excluded.len(),
            markers = self.markers.len(),
            workers,
            "precomputing LLR models"
        );

        let backgrounds = self.backgrounds();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|err| KiraError::WorkerPool(err.to_string()))?;
        let results = pool.install(|| {
            tasks
                .par_iter()
                .map(|task| {
                    if cancel.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                    let model = self.compute(task, &backgrounds);
                    WorkDir::write_table_atomic(
                        &workdir.llr_model_path(model.tier.as_str(), &model.genus),
                        &["marker", "present", "absent"],
                        model.rows(),
                    )?;
                    Ok(Some(model))
                })
                .collect::<Result<Vec<_>, KiraError>>()
        })?;

        let mut outcome = PrecomputeOutcome {
            excluded,
            ..PrecomputeOutcome::default()
        };
        for (task, result) in tasks.iter().zip(results) {
            match result {
                Some(model) => outcome.models.push(model),
                None => outcome.skipped.push(task.genus.clone()),
            }
        }

        WorkDir::write_table_atomic(
            &workdir.llr_summary_path(),
            &["genus", "tier", "members"],
            outcome.models.iter().map(|model| {
                vec![
                    model.genus.clone(),
                    model.tier.to_string(),
                    model.members.to_string(),
                ]
            }),
        )?;
        tracing::info!(
            models = outcome.models.len(),
            skipped = outcome.skipped.len(),
            "LLR models written"
        );
        Ok(outcome)
    }
}
