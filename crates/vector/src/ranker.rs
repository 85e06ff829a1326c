use ndarray::{Array1, ArrayView2, Axis};
use replica_common::{AppConfig, ReplicaError, Result};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::svm::{self, SolverOptions};

pub use crate::svm::Gamma;

/// Classifier parameters
#[derive(Debug, Clone, Copy)]
pub struct RankerParams {
    /// One-class `nu`
    pub nu: f64,
    /// Binary penalty `C`
    pub c: f64,
    /// RBF kernel width policy
    pub gamma: Gamma,
    /// SMO stopping tolerance
    pub tolerance: f64,
    /// SMO iteration floor (raised to `100 * training size` when larger)
    pub max_iterations: usize,
}

impl Default for RankerParams {
    fn default() -> Self {
        Self {
            nu: 0.5,
            c: 100.0,
            gamma: Gamma::Scale,
            tolerance: 1e-3,
            max_iterations: 100_000,
        }
    }
}

impl RankerParams {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            nu: config.one_class_nu,
            c: config.svm_c,
            tolerance: config.svm_tolerance,
            ..Self::default()
        }
    }

    fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            gamma: self.gamma,
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
        }
    }
}

/// One scored item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredKey {
    pub key: String,
    pub score: f64,
}

/// Scores of one query, keyed by item and kept in vector-space order
#[derive(Debug, Clone, Default)]
pub struct ScoreMap {
    entries: Vec<ScoredKey>,
    lookup: HashMap<String, usize>,
}

impl ScoreMap {
    fn from_scores(keys: &[String], scores: Array1<f64>) -> Self {
        let entries: Vec<ScoredKey> = keys
            .iter()
            .zip(scores.iter())
            .map(|(key, &score)| ScoredKey {
                key: key.clone(),
                score,
            })
            .collect();
        let lookup = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (entry.key.clone(), i))
            .collect();

        Self { entries, lookup }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.lookup.get(key).map(|&i| self.entries[i].score)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ScoredKey> {
        self.entries.iter()
    }

    /// Best `k` entries, highest score first
    ///
    /// Equal scores keep their vector-space (insertion) order.
    pub fn top_k(&self, k: usize) -> Vec<ScoredKey> {
        let mut ranked = self.entries.clone();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked.truncate(k);
        ranked
    }
}

/// Query-time relevance ranking
///
/// Holds no model between calls: every query fits a fresh classifier on the
/// vectors it is given.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ranker {
    params: RankerParams,
}

impl Ranker {
    pub fn new(params: RankerParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RankerParams {
        &self.params
    }

    /// Score every row of `vectors` against a one-class boundary around `positive`
    pub fn score_positive_only(
        &self,
        positive: &[String],
        keys: &[String],
        vectors: ArrayView2<'_, f32>,
    ) -> Result<ScoreMap> {
        if positive.is_empty() {
            return Err(ReplicaError::EmptyPositiveSet);
        }
        let space = KeySpace::new(keys, vectors)?;
        let rows = space.rows(positive)?;

        debug!(
            "Fitting one-class SVM on {} positives over {} items",
            rows.len(),
            keys.len()
        );
        let training = vectors.select(Axis(0), &rows);
        let model = svm::fit_one_class(
            training.view(),
            self.params.nu,
            self.params.solver_options(),
        );

        Ok(ScoreMap::from_scores(keys, model.decision_function(vectors)))
    }

    /// Score every row of `vectors` with a binary classifier separating
    /// `positive` from `negative`
    ///
    /// Without negatives this is exactly [`Ranker::score_positive_only`].
    pub fn score_with_negatives(
        &self,
        positive: &[String],
        negative: &[String],
        keys: &[String],
        vectors: ArrayView2<'_, f32>,
    ) -> Result<ScoreMap> {
        if negative.is_empty() {
            return self.score_positive_only(positive, keys, vectors);
        }

        if positive.is_empty() {
            return Err(ReplicaError::EmptyPositiveSet);
        }
        let space = KeySpace::new(keys, vectors)?;
        let positive_rows = space.rows(positive)?;
        let negative_rows = space.rows(negative)?;

        let positive_set: HashSet<usize> = positive_rows.iter().copied().collect();
        if let Some(&row) = negative_rows.iter().find(|row| positive_set.contains(row)) {
            return Err(ReplicaError::invalid_input(format!(
                "Key {} is marked both positive and negative",
                keys[row]
            )));
        }

        debug!(
            "Fitting binary SVM on {} positives / {} negatives over {} items",
            positive_rows.len(),
            negative_rows.len(),
            keys.len()
        );
        let rows: Vec<usize> = positive_rows
            .iter()
            .chain(negative_rows.iter())
            .copied()
            .collect();
        let labels: Vec<f64> = std::iter::repeat(1.0)
            .take(positive_rows.len())
            .chain(std::iter::repeat(-1.0).take(negative_rows.len()))
            .collect();

        let training = vectors.select(Axis(0), &rows);
        let model = svm::fit_binary(
            training.view(),
            &labels,
            self.params.c,
            self.params.solver_options(),
        );

        Ok(ScoreMap::from_scores(keys, model.decision_function(vectors)))
    }
}

/// Key -> row resolution for one vector space
struct KeySpace<'a> {
    rows: HashMap<&'a str, usize>,
}

impl<'a> KeySpace<'a> {
    fn new(keys: &'a [String], vectors: ArrayView2<'_, f32>) -> Result<Self> {
        if keys.len() != vectors.nrows() {
            return Err(ReplicaError::invalid_input(format!(
                "{} keys for {} vectors",
                keys.len(),
                vectors.nrows()
            )));
        }

        let rows = keys
            .iter()
            .enumerate()
            .map(|(i, key)| (key.as_str(), i))
            .collect();
        Ok(Self { rows })
    }

    fn rows(&self, keys: &[String]) -> Result<Vec<usize>> {
        keys.iter()
            .map(|key| {
                self.rows
                    .get(key.as_str())
                    .copied()
                    .ok_or_else(|| ReplicaError::unknown_key(key.as_str()))
            })
            .collect()
    }
}
