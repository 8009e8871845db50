//! Exhaustive hyperparameter search scored by stratified k-fold accuracy.

use super::ensemble::{ForestError, ForestParams, RandomForest};
use super::metrics::accuracy;
use super::split::stratified_k_fold;
use itertools::iproduct;
use ndarray::{ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// The candidate values for each searched hyperparameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamGrid {
    pub n_trees: Vec<usize>,
    pub max_depth: Vec<Option<usize>>,
    pub min_samples_split: Vec<usize>,
    pub folds: usize,
}

impl Default for ParamGrid {
    fn default() -> Self {
        Self {
            n_trees: vec![100, 200],
            max_depth: vec![None, Some(10), Some(20)],
            min_samples_split: vec![2, 5],
            folds: 5,
        }
    }
}

impl ParamGrid {
    /// Every combination in grid order: tree count varies slowest, split size fastest.
    pub fn candidates(&self, seed: u64) -> Vec<ForestParams> {
        iproduct!(
            self.n_trees.iter().copied(),
            self.max_depth.iter().copied(),
            self.min_samples_split.iter().copied()
        )
        .map(|(n_trees, max_depth, min_samples_split)| ForestParams {
            n_trees,
            max_depth,
            min_samples_split,
            seed,
        })
        .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: ForestParams,
    pub best_score: f64,
    /// Mean cross-validated accuracy of every candidate, in grid order.
    pub scores: Vec<(ForestParams, f64)>,
}

/// Scores every grid candidate by mean accuracy over stratified folds of the
/// given rows and returns the first candidate with the highest score.
///
/// Folds are evaluated in parallel; the folds themselves are drawn once with
/// `seed` so every candidate sees the same partitions.
pub fn grid_search(
    x: ArrayView2<f64>,
    y: &[usize],
    n_classes: usize,
    grid: &ParamGrid,
    seed: u64,
) -> Result<SearchOutcome, ForestError> {
    let candidates = grid.candidates(seed);
    if candidates.is_empty() {
        return Err(ForestError::InvalidParams(
            "the hyperparameter grid is empty".to_string(),
        ));
    }
    let folds = stratified_k_fold(y, grid.folds, seed)?;

    let mut scores = Vec::with_capacity(candidates.len());
    for params in candidates {
        let fold_scores = folds
            .par_iter()
            .map(|fold| {
                let x_train = x.select(Axis(0), &fold.train);
                let y_train: Vec<usize> = fold.train.iter().map(|&row| y[row]).collect();
                let x_test = x.select(Axis(0), &fold.test);
                let y_test: Vec<usize> = fold.test.iter().map(|&row| y[row]).collect();

                let forest = RandomForest::fit(x_train.view(), &y_train, n_classes, params)?;
                let predicted = forest.predict(x_test.view())?;
                accuracy(&y_test, &predicted)
            })
            .collect::<Result<Vec<f64>, ForestError>>()?;

        let mean = fold_scores.iter().sum::<f64>() / fold_scores.len() as f64;
        log::debug!("Grid candidate {params:?}: mean cv accuracy {mean:.4}");
        scores.push((params, mean));
    }

    let (best, best_score) = scores
        .iter()
        .copied()
        .fold(None, |current: Option<(ForestParams, f64)>, candidate| match current {
            Some(leader) if leader.1 >= candidate.1 => Some(leader),
            _ => Some(candidate),
        })
        .ok_or_else(|| ForestError::InvalidParams("no candidate was scored".to_string()))?;

    log::info!("Grid search selected {best:?} (cv accuracy {best_score:.4})");
    Ok(SearchOutcome {
        best,
        best_score,
        scores,
    })
}
