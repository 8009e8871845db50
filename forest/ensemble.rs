//! Bagged ensembles of CART trees.

use super::tree::{DecisionTree, TreeParams};
use ndarray::{Array2, ArrayView2, Axis};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;
use thiserror::Error;

/// Hyperparameters of a forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForestParams {
    pub n_trees: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    pub min_samples_split: usize,
    /// Base seed; tree `i` draws from a generator seeded with `seed + i`.
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            max_depth: None,
            min_samples_split: 2,
            seed: 42,
        }
    }
}

#[derive(Error, Debug)]
pub enum ForestError {
    #[error("Cannot fit a forest on an empty training set.")]
    EmptyTrainingSet,
    #[error("The feature matrix has {rows} rows but {labels} labels were supplied.")]
    LabelCountMismatch { rows: usize, labels: usize },
    #[error("Label {label} is out of range for {n_classes} classes.")]
    LabelOutOfRange { label: usize, n_classes: usize },
    #[error("Prediction data has {found} feature columns, but the forest was trained on {expected}.")]
    FeatureCountMismatch { found: usize, expected: usize },
    #[error("Invalid forest configuration: {0}")]
    InvalidParams(String),
    #[error("Failed to read or write model file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML model file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize model to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
}

/// A fitted random forest classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub n_classes: usize,
    pub n_features: usize,
    pub params: ForestParams,
    pub trees: Vec<DecisionTree>,
}

impl RandomForest {
    /// Fits `params.n_trees` trees, each on a bootstrap resample of the rows and
    /// considering `floor(sqrt(n_features))` candidate features per split.
    ///
    /// Trees are grown in parallel; the result only depends on `params.seed`.
    pub fn fit(
        x: ArrayView2<f64>,
        y: &[usize],
        n_classes: usize,
        params: ForestParams,
    ) -> Result<Self, ForestError> {
        let n_rows = x.nrows();
        if n_rows == 0 {
            return Err(ForestError::EmptyTrainingSet);
        }
        if y.len() != n_rows {
            return Err(ForestError::LabelCountMismatch {
                rows: n_rows,
                labels: y.len(),
            });
        }
        if let Some(&label) = y.iter().find(|&&label| label >= n_classes) {
            return Err(ForestError::LabelOutOfRange { label, n_classes });
        }
        if params.n_trees == 0 {
            return Err(ForestError::InvalidParams(
                "a forest needs at least one tree".to_string(),
            ));
        }
        if params.max_depth == Some(0) {
            return Err(ForestError::InvalidParams(
                "max_depth must be positive when set".to_string(),
            ));
        }

        let n_features = x.ncols();
        let tree_params = TreeParams {
            max_depth: params.max_depth,
            min_samples_split: params.min_samples_split,
            max_features: ((n_features as f64).sqrt().floor() as usize).max(1),
        };

        log::debug!(
            "Fitting {} trees on {} rows x {} features (max_features = {})",
            params.n_trees,
            n_rows,
            n_features,
            tree_params.max_features
        );

        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|tree_index| {
                let mut rng = StdRng::seed_from_u64(params.seed.wrapping_add(tree_index as u64));
                let bootstrap: Vec<usize> = (0..n_rows).map(|_| rng.gen_range(0..n_rows)).collect();
                DecisionTree::fit(x, y, n_classes, &bootstrap, &tree_params, &mut rng)
            })
            .collect();

        Ok(Self {
            n_classes,
            n_features,
            params,
            trees,
        })
    }

    /// Mean of the per-tree class distributions, shape `[n_rows, n_classes]`.
    pub fn predict_proba(&self, x: ArrayView2<f64>) -> Result<Array2<f64>, ForestError> {
        if x.ncols() != self.n_features {
            return Err(ForestError::FeatureCountMismatch {
                found: x.ncols(),
                expected: self.n_features,
            });
        }

        let n_trees = self.trees.len().max(1) as f64;
        let flat: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .flat_map_iter(|row_index| {
                let row = x.index_axis(Axis(0), row_index);
                let mut sums = vec![0.0; self.n_classes];
                for tree in &self.trees {
                    for (slot, p) in sums.iter_mut().zip(tree.predict_proba_row(row)) {
                        *slot += p;
                    }
                }
                sums.into_iter().map(move |s| s / n_trees)
            })
            .collect();

        let proba = Array2::from_shape_vec((x.nrows(), self.n_classes), flat)
            .map_err(|e| ForestError::InvalidParams(e.to_string()))?;
        Ok(proba)
    }

    /// Most probable class per row; ties go to the lowest class index.
    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Vec<usize>, ForestError> {
        let proba = self.predict_proba(x)?;
        Ok(proba
            .rows()
            .into_iter()
            .map(|row| {
                let mut best = 0;
                for (class, &p) in row.iter().enumerate() {
                    if p > row[best] {
                        best = class;
                    }
                }
                best
            })
            .collect())
    }

    /// Saves the forest in a human-readable TOML format.
    pub fn save(&self, path: &Path) -> Result<(), ForestError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Loads a forest previously written by [`RandomForest::save`].
    pub fn load(path: &Path) -> Result<Self, ForestError> {
        let toml_string = fs::read_to_string(path)?;
        let forest = toml::from_str(&toml_string)?;
        Ok(forest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use tempfile::tempdir;

    fn two_blobs() -> (Array2<f64>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..40 {
            let jitter = (i % 5) as f64 * 0.1;
            if i % 2 == 0 {
                rows.extend_from_slice(&[1.0 + jitter, 2.0 - jitter, 0.5]);
                labels.push(0);
            } else {
                rows.extend_from_slice(&[6.0 + jitter, 7.0 - jitter, 0.5]);
                labels.push(1);
            }
        }
        (Array2::from_shape_vec((40, 3), rows).unwrap(), labels)
    }

    fn small_params() -> ForestParams {
        ForestParams {
            n_trees: 15,
            ..ForestParams::default()
        }
    }

    #[test]
    fn fits_well_separated_classes() {
        let (x, y) = two_blobs();
        let forest = RandomForest::fit(x.view(), &y, 2, small_params()).unwrap();
        let predictions = forest.predict(x.view()).unwrap();
        assert_eq!(predictions, y);
        assert_eq!(forest.trees.len(), 15);
    }

    #[test]
    fn probabilities_sum_to_one() {
        let (x, y) = two_blobs();
        let forest = RandomForest::fit(x.view(), &y, 3, small_params()).unwrap();
        let proba = forest.predict_proba(x.view()).unwrap();
        for row in proba.rows() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert_eq!(row[2], 0.0);
        }
    }

    #[test]
    fn same_seed_gives_identical_forests() {
        let (x, y) = two_blobs();
        let first = RandomForest::fit(x.view(), &y, 2, small_params()).unwrap();
        let second = RandomForest::fit(x.view(), &y, 2, small_params()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_inconsistent_inputs() {
        let x = array![[1.0], [2.0]];
        assert!(matches!(
            RandomForest::fit(x.view(), &[0], 2, small_params()),
            Err(ForestError::LabelCountMismatch { rows: 2, labels: 1 })
        ));
        assert!(matches!(
            RandomForest::fit(x.view(), &[0, 5], 2, small_params()),
            Err(ForestError::LabelOutOfRange { label: 5, n_classes: 2 })
        ));
        let empty = Array2::<f64>::zeros((0, 1));
        assert!(matches!(
            RandomForest::fit(empty.view(), &[], 2, small_params()),
            Err(ForestError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn prediction_checks_feature_count() {
        let (x, y) = two_blobs();
        let forest = RandomForest::fit(x.view(), &y, 2, small_params()).unwrap();
        let narrow = array![[1.0, 2.0]];
        assert!(matches!(
            forest.predict(narrow.view()),
            Err(ForestError::FeatureCountMismatch { found: 2, expected: 3 })
        ));
    }

    #[test]
    fn toml_round_trip_preserves_predictions() {
        let (x, y) = two_blobs();
        let params = ForestParams {
            n_trees: 5,
            max_depth: Some(3),
            ..ForestParams::default()
        };
        let forest = RandomForest::fit(x.view(), &y, 2, params).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("forest.toml");
        forest.save(&path).unwrap();
        let restored = RandomForest::load(&path).unwrap();

        assert_eq!(restored.params, forest.params);
        assert_eq!(
            restored.predict(x.view()).unwrap(),
            forest.predict(x.view()).unwrap()
        );
    }
}
