//! Fitting and evaluating the performance classifier on the encoded table.

use crate::forest::{
    ClassificationReport, ConfusionMatrix, ForestError, ForestParams, ParamGrid, RandomForest,
    SearchOutcome, accuracy, grid_search, train_test_split,
};
use crate::frame::{float_values, has_column, is_text, text_column};
use crate::preprocess::Performance;
use ndarray::{Array2, Axis};
use polars::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainError {
    #[error("Target column '{0}' is not present in the feature table")]
    InvalidTarget(String),
    #[error("Target column '{0}' must hold text labels")]
    NonTextTarget(String),
    #[error("Row {row} has unknown label '{label}'; expected poor, average or excellent")]
    UnknownLabel { row: usize, label: String },
    #[error("Row {row} has no label")]
    MissingLabel { row: usize },
    #[error("Feature column '{0}' is not numeric; encode it before training")]
    NonNumericFeature(String),
    #[error("Feature column '{column}' has a missing value at row {row}")]
    MissingFeatureValue { column: String, row: usize },
    #[error("The feature table has no feature columns")]
    NoFeatures,
    #[error("Class index {0} does not name a performance level")]
    UnknownClassIndex(usize),
    #[error(transparent)]
    Forest(#[from] ForestError),
    #[error("Polars error while building the design matrix: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrainerConfig {
    pub target: String,
    pub test_fraction: f64,
    pub seed: u64,
    pub stratify: bool,
    /// Used as-is when `grid` is `None`.
    pub forest: ForestParams,
    /// When set, the forest parameters are chosen by cross-validated search.
    pub grid: Option<ParamGrid>,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            target: "performance".to_string(),
            test_fraction: 0.2,
            seed: 42,
            stratify: true,
            forest: ForestParams::default(),
            grid: None,
        }
    }
}

/// Dense features and class indices taken from a table.
#[derive(Debug, Clone, PartialEq)]
pub struct DesignMatrix {
    pub feature_names: Vec<String>,
    pub x: Array2<f64>,
    pub y: Vec<usize>,
}

/// Splits `df` into every column except `target` (must be numeric and
/// complete) and the parsed labels of `target`.
pub fn design_matrix(df: &DataFrame, target: &str) -> Result<DesignMatrix, TrainError> {
    if !has_column(df, target) {
        return Err(TrainError::InvalidTarget(target.to_string()));
    }
    if !is_text(df.column(target)?) {
        return Err(TrainError::NonTextTarget(target.to_string()));
    }

    let y = text_column(df, target)?
        .into_iter()
        .enumerate()
        .map(|(row, label)| {
            let label = label.ok_or(TrainError::MissingLabel { row })?;
            label
                .parse::<Performance>()
                .map(Performance::index)
                .map_err(|_| TrainError::UnknownLabel { row, label })
        })
        .collect::<Result<Vec<usize>, _>>()?;

    let features: Vec<&Column> = df
        .get_columns()
        .iter()
        .filter(|c| c.name().as_str() != target)
        .collect();
    if features.is_empty() {
        return Err(TrainError::NoFeatures);
    }

    let mut x = Array2::<f64>::zeros((df.height(), features.len()));
    let mut feature_names = Vec::with_capacity(features.len());
    for (j, column) in features.iter().enumerate() {
        let name = column.name().to_string();
        if !column.dtype().is_primitive_numeric() {
            return Err(TrainError::NonNumericFeature(name));
        }
        for (row, value) in float_values(column)?.into_iter().enumerate() {
            x[[row, j]] = value.ok_or_else(|| TrainError::MissingFeatureValue {
                column: name.clone(),
                row,
            })?;
        }
        feature_names.push(name);
    }

    Ok(DesignMatrix {
        feature_names,
        x,
        y,
    })
}

/// Held-out metrics of a fitted classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub accuracy: f64,
    pub confusion: ConfusionMatrix,
    pub report: ClassificationReport,
    /// Table row of every test prediction.
    pub test_rows: Vec<usize>,
    pub truth: Vec<Performance>,
    pub predicted: Vec<Performance>,
}

#[derive(Debug, Clone)]
pub struct TrainedClassifier {
    pub feature_names: Vec<String>,
    pub forest: RandomForest,
    pub search: Option<SearchOutcome>,
    pub evaluation: Evaluation,
}

/// Splits, fits (optionally after a grid search on the training partition)
/// and evaluates on the held-out partition.
pub fn train_and_evaluate(df: &DataFrame, config: &TrainerConfig) -> Result<TrainedClassifier, TrainError> {
    let design = design_matrix(df, &config.target)?;
    let n_classes = Performance::ALL.len();

    let split = train_test_split(&design.y, config.test_fraction, config.seed, config.stratify)?;
    let x_train = design.x.select(Axis(0), &split.train);
    let x_test = design.x.select(Axis(0), &split.test);
    let y_train: Vec<usize> = split.train.iter().map(|&row| design.y[row]).collect();
    let y_test: Vec<usize> = split.test.iter().map(|&row| design.y[row]).collect();
    log::info!(
        "Training on {} rows, testing on {} rows, {} features",
        y_train.len(),
        y_test.len(),
        design.feature_names.len()
    );

    let search = match &config.grid {
        Some(grid) => Some(grid_search(x_train.view(), &y_train, n_classes, grid, config.seed)?),
        None => None,
    };
    let params = search.as_ref().map_or(config.forest, |outcome| outcome.best);

    let forest = RandomForest::fit(x_train.view(), &y_train, n_classes, params)?;
    let predicted = forest.predict(x_test.view())?;

    let confusion = ConfusionMatrix::from_predictions(&y_test, &predicted, &Performance::names())?;
    let report = ClassificationReport::from_confusion(&confusion);
    let evaluation = Evaluation {
        accuracy: accuracy(&y_test, &predicted)?,
        confusion,
        report,
        test_rows: split.test,
        truth: to_labels(&y_test)?,
        predicted: to_labels(&predicted)?,
    };

    Ok(TrainedClassifier {
        feature_names: design.feature_names,
        forest,
        search,
        evaluation,
    })
}

fn to_labels(indices: &[usize]) -> Result<Vec<Performance>, TrainError> {
    indices
        .iter()
        .map(|&i| Performance::from_index(i).ok_or(TrainError::UnknownClassIndex(i)))
        .collect()
}
