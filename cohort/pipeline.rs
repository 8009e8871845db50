//! End-to-end run: load, preprocess, augment, then train, compare and plot.

use crate::config::PipelineConfig;
use crate::forest::ForestError;
use crate::frame::{has_column, text_column};
use crate::load::{LoadError, SUBJECT_COLUMN, load_student_data};
use crate::macro_features::{MacroError, broadcast_onto, fetch_macro_table};
use crate::plots::{PlotError, PlotPaths, render_all};
use crate::preprocess::{PreprocessError, preprocess};
use crate::remote::RemoteSource;
use crate::stats::{StatsError, WelchTest, compare_groups};
use crate::train::{TrainError, TrainedClassifier, train_and_evaluate};
use polars::prelude::{DataFrame, PolarsError};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Macro(#[from] MacroError),
    #[error(transparent)]
    Train(#[from] TrainError),
    #[error(transparent)]
    Stats(#[from] StatsError),
    #[error(transparent)]
    Plot(#[from] PlotError),
    #[error("Failed to save the trained model: {0}")]
    Model(#[from] ForestError),
    #[error("Failed to write predictions: {0}")]
    Csv(#[from] csv::Error),
    #[error("Polars error: {0}")]
    Polars(#[from] PolarsError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    /// Where to dump the fitted forest as TOML, if anywhere.
    pub save_model: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub raw_rows: usize,
    pub cleaned_rows: usize,
    /// Number of model inputs, macro columns included.
    pub feature_columns: usize,
    pub macro_columns: Vec<String>,
    /// The encoded table the classifier was trained on, label last.
    pub features: DataFrame,
    pub classifier: TrainedClassifier,
    pub group_test: WelchTest,
    pub plots: PlotPaths,
    pub predictions: PathBuf,
}

#[derive(Debug, Serialize)]
struct PredictionRecord<'a> {
    row: usize,
    subject: &'a str,
    actual: &'a str,
    predicted: &'a str,
}

/// Runs every stage in order. `source` is used for the course-file download
/// and the World Bank queries; `None` means no network access at all.
pub fn run(
    config: &PipelineConfig,
    source: Option<&dyn RemoteSource>,
    options: &PipelineOptions,
) -> Result<PipelineReport, PipelineError> {
    println!("> Loading course files from {}", config.data.data_dir.display());
    let raw = load_student_data(&config.data, source)?;
    println!("> Loaded {} rows", raw.height());

    println!("> Cleaning and encoding");
    let processed = preprocess(&raw)?;
    println!(
        "> {} rows kept, {} feature columns",
        processed.cleaned.height(),
        processed.encoded.width() - 1
    );

    let mut features = processed.encoded;
    let mut macro_columns = Vec::new();
    if config.macro_features.enabled {
        match source {
            Some(source) => {
                println!("> Fetching World Bank indicators");
                let table = fetch_macro_table(&config.macro_features, source)?;
                let before = features.width();
                features = broadcast_onto(&features, &table)?;
                macro_columns = features.get_column_names()[before..]
                    .iter()
                    .map(|name| name.to_string())
                    .collect();
                println!("> Added {} macro column(s)", macro_columns.len());
            }
            None => println!("> Skipping World Bank indicators (offline)"),
        }
    }

    let trainer = config.model.trainer_config();
    println!(
        "> Training random forest{}",
        if trainer.grid.is_some() { " with grid search" } else { "" }
    );
    let classifier = train_and_evaluate(&features, &trainer)?;
    if let Some(outcome) = &classifier.search {
        println!(
            "> Best parameters: {} trees, max depth {}, min split {} (cv accuracy {:.4})",
            outcome.best.n_trees,
            outcome
                .best
                .max_depth
                .map_or_else(|| "unlimited".to_string(), |d| d.to_string()),
            outcome.best.min_samples_split,
            outcome.best_score
        );
    }

    fs::create_dir_all(&config.output.results_dir)?;
    let predictions = config.output.predictions_path();
    write_predictions(&processed.cleaned, &classifier, &predictions)?;
    if let Some(path) = &options.save_model {
        classifier.forest.save(path)?;
        println!("> Saved model to {}", path.display());
    }

    let analysis = &config.analysis;
    let group_test = compare_groups(
        &processed.cleaned,
        &analysis.group_column,
        &analysis.grade_column,
        &analysis.first_group,
        &analysis.second_group,
    )?;

    println!("> Rendering charts into {}", config.output.results_dir.display());
    let plots = render_all(&processed.cleaned, analysis, &config.output)?;

    Ok(PipelineReport {
        raw_rows: raw.height(),
        cleaned_rows: processed.cleaned.height(),
        feature_columns: features.width() - 1,
        macro_columns,
        features,
        classifier,
        group_test,
        plots,
        predictions,
    })
}

/// One CSV line per held-out row: its position in the cleaned table, its
/// subject, and the true and predicted labels.
fn write_predictions(
    cleaned: &DataFrame,
    classifier: &TrainedClassifier,
    path: &Path,
) -> Result<(), PipelineError> {
    let subjects = if has_column(cleaned, SUBJECT_COLUMN) {
        text_column(cleaned, SUBJECT_COLUMN)?
    } else {
        vec![None; cleaned.height()]
    };

    let evaluation = &classifier.evaluation;
    let mut writer = csv::Writer::from_path(path)?;
    for ((&row, actual), predicted) in evaluation
        .test_rows
        .iter()
        .zip(&evaluation.truth)
        .zip(&evaluation.predicted)
    {
        writer.serialize(PredictionRecord {
            row,
            subject: subjects.get(row).and_then(|s| s.as_deref()).unwrap_or(""),
            actual: actual.as_str(),
            predicted: predicted.as_str(),
        })?;
    }
    writer.flush()?;
    log::info!("Wrote {} predictions to {}", evaluation.test_rows.len(), path.display());
    Ok(())
}
