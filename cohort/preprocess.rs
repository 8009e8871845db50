//! Cleaning and encoding the unified student table.
//!
//! Every step takes a table by reference and returns a new one:
//! duplicate removal, removal of rows without a usable final grade, derivation
//! of the performance label, and finally the numeric feature encoding (grade
//! columns dropped, text columns one-hot encoded, gaps zero-filled).

use crate::frame::{float_column, float_values, has_column, is_text, text_column, filter_rows};
use polars::prelude::*;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const LABEL_COLUMN: &str = "performance";
pub const FINAL_GRADE_COLUMN: &str = "G3";
pub const PERIOD_GRADE_COLUMNS: [&str; 2] = ["G1", "G2"];

pub const EXCELLENT_THRESHOLD: f64 = 15.0;
pub const AVERAGE_THRESHOLD: f64 = 10.0;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Column '{0}' is required but missing from the student table")]
    MissingColumn(String),
    #[error("Unknown performance label '{0}'")]
    UnknownLabel(String),
    #[error("Polars error during preprocessing: {0}")]
    Polars(#[from] PolarsError),
}

/// The three-level outcome derived from the final grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Performance {
    Poor,
    Average,
    Excellent,
}

impl Performance {
    /// All labels in ordinal order; this is also the confusion-matrix order.
    pub const ALL: [Performance; 3] = [
        Performance::Poor,
        Performance::Average,
        Performance::Excellent,
    ];

    /// `g >= 15` is excellent, `10 <= g < 15` is average, anything lower is poor.
    pub fn from_grade(grade: f64) -> Self {
        if grade >= EXCELLENT_THRESHOLD {
            Performance::Excellent
        } else if grade >= AVERAGE_THRESHOLD {
            Performance::Average
        } else {
            Performance::Poor
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Performance::Poor => "poor",
            Performance::Average => "average",
            Performance::Excellent => "excellent",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn names() -> [&'static str; 3] {
        Self::ALL.map(Performance::as_str)
    }
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Performance {
    type Err = PreprocessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| PreprocessError::UnknownLabel(s.to_string()))
    }
}

/// Output of [`preprocess`].
#[derive(Debug, Clone)]
pub struct Preprocessed {
    /// Deduplicated rows with a finite final grade, all original columns kept,
    /// plus the `performance` label.
    pub cleaned: DataFrame,
    /// `Float64` features (grades removed, text one-hot encoded, gaps zeroed)
    /// followed by the `performance` label.
    pub encoded: DataFrame,
}

pub fn preprocess(raw: &DataFrame) -> Result<Preprocessed, PreprocessError> {
    let deduplicated = drop_duplicate_rows(raw)?;
    let graded = drop_missing_grades(&deduplicated)?;
    let cleaned = add_performance_label(&graded)?;
    let encoded = encode_features(&cleaned)?;

    log::info!(
        "Preprocessing kept {} of {} rows ({} duplicates, {} without a final grade); {} feature columns",
        cleaned.height(),
        raw.height(),
        raw.height() - deduplicated.height(),
        deduplicated.height() - graded.height(),
        encoded.width() - 1
    );
    Ok(Preprocessed { cleaned, encoded })
}

/// Keeps the first occurrence of every distinct row, comparing all columns.
pub fn drop_duplicate_rows(df: &DataFrame) -> Result<DataFrame, PreprocessError> {
    Ok(df.unique_stable(None, UniqueKeepStrategy::First, None)?)
}

/// Drops rows whose final grade is missing, unparsable or non-finite.
pub fn drop_missing_grades(df: &DataFrame) -> Result<DataFrame, PreprocessError> {
    let grades = grade_values(df)?;
    let keep: Vec<bool> = grades
        .iter()
        .map(|g| g.is_some_and(f64::is_finite))
        .collect();
    Ok(filter_rows(df, &keep)?)
}

/// Appends the `performance` label. Every row must carry a finite grade.
pub fn add_performance_label(df: &DataFrame) -> Result<DataFrame, PreprocessError> {
    let labels = grade_values(df)?
        .into_iter()
        .map(|g| match g {
            Some(grade) if grade.is_finite() => Ok(Performance::from_grade(grade).as_str()),
            _ => Err(PreprocessError::MissingColumn(format!(
                "{FINAL_GRADE_COLUMN} (a row has no usable value)"
            ))),
        })
        .collect::<Result<Vec<&str>, _>>()?;

    let mut labelled = df.clone();
    labelled.with_column(Column::new(LABEL_COLUMN.into(), labels))?;
    Ok(labelled)
}

/// Builds the model-ready table from a labelled table.
pub fn encode_features(labelled: &DataFrame) -> Result<DataFrame, PreprocessError> {
    if !has_column(labelled, LABEL_COLUMN) {
        return Err(PreprocessError::MissingColumn(LABEL_COLUMN.to_string()));
    }

    let mut columns = Vec::with_capacity(labelled.width() * 2);
    for column in labelled.get_columns() {
        let name = column.name().as_str();
        if name == LABEL_COLUMN || name == FINAL_GRADE_COLUMN || PERIOD_GRADE_COLUMNS.contains(&name) {
            continue;
        }
        if is_text(column) {
            columns.extend(one_hot(column)?);
        } else {
            let filled: Vec<f64> = float_values(column)?
                .into_iter()
                .map(|v| v.filter(|x| x.is_finite()).unwrap_or(0.0))
                .collect();
            columns.push(Column::new(column.name().clone(), filled));
        }
    }

    let labels: Vec<Option<String>> = text_column(labelled, LABEL_COLUMN)?;
    columns.push(Column::new(LABEL_COLUMN.into(), labels));
    Ok(DataFrame::new(columns)?)
}

/// One indicator column per level except the lexicographically first. Missing
/// values are zero in every indicator.
pub fn one_hot(column: &Column) -> Result<Vec<Column>, PreprocessError> {
    let name = column.name().as_str();
    let values = column
        .cast(&DataType::String)?
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect::<Vec<Option<String>>>();
    let levels: BTreeSet<&str> = values.iter().flatten().map(String::as_str).collect();

    Ok(levels
        .into_iter()
        .skip(1)
        .map(|level| {
            let indicator: Vec<f64> = values
                .iter()
                .map(|v| if v.as_deref() == Some(level) { 1.0 } else { 0.0 })
                .collect();
            Column::new(format!("{name}_{level}").into(), indicator)
        })
        .collect())
}

fn grade_values(df: &DataFrame) -> Result<Vec<Option<f64>>, PreprocessError> {
    if !has_column(df, FINAL_GRADE_COLUMN) {
        return Err(PreprocessError::MissingColumn(FINAL_GRADE_COLUMN.to_string()));
    }
    Ok(float_column(df, FINAL_GRADE_COLUMN)?)
}
