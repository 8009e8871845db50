//! Two-sided Welch's t-test between two groups of a table.

use crate::frame::{float_column, has_column, text_column};
use polars::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StatsError {
    #[error("Column '{0}' is required for the group comparison but is missing")]
    MissingColumn(String),
    #[error("Group '{group}' has {found} usable observation(s); at least 2 are required")]
    InsufficientObservations { group: String, found: usize },
    #[error("Both groups have zero variance; the t statistic is undefined")]
    ZeroVariance,
    #[error("Failed to build the t distribution: {0}")]
    Distribution(String),
    #[error("Polars error during group comparison: {0}")]
    Polars(#[from] PolarsError),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub t_statistic: f64,
    pub p_value: f64,
    pub degrees_of_freedom: f64,
    pub n_first: usize,
    pub n_second: usize,
    pub mean_first: f64,
    pub mean_second: f64,
}

impl fmt::Display for WelchTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t = {:.4}, p = {:.4} (df = {:.1}; n = {} vs {}; means {:.3} vs {:.3})",
            self.t_statistic,
            self.p_value,
            self.degrees_of_freedom,
            self.n_first,
            self.n_second,
            self.mean_first,
            self.mean_second
        )
    }
}

/// Mean and unbiased sample variance.
fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, variance)
}

/// Welch's unequal-variance t-test of `first` against `second`.
///
/// The statistic is signed (`first` minus `second`); the p-value is two-sided
/// with Welch–Satterthwaite degrees of freedom. Each group needs at least two
/// observations and the pooled standard error must be positive.
pub fn welch_t_test(first: &[f64], second: &[f64]) -> Result<WelchTest, StatsError> {
    for (group, values) in [("first", first), ("second", second)] {
        if values.len() < 2 {
            return Err(StatsError::InsufficientObservations {
                group: group.to_string(),
                found: values.len(),
            });
        }
    }

    let (n1, n2) = (first.len() as f64, second.len() as f64);
    let (mean1, var1) = mean_and_variance(first);
    let (mean2, var2) = mean_and_variance(second);
    let se1 = var1 / n1;
    let se2 = var2 / n2;
    let se = (se1 + se2).sqrt();
    if !(se > 0.0) {
        return Err(StatsError::ZeroVariance);
    }

    let t_statistic = (mean1 - mean2) / se;
    let degrees_of_freedom =
        (se1 + se2).powi(2) / (se1.powi(2) / (n1 - 1.0) + se2.powi(2) / (n2 - 1.0));
    let distribution = StudentsT::new(0.0, 1.0, degrees_of_freedom)
        .map_err(|e| StatsError::Distribution(e.to_string()))?;
    let p_value = (2.0 * (1.0 - distribution.cdf(t_statistic.abs()))).clamp(0.0, 1.0);

    Ok(WelchTest {
        t_statistic,
        p_value,
        degrees_of_freedom,
        n_first: first.len(),
        n_second: second.len(),
        mean_first: mean1,
        mean_second: mean2,
    })
}

/// Splits `value_column` by the text of `group_column` into the rows equal to
/// `first` and to `second` (other groups are ignored), drops missing values in
/// each partition and runs [`welch_t_test`].
pub fn compare_groups(
    df: &DataFrame,
    group_column: &str,
    value_column: &str,
    first: &str,
    second: &str,
) -> Result<WelchTest, StatsError> {
    for column in [group_column, value_column] {
        if !has_column(df, column) {
            return Err(StatsError::MissingColumn(column.to_string()));
        }
    }

    let groups = text_column(df, group_column)?;
    let values = float_column(df, value_column)?;
    let mut first_values = Vec::new();
    let mut second_values = Vec::new();
    for (group, value) in groups.iter().zip(values) {
        let Some(value) = value.filter(|v| v.is_finite()) else {
            continue;
        };
        match group.as_deref() {
            Some(g) if g == first => first_values.push(value),
            Some(g) if g == second => second_values.push(value),
            _ => {}
        }
    }

    let result = welch_t_test(&first_values, &second_values).map_err(|e| match e {
        StatsError::InsufficientObservations { group, found } => {
            let label = if group == "first" { first } else { second };
            StatsError::InsufficientObservations {
                group: format!("{group_column}={label}"),
                found,
            }
        }
        other => other,
    })?;
    log::info!("Welch's t-test of {value_column} by {group_column} ({first} vs {second}): {result}");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn matches_hand_computed_welch_statistics() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0];
        let b = [2.0, 4.0, 6.0, 8.0, 10.0];
        let result = welch_t_test(&a, &b).unwrap();
        assert_abs_diff_eq!(result.t_statistic, -1.897_366_6, epsilon = 1e-6);
        assert_abs_diff_eq!(result.degrees_of_freedom, 5.882_352_9, epsilon = 1e-6);
        assert!(result.p_value > 0.09 && result.p_value < 0.13, "p = {}", result.p_value);

        let swapped = welch_t_test(&b, &a).unwrap();
        assert_abs_diff_eq!(swapped.t_statistic, -result.t_statistic, epsilon = 1e-12);
        assert_abs_diff_eq!(swapped.p_value, result.p_value, epsilon = 1e-12);
    }

    #[test]
    fn identical_means_give_p_of_one() {
        let result = welch_t_test(&[1.0, 3.0], &[0.0, 4.0]).unwrap();
        assert_eq!(result.t_statistic, 0.0);
        assert_abs_diff_eq!(result.p_value, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn undefined_cases_are_errors_not_nan() {
        assert!(matches!(
            welch_t_test(&[1.0], &[1.0, 2.0]),
            Err(StatsError::InsufficientObservations { found: 1, .. })
        ));
        assert!(matches!(
            welch_t_test(&[2.0, 2.0], &[3.0, 3.0]),
            Err(StatsError::ZeroVariance)
        ));
    }

    #[test]
    fn groups_by_text_and_drops_missing_values() {
        let df = df!(
            "internet" => ["yes", "no", "yes", "no", "yes", "no", "maybe"],
            "G3" => [Some(12.0), Some(8.0), Some(14.0), None, Some(13.0), Some(10.0), Some(1.0)],
        )
        .unwrap();
        let result = compare_groups(&df, "internet", "G3", "yes", "no").unwrap();
        assert_eq!(result.n_first, 3);
        assert_eq!(result.n_second, 2);
        assert_abs_diff_eq!(result.mean_first, 13.0);
        assert_abs_diff_eq!(result.mean_second, 9.0);
        assert!((0.0..=1.0).contains(&result.p_value));

        let again = compare_groups(&df, "internet", "G3", "yes", "no").unwrap();
        assert_eq!(result, again);
    }

    #[test]
    fn numeric_group_columns_are_read_as_text() {
        let df = df!(
            "higher" => [1i64, 0, 1, 0, 1, 0],
            "G3" => [15.0, 9.0, 16.0, 11.0, 13.0, 10.0],
        )
        .unwrap();
        let result = compare_groups(&df, "higher", "G3", "1", "0").unwrap();
        assert!(result.t_statistic > 0.0);
    }

    #[test]
    fn missing_columns_and_empty_groups_are_reported() {
        let df = df!("internet" => ["yes", "yes", "yes"], "G3" => [1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            compare_groups(&df, "internet", "G4", "yes", "no"),
            Err(StatsError::MissingColumn(name)) if name == "G4"
        ));
        assert!(matches!(
            compare_groups(&df, "romantic", "G3", "yes", "no"),
            Err(StatsError::MissingColumn(_))
        ));
        match compare_groups(&df, "internet", "G3", "yes", "no") {
            Err(StatsError::InsufficientObservations { group, found }) => {
                assert_eq!(group, "internet=no");
                assert_eq!(found, 0);
            }
            other => panic!("expected InsufficientObservations, got {other:?}"),
        }
    }
}
