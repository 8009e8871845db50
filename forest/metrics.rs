//! Held-out evaluation: accuracy, confusion matrix and per-class report.

use super::ensemble::ForestError;
use ndarray::Array2;
use std::fmt::{self, Display, Formatter};

/// Fraction of positions where `predicted` equals `truth`. Empty input scores 0.
pub fn accuracy(truth: &[usize], predicted: &[usize]) -> Result<f64, ForestError> {
    if truth.len() != predicted.len() {
        return Err(ForestError::LabelCountMismatch {
            rows: truth.len(),
            labels: predicted.len(),
        });
    }
    if truth.is_empty() {
        return Ok(0.0);
    }
    let hits = truth.iter().zip(predicted).filter(|(t, p)| t == p).count();
    Ok(hits as f64 / truth.len() as f64)
}

/// Counts indexed `[true_class, predicted_class]`, in the order of `labels`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub labels: Vec<String>,
    pub counts: Array2<usize>,
}

impl ConfusionMatrix {
    pub fn from_predictions(
        truth: &[usize],
        predicted: &[usize],
        labels: &[&str],
    ) -> Result<Self, ForestError> {
        if truth.len() != predicted.len() {
            return Err(ForestError::LabelCountMismatch {
                rows: truth.len(),
                labels: predicted.len(),
            });
        }
        let n = labels.len();
        let mut counts = Array2::<usize>::zeros((n, n));
        for (&t, &p) in truth.iter().zip(predicted) {
            let out_of_range = t.max(p);
            if out_of_range >= n {
                return Err(ForestError::LabelOutOfRange {
                    label: out_of_range,
                    n_classes: n,
                });
            }
            counts[[t, p]] += 1;
        }
        Ok(Self {
            labels: labels.iter().map(|s| s.to_string()).collect(),
            counts,
        })
    }

    pub fn total(&self) -> usize {
        self.counts.sum()
    }
}

impl Display for ConfusionMatrix {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let width = self
            .labels
            .iter()
            .map(String::len)
            .max()
            .unwrap_or(0)
            .max(6);
        write!(f, "{:>width$}", "", width = width + 2)?;
        for label in &self.labels {
            write!(f, " {label:>width$}")?;
        }
        writeln!(f)?;
        for (i, label) in self.labels.iter().enumerate() {
            write!(f, "{label:>width$}  ", width = width)?;
            for j in 0..self.labels.len() {
                write!(f, " {:>width$}", self.counts[[i, j]], width = width)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

/// Precision, recall, F1 and support for one class (or one average row).
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: String,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl ClassificationReport {
    /// Derives the report from a confusion matrix. Ratios with a zero
    /// denominator are reported as 0.
    pub fn from_confusion(confusion: &ConfusionMatrix) -> Self {
        let counts = &confusion.counts;
        let total = confusion.total();

        let classes: Vec<ClassMetrics> = confusion
            .labels
            .iter()
            .enumerate()
            .map(|(k, label)| {
                let true_positive = counts[[k, k]];
                let predicted = counts.column(k).sum();
                let support = counts.row(k).sum();
                let precision = ratio(true_positive, predicted);
                let recall = ratio(true_positive, support);
                ClassMetrics {
                    label: label.clone(),
                    precision,
                    recall,
                    f1: harmonic_mean(precision, recall),
                    support,
                }
            })
            .collect();

        let n_classes = classes.len().max(1) as f64;
        let macro_avg = ClassMetrics {
            label: "macro avg".to_string(),
            precision: classes.iter().map(|c| c.precision).sum::<f64>() / n_classes,
            recall: classes.iter().map(|c| c.recall).sum::<f64>() / n_classes,
            f1: classes.iter().map(|c| c.f1).sum::<f64>() / n_classes,
            support: total,
        };

        let weight = |value: fn(&ClassMetrics) -> f64| {
            if total == 0 {
                0.0
            } else {
                classes
                    .iter()
                    .map(|c| value(c) * c.support as f64)
                    .sum::<f64>()
                    / total as f64
            }
        };
        let weighted_avg = ClassMetrics {
            label: "weighted avg".to_string(),
            precision: weight(|c| c.precision),
            recall: weight(|c| c.recall),
            f1: weight(|c| c.f1),
            support: total,
        };

        let correct: usize = (0..classes.len()).map(|k| counts[[k, k]]).sum();
        Self {
            accuracy: ratio(correct, total),
            classes,
            macro_avg,
            weighted_avg,
        }
    }
}

impl Display for ClassificationReport {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9} {:>9}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for class in &self.classes {
            write_metrics_row(f, class)?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>9} {:>9} {:>9.2} {:>9}",
            "accuracy", "", "", self.accuracy, self.weighted_avg.support
        )?;
        write_metrics_row(f, &self.macro_avg)?;
        write_metrics_row(f, &self.weighted_avg)
    }
}

fn write_metrics_row(f: &mut Formatter, metrics: &ClassMetrics) -> fmt::Result {
    writeln!(
        f,
        "{:>14} {:>9.2} {:>9.2} {:>9.2} {:>9}",
        metrics.label, metrics.precision, metrics.recall, metrics.f1, metrics.support
    )
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

fn harmonic_mean(a: f64, b: f64) -> f64 {
    if a + b == 0.0 { 0.0 } else { 2.0 * a * b / (a + b) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const LABELS: [&str; 3] = ["poor", "average", "excellent"];

    #[test]
    fn accuracy_counts_exact_matches() {
        assert_abs_diff_eq!(accuracy(&[0, 1, 2, 1], &[0, 1, 1, 1]).unwrap(), 0.75);
        assert_abs_diff_eq!(accuracy(&[], &[]).unwrap(), 0.0);
        assert!(accuracy(&[0], &[0, 1]).is_err());
    }

    #[test]
    fn confusion_rows_are_truth_and_columns_are_predictions() {
        let truth = [0, 0, 1, 1, 2, 2];
        let predicted = [0, 1, 1, 1, 2, 0];
        let confusion = ConfusionMatrix::from_predictions(&truth, &predicted, &LABELS).unwrap();
        assert_eq!(confusion.counts[[0, 0]], 1);
        assert_eq!(confusion.counts[[0, 1]], 1);
        assert_eq!(confusion.counts[[1, 1]], 2);
        assert_eq!(confusion.counts[[2, 0]], 1);
        assert_eq!(confusion.counts[[2, 2]], 1);
        assert_eq!(confusion.total(), 6);
    }

    #[test]
    fn report_matches_hand_computed_metrics() {
        let truth = [0, 0, 1, 1, 2, 2];
        let predicted = [0, 1, 1, 1, 2, 0];
        let confusion = ConfusionMatrix::from_predictions(&truth, &predicted, &LABELS).unwrap();
        let report = ClassificationReport::from_confusion(&confusion);

        let poor = &report.classes[0];
        assert_abs_diff_eq!(poor.precision, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(poor.recall, 0.5, epsilon = 1e-12);
        assert_eq!(poor.support, 2);

        let average = &report.classes[1];
        assert_abs_diff_eq!(average.precision, 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(average.recall, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(average.f1, 0.8, epsilon = 1e-12);

        assert_abs_diff_eq!(report.accuracy, 4.0 / 6.0, epsilon = 1e-12);
        assert_eq!(report.weighted_avg.support, 6);
        assert!(report.to_string().contains("weighted avg"));
    }

    #[test]
    fn classes_never_predicted_score_zero_precision() {
        let confusion = ConfusionMatrix::from_predictions(&[0, 2], &[0, 0], &LABELS).unwrap();
        let report = ClassificationReport::from_confusion(&confusion);
        assert_eq!(report.classes[2].precision, 0.0);
        assert_eq!(report.classes[2].f1, 0.0);
        assert_eq!(report.classes[1].support, 0);
    }

    #[test]
    fn out_of_range_labels_are_rejected() {
        assert!(ConfusionMatrix::from_predictions(&[3], &[0], &LABELS).is_err());
    }
}
