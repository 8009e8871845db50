//! Seeded train/test partitions and stratified cross-validation folds.

use super::ensemble::ForestError;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;

/// Row indices of one partition. Both vectors are sorted ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Splits rows into train/test partitions.
///
/// When `stratify` is set each class is shuffled on its own and
/// `round(class_size * test_fraction)` of its rows go to the test partition, so
/// the class balance is preserved. Otherwise all rows are shuffled together and
/// `ceil(n * test_fraction)` rows are held out.
pub fn train_test_split(
    labels: &[usize],
    test_fraction: f64,
    seed: u64,
    stratify: bool,
) -> Result<SplitIndices, ForestError> {
    if !(test_fraction > 0.0 && test_fraction < 1.0) {
        return Err(ForestError::InvalidParams(format!(
            "test fraction must lie strictly between 0 and 1, got {test_fraction}"
        )));
    }
    if labels.len() < 2 {
        return Err(ForestError::InvalidParams(format!(
            "need at least two rows to split, got {}",
            labels.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(labels.len());
    let mut test = Vec::new();

    if stratify {
        for (_, mut members) in rows_by_class(labels) {
            members.shuffle(&mut rng);
            let held_out = (members.len() as f64 * test_fraction).round() as usize;
            test.extend_from_slice(&members[..held_out]);
            train.extend_from_slice(&members[held_out..]);
        }
    } else {
        let mut rows: Vec<usize> = (0..labels.len()).collect();
        rows.shuffle(&mut rng);
        let held_out = (labels.len() as f64 * test_fraction).ceil() as usize;
        test.extend_from_slice(&rows[..held_out]);
        train.extend_from_slice(&rows[held_out..]);
    }

    if train.is_empty() || test.is_empty() {
        return Err(ForestError::InvalidParams(format!(
            "a test fraction of {test_fraction} leaves one partition empty for {} rows",
            labels.len()
        )));
    }

    train.sort_unstable();
    test.sort_unstable();
    Ok(SplitIndices { train, test })
}

/// Deals each class's shuffled rows round-robin into `k` folds and returns, for
/// every fold, the rows outside it (`train`) and the fold itself (`test`).
pub fn stratified_k_fold(
    labels: &[usize],
    k: usize,
    seed: u64,
) -> Result<Vec<SplitIndices>, ForestError> {
    if k < 2 || k > labels.len() {
        return Err(ForestError::InvalidParams(format!(
            "cannot build {k} folds from {} rows",
            labels.len()
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut folds: Vec<Vec<usize>> = vec![Vec::new(); k];
    let mut next_fold = 0;
    for (_, mut members) in rows_by_class(labels) {
        members.shuffle(&mut rng);
        for row in members {
            folds[next_fold].push(row);
            next_fold = (next_fold + 1) % k;
        }
    }

    Ok((0..k)
        .map(|held_out| {
            let mut test = folds[held_out].clone();
            let mut train: Vec<usize> = folds
                .iter()
                .enumerate()
                .filter(|(fold, _)| *fold != held_out)
                .flat_map(|(_, rows)| rows.iter().copied())
                .collect();
            test.sort_unstable();
            train.sort_unstable();
            SplitIndices { train, test }
        })
        .collect())
}

fn rows_by_class(labels: &[usize]) -> BTreeMap<usize, Vec<usize>> {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (row, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }
    groups
}
