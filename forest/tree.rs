//! CART decision trees grown with Gini impurity.
//!
//! Trees are stored as flat node arrays so they serialize cleanly into the
//! model file. Node `0` is always the root.

use ndarray::{ArrayView1, ArrayView2};
use rand::Rng;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};

/// Growth limits for a single tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeParams {
    /// Maximum depth of the tree; `None` grows until leaves are pure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<usize>,
    /// A node with fewer samples than this becomes a leaf.
    pub min_samples_split: usize,
    /// Number of randomly chosen candidate features examined at each split.
    pub max_features: usize,
}

/// One node of a fitted tree.
///
/// Internal nodes carry `feature`/`threshold` and route a row left when
/// `row[feature] <= threshold`. Every node keeps the class distribution of the
/// training samples that reached it; for leaves this is the prediction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feature: Option<usize>,
    pub threshold: f64,
    pub left: usize,
    pub right: usize,
    pub distribution: Vec<f64>,
}

impl Node {
    fn leaf(counts: &[usize]) -> Self {
        let total: usize = counts.iter().sum();
        let distribution = counts
            .iter()
            .map(|&c| if total == 0 { 0.0 } else { c as f64 / total as f64 })
            .collect();
        Self {
            feature: None,
            threshold: 0.0,
            left: 0,
            right: 0,
            distribution,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.feature.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<Node>,
}

/// The winning split of a node.
struct Split {
    feature: usize,
    threshold: f64,
}

/// Borrowed training context shared by every recursive call.
struct Grower<'a, 'x, R: Rng + ?Sized> {
    x: ArrayView2<'x, f64>,
    y: &'a [usize],
    n_classes: usize,
    params: &'a TreeParams,
    rng: &'a mut R,
    nodes: Vec<Node>,
}

impl DecisionTree {
    /// Grows a tree on the rows listed in `samples` (duplicates allowed, which is
    /// how bootstrap resamples are expressed).
    pub fn fit<R: Rng + ?Sized>(
        x: ArrayView2<f64>,
        y: &[usize],
        n_classes: usize,
        samples: &[usize],
        params: &TreeParams,
        rng: &mut R,
    ) -> Self {
        let mut grower = Grower {
            x,
            y,
            n_classes,
            params,
            rng,
            nodes: Vec::new(),
        };
        let mut indices = samples.to_vec();
        grower.grow(&mut indices, 0);
        Self {
            nodes: grower.nodes,
        }
    }

    /// Class distribution of the leaf that `row` falls into.
    pub fn predict_proba_row(&self, row: ArrayView1<f64>) -> &[f64] {
        let mut current = 0;
        loop {
            let node = &self.nodes[current];
            match node.feature {
                Some(feature) => {
                    current = if row[feature] <= node.threshold {
                        node.left
                    } else {
                        node.right
                    };
                }
                None => return &node.distribution,
            }
        }
    }

    /// Length of the longest root-to-leaf path (a lone root has depth 0).
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            let node = &nodes[index];
            if node.is_leaf() {
                0
            } else {
                1 + walk(nodes, node.left).max(walk(nodes, node.right))
            }
        }
        if self.nodes.is_empty() {
            0
        } else {
            walk(&self.nodes, 0)
        }
    }
}

impl<R: Rng + ?Sized> Grower<'_, '_, R> {
    fn grow(&mut self, indices: &mut [usize], depth: usize) -> usize {
        let counts = class_counts(self.y, indices, self.n_classes);
        let id = self.nodes.len();
        self.nodes.push(Node::leaf(&counts));

        let is_pure = counts.iter().filter(|&&c| c > 0).count() <= 1;
        let depth_reached = self.params.max_depth.is_some_and(|limit| depth >= limit);
        if is_pure || depth_reached || indices.len() < self.params.min_samples_split.max(2) {
            return id;
        }

        let Some(split) = self.best_split(indices) else {
            return id;
        };

        let x = self.x;
        let boundary = partition_in_place(indices, |row| x[[row, split.feature]] <= split.threshold);
        let (left_rows, right_rows) = indices.split_at_mut(boundary);
        let left = self.grow(left_rows, depth + 1);
        let right = self.grow(right_rows, depth + 1);

        let node = &mut self.nodes[id];
        node.feature = Some(split.feature);
        node.threshold = split.threshold;
        node.left = left;
        node.right = right;
        id
    }

    fn best_split(&mut self, indices: &[usize]) -> Option<Split> {
        let n_features = self.x.ncols();
        let candidates = self.params.max_features.clamp(1, n_features.max(1));
        let features = sample(&mut *self.rng, n_features, candidates);

        let total = indices.len() as f64;
        let mut best: Option<(f64, Split)> = None;
        let mut pairs: Vec<(f64, usize)> = Vec::with_capacity(indices.len());

        for feature in features.iter() {
            pairs.clear();
            pairs.extend(indices.iter().map(|&row| (self.x[[row, feature]], self.y[row])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_counts = vec![0usize; self.n_classes];
            let mut right_counts = class_counts(self.y, indices, self.n_classes);

            for position in 0..pairs.len() - 1 {
                let (value, label) = pairs[position];
                left_counts[label] += 1;
                right_counts[label] -= 1;

                let next_value = pairs[position + 1].0;
                if value >= next_value {
                    continue;
                }

                let n_left = (position + 1) as f64;
                let n_right = total - n_left;
                let impurity = (n_left * gini(&left_counts, n_left)
                    + n_right * gini(&right_counts, n_right))
                    / total;

                if best.as_ref().is_none_or(|(score, _)| impurity < *score) {
                    let midpoint = value + (next_value - value) / 2.0;
                    let threshold = if midpoint < next_value { midpoint } else { value };
                    best = Some((impurity, Split { feature, threshold }));
                }
            }
        }

        best.map(|(_, split)| split)
    }
}

fn class_counts(y: &[usize], indices: &[usize], n_classes: usize) -> Vec<usize> {
    let mut counts = vec![0usize; n_classes];
    for &row in indices {
        counts[y[row]] += 1;
    }
    counts
}

fn gini(counts: &[usize], total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    1.0 - counts
        .iter()
        .map(|&c| {
            let p = c as f64 / total;
            p * p
        })
        .sum::<f64>()
}

/// Moves every index satisfying `goes_left` to the front and returns how many did.
fn partition_in_place(indices: &mut [usize], goes_left: impl Fn(usize) -> bool) -> usize {
    let mut boundary = 0;
    for position in 0..indices.len() {
        if goes_left(indices[position]) {
            indices.swap(boundary, position);
            boundary += 1;
        }
    }
    boundary
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn all_rows(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn separable_data_is_fit_exactly() {
        let x = array![[1.0, 0.0], [2.0, 0.0], [3.0, 0.0], [10.0, 0.0], [11.0, 0.0], [12.0, 0.0]];
        let y = vec![0, 0, 0, 1, 1, 1];
        let params = TreeParams {
            max_depth: None,
            min_samples_split: 2,
            max_features: 2,
        };
        let mut rng = StdRng::seed_from_u64(7);
        let tree = DecisionTree::fit(x.view(), &y, 2, &all_rows(6), &params, &mut rng);

        for (row, &label) in x.rows().into_iter().zip(&y) {
            let proba = tree.predict_proba_row(row);
            assert_abs_diff_eq!(proba[label], 1.0, epsilon = 1e-12);
        }
        assert_eq!(tree.depth(), 1);
        let root = &tree.nodes[0];
        assert_eq!(root.feature, Some(0));
        assert_abs_diff_eq!(root.threshold, 6.5, epsilon = 1e-12);
    }

    #[test]
    fn max_depth_limits_growth() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0], [6.0], [7.0]];
        let y = vec![0, 1, 0, 1, 0, 1, 0, 1];
        let params = TreeParams {
            max_depth: Some(2),
            min_samples_split: 2,
            max_features: 1,
        };
        let mut rng = StdRng::seed_from_u64(1);
        let tree = DecisionTree::fit(x.view(), &y, 2, &all_rows(8), &params, &mut rng);
        assert!(tree.depth() <= 2);
    }

    #[test]
    fn min_samples_split_keeps_small_nodes_as_leaves() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = vec![0, 1, 0];
        let params = TreeParams {
            max_depth: None,
            min_samples_split: 4,
            max_features: 1,
        };
        let mut rng = StdRng::seed_from_u64(3);
        let tree = DecisionTree::fit(x.view(), &y, 2, &all_rows(3), &params, &mut rng);
        assert_eq!(tree.nodes.len(), 1);
        assert_abs_diff_eq!(tree.nodes[0].distribution[0], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn constant_features_produce_a_single_leaf() {
        let x = array![[5.0], [5.0], [5.0], [5.0]];
        let y = vec![0, 1, 2, 1];
        let params = TreeParams {
            max_depth: None,
            min_samples_split: 2,
            max_features: 1,
        };
        let mut rng = StdRng::seed_from_u64(11);
        let tree = DecisionTree::fit(x.view(), &y, 3, &all_rows(4), &params, &mut rng);
        assert_eq!(tree.nodes.len(), 1);
        assert_abs_diff_eq!(tree.nodes[0].distribution[1], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn gini_of_pure_and_balanced_nodes() {
        assert_abs_diff_eq!(gini(&[4, 0], 4.0), 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(gini(&[2, 2], 4.0), 0.5, epsilon = 1e-12);
    }
}
