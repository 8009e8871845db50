#![deny(dead_code)]
#![deny(unused_imports)]

//! Tree-ensemble classification over dense `ndarray` feature matrices.
//!
//! Labels are class indices in `0..n_classes`. Everything here is independent of
//! the tabular layer; callers convert their tables into an `Array2<f64>` and a
//! label vector first.

pub mod ensemble;
pub mod metrics;
pub mod search;
pub mod split;
pub mod tree;

pub use ensemble::{ForestError, ForestParams, RandomForest};
pub use metrics::{ClassMetrics, ClassificationReport, ConfusionMatrix, accuracy};
pub use search::{ParamGrid, SearchOutcome, grid_search};
pub use split::{SplitIndices, stratified_k_fold, train_test_split};
pub use tree::{DecisionTree, Node, TreeParams};
