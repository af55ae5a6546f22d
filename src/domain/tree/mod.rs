//! Regression trees shared by the boosting and forest engines.

pub mod builder;
pub mod node;

pub use builder::{RegressionTreeBuilder, TreeParams};
pub use node::{GBTree, GBTreeNode, feature_importance, rank_importance};
