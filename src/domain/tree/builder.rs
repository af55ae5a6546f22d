//! Depth-bounded regression tree construction by variance reduction.

use super::node::{GBTree, GBTreeNode};
use rand::rngs::StdRng;
use rand::seq::index::sample;

/// Targets closer than this to the first target count as identical
const PURITY_TOLERANCE: f64 = 1e-4;
/// Minimum variance reduction for a split to be worth making
const MIN_GAIN: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features examined per node. `None` examines all of them.
    pub max_features: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature_index: usize,
    threshold: f64,
    gain: f64,
}

/// Builds regression trees over a fixed row-major feature matrix.
pub struct RegressionTreeBuilder<'a> {
    features: &'a [Vec<f64>],
    targets: &'a [f64],
    params: TreeParams,
    dimension: usize,
}

impl<'a> RegressionTreeBuilder<'a> {
    pub fn new(features: &'a [Vec<f64>], targets: &'a [f64], params: TreeParams) -> Self {
        let dimension = features.first().map(Vec::len).unwrap_or(0);
        Self {
            features,
            targets,
            params,
            dimension,
        }
    }

    /// Tree over every row.
    pub fn build(&self, rng: Option<&mut StdRng>) -> GBTree {
        let rows = self.features.len().min(self.targets.len());
        self.build_on((0..rows).collect(), rng)
    }

    /// Tree over the given row indices (repeats allowed, as in a bootstrap sample).
    /// With an rng and `max_features`, each node examines a random feature subset.
    pub fn build_on(&self, rows: Vec<usize>, mut rng: Option<&mut StdRng>) -> GBTree {
        GBTree::new(self.grow(rows, 0, &mut rng))
    }

    fn grow(&self, rows: Vec<usize>, depth: usize, rng: &mut Option<&mut StdRng>) -> GBTreeNode {
        let n = rows.len();
        let targets: Vec<f64> = rows.iter().map(|&r| self.targets[r]).collect();
        let leaf_value = if n == 0 {
            0.0
        } else {
            targets.iter().sum::<f64>() / n as f64
        };

        if depth >= self.params.max_depth || n <= self.params.min_samples_leaf || is_pure(&targets)
        {
            return GBTreeNode::leaf(leaf_value, n);
        }

        let candidates = self.candidate_features(rng);
        let Some(best) = self.best_split(&rows, &candidates) else {
            return GBTreeNode::leaf(leaf_value, n);
        };

        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .into_iter()
            .partition(|&r| self.features[r][best.feature_index] <= best.threshold);

        if left.is_empty() || right.is_empty() {
            return GBTreeNode::leaf(leaf_value, n);
        }

        GBTreeNode::Split {
            feature_index: best.feature_index,
            threshold: best.threshold,
            samples: n,
            left: Box::new(self.grow(left, depth + 1, rng)),
            right: Box::new(self.grow(right, depth + 1, rng)),
        }
    }

    fn candidate_features(&self, rng: &mut Option<&mut StdRng>) -> Vec<usize> {
        match (self.params.max_features, rng.as_deref_mut()) {
            (Some(k), Some(rng)) if k > 0 && k < self.dimension => {
                let mut picked = sample(rng, self.dimension, k).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..self.dimension).collect(),
        }
    }

    /// Best variance-reducing split. Scans each feature once over sorted values
    /// with prefix sums; ties keep the earliest candidate.
    fn best_split(&self, rows: &[usize], features: &[usize]) -> Option<SplitCandidate> {
        let n = rows.len();
        let min_leaf = self.params.min_samples_leaf.max(1);
        let total = n as f64;

        let sum: f64 = rows.iter().map(|&r| self.targets[r]).sum();
        let sum_sq: f64 = rows.iter().map(|&r| self.targets[r].powi(2)).sum();
        let parent_var = node_variance(sum, sum_sq, total);

        let mut best: Option<SplitCandidate> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);

        for &feature in features {
            pairs.clear();
            pairs.extend(
                rows.iter()
                    .map(|&r| (self.features[r][feature], self.targets[r])),
            );
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for i in 1..n {
                let (prev_value, prev_target) = pairs[i - 1];
                left_sum += prev_target;
                left_sq += prev_target * prev_target;

                let value = pairs[i].0;
                if value <= prev_value {
                    continue;
                }
                if i < min_leaf || n - i < min_leaf {
                    continue;
                }

                let left_n = i as f64;
                let right_n = total - left_n;
                let left_var = node_variance(left_sum, left_sq, left_n);
                let right_var = node_variance(sum - left_sum, sum_sq - left_sq, right_n);
                let weighted = (left_n / total) * left_var + (right_n / total) * right_var;
                let gain = parent_var - weighted;

                if best.is_none_or(|b| gain > b.gain) {
                    best = Some(SplitCandidate {
                        feature_index: feature,
                        threshold: midpoint(prev_value, value),
                        gain,
                    });
                }
            }
        }

        best.filter(|b| b.gain > MIN_GAIN)
    }
}

fn is_pure(targets: &[f64]) -> bool {
    match targets.first() {
        None => true,
        Some(first) => targets
            .iter()
            .all(|t| (t - first).abs() <= PURITY_TOLERANCE),
    }
}

fn node_variance(sum: f64, sum_sq: f64, count: f64) -> f64 {
    if count <= 0.0 {
        return 0.0;
    }
    let mean = sum / count;
    (sum_sq / count - mean * mean).max(0.0)
}

/// Midpoint that still separates `low` from `high` for adjacent floats.
fn midpoint(low: f64, high: f64) -> f64 {
    let mid = low + (high - low) / 2.0;
    if mid >= high { low } else { mid }
}
