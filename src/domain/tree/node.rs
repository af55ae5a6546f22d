use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Node of a regression tree. Rows route left iff `row[feature_index] <= threshold`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GBTreeNode {
    Leaf {
        prediction: f64,
        samples: usize,
    },
    Split {
        feature_index: usize,
        threshold: f64,
        samples: usize,
        left: Box<GBTreeNode>,
        right: Box<GBTreeNode>,
    },
}

impl GBTreeNode {
    pub fn leaf(prediction: f64, samples: usize) -> Self {
        GBTreeNode::Leaf {
            prediction,
            samples,
        }
    }

    pub fn samples(&self) -> usize {
        match self {
            GBTreeNode::Leaf { samples, .. } | GBTreeNode::Split { samples, .. } => *samples,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, GBTreeNode::Leaf { .. })
    }

    /// Leaf value reached by `row`. Missing feature values read as 0.
    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                GBTreeNode::Leaf { prediction, .. } => return *prediction,
                GBTreeNode::Split {
                    feature_index,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    let value = row.get(*feature_index).copied().unwrap_or(0.0);
                    node = if value <= *threshold { left } else { right };
                }
            }
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            GBTreeNode::Leaf { .. } => 0,
            GBTreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }

    fn add_split_samples(&self, counts: &mut BTreeMap<usize, usize>) {
        if let GBTreeNode::Split {
            feature_index,
            samples,
            left,
            right,
            ..
        } = self
        {
            *counts.entry(*feature_index).or_insert(0) += samples;
            left.add_split_samples(counts);
            right.add_split_samples(counts);
        }
    }
}

/// One immutable regression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GBTree {
    pub root: GBTreeNode,
}

impl GBTree {
    pub fn new(root: GBTreeNode) -> Self {
        Self { root }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.root.predict(row)
    }
}

/// Importance of every feature used by a split: the summed sample counts of the
/// split nodes on that feature, across all trees. Keys are `feature_{i}`.
pub fn feature_importance(trees: &[GBTree]) -> BTreeMap<String, f64> {
    let mut counts = BTreeMap::new();
    for tree in trees {
        tree.root.add_split_samples(&mut counts);
    }
    counts
        .into_iter()
        .map(|(idx, samples)| (format!("feature_{idx}"), samples as f64))
        .collect()
}

/// Importance entries sorted by descending score, then by name.
pub fn rank_importance(importance: &BTreeMap<String, f64>) -> Vec<(String, f64)> {
    let mut ranked: Vec<(String, f64)> = importance
        .iter()
        .map(|(name, score)| (name.clone(), *score))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature_index: usize, threshold: f64, samples: usize) -> GBTreeNode {
        GBTreeNode::Split {
            feature_index,
            threshold,
            samples,
            left: Box::new(GBTreeNode::leaf(-1.0, samples / 2)),
            right: Box::new(GBTreeNode::leaf(1.0, samples - samples / 2)),
        }
    }

    #[test]
    fn test_routing_is_inclusive_on_left() {
        let tree = GBTree::new(stump(0, 0.5, 10));
        assert_eq!(tree.predict(&[0.5]), -1.0);
        assert_eq!(tree.predict(&[0.51]), 1.0);
        assert_eq!(tree.root.depth(), 1);
    }

    #[test]
    fn test_importance_sums_split_samples() {
        let trees = vec![
            GBTree::new(stump(0, 0.5, 10)),
            GBTree::new(stump(2, 1.0, 6)),
            GBTree::new(stump(0, 0.1, 4)),
            GBTree::new(GBTreeNode::leaf(0.2, 8)),
        ];
        let importance = feature_importance(&trees);
        assert_eq!(importance.get("feature_0"), Some(&14.0));
        assert_eq!(importance.get("feature_2"), Some(&6.0));
        assert!(!importance.contains_key("feature_1"));

        let ranked = rank_importance(&importance);
        assert_eq!(ranked[0].0, "feature_0");
    }

    #[test]
    fn test_node_serializes_with_kind_tag() {
        let json = serde_json::to_string(&stump(1, 2.0, 3)).unwrap();
        assert!(json.contains("\"kind\":\"split\""));
        let back: GBTreeNode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stump(1, 2.0, 3));
    }
}
