//! Tree-engine configuration: gradient boosting and random forest.

use super::{EnvLookup, override_from};
use crate::domain::tree::TreeParams;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub learning_rate: f64,
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Below this many examples retraining is refused
    pub min_training_samples: usize,
    /// FIFO cap on the labelled rows kept for retraining
    pub training_window: usize,
    pub weight: f64,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            num_trees: 100,
            max_depth: 3,
            min_samples_leaf: 5,
            min_training_samples: 10,
            training_window: 2000,
            weight: 0.10,
        }
    }
}

impl BoostingConfig {
    pub fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        override_from(lookup, "GB_LEARNING_RATE", &mut self.learning_rate)?;
        override_from(lookup, "GB_NUM_TREES", &mut self.num_trees)?;
        override_from(lookup, "GB_MAX_DEPTH", &mut self.max_depth)?;
        override_from(lookup, "GB_MIN_SAMPLES_LEAF", &mut self.min_samples_leaf)?;
        override_from(lookup, "GB_MIN_TRAINING_SAMPLES", &mut self.min_training_samples)?;
        override_from(lookup, "GB_TRAINING_WINDOW", &mut self.training_window)?;
        override_from(lookup, "GB_WEIGHT", &mut self.weight)?;
        Ok(())
    }

    pub fn tree_params(&self) -> TreeParams {
        TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            max_features: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestConfig {
    pub num_trees: usize,
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split. `None` uses the square root of the dimension.
    pub max_features: Option<usize>,
    pub min_training_samples: usize,
    pub training_window: usize,
    pub weight: f64,
    /// Base seed for bootstrap sampling; tree `i` uses `seed + i`
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: 100,
            max_depth: 6,
            min_samples_leaf: 3,
            max_features: None,
            min_training_samples: 20,
            training_window: 2000,
            weight: 0.07,
            seed: 42,
        }
    }
}

impl ForestConfig {
    pub fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        override_from(lookup, "RF_NUM_TREES", &mut self.num_trees)?;
        override_from(lookup, "RF_MAX_DEPTH", &mut self.max_depth)?;
        override_from(lookup, "RF_MIN_SAMPLES_LEAF", &mut self.min_samples_leaf)?;
        override_from(lookup, "RF_MIN_TRAINING_SAMPLES", &mut self.min_training_samples)?;
        override_from(lookup, "RF_TRAINING_WINDOW", &mut self.training_window)?;
        override_from(lookup, "RF_WEIGHT", &mut self.weight)?;
        override_from(lookup, "RF_SEED", &mut self.seed)?;

        let mut max_features = self.max_features.unwrap_or(0);
        override_from(lookup, "RF_MAX_FEATURES", &mut max_features)?;
        if max_features > 0 {
            self.max_features = Some(max_features);
        }
        Ok(())
    }

    /// Split parameters for a feature matrix of the given width.
    pub fn tree_params(&self, dimension: usize) -> TreeParams {
        let sqrt = (dimension as f64).sqrt().floor() as usize;
        TreeParams {
            max_depth: self.max_depth,
            min_samples_leaf: self.min_samples_leaf,
            max_features: Some(self.max_features.unwrap_or(sqrt).clamp(1, dimension.max(1))),
        }
    }
}
