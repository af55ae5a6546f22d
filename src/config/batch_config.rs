//! Adaptive batch sizing for the training orchestrator.

use super::{EnvLookup, override_from};
use crate::domain::types::ModelFamily;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Relative appetite of each model family for larger batches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FamilyMultipliers {
    pub rating: f64,
    pub gradient_boosting: f64,
    pub random_forest: f64,
    pub goal_rate: f64,
}

impl Default for FamilyMultipliers {
    fn default() -> Self {
        Self {
            rating: 0.1,
            gradient_boosting: 2.0,
            random_forest: 1.0,
            goal_rate: 0.5,
        }
    }
}

impl FamilyMultipliers {
    pub fn get(&self, family: ModelFamily) -> f64 {
        match family {
            ModelFamily::Rating => self.rating,
            ModelFamily::GradientBoosting => self.gradient_boosting,
            ModelFamily::RandomForest => self.random_forest,
            ModelFamily::GoalRate => self.goal_rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub base_batch_size: usize,
    /// Lifetime observations below which batches shrink
    pub low_volume_below: u64,
    pub low_volume_multiplier: f64,
    /// Lifetime observations above which batches shrink further
    pub high_volume_above: u64,
    pub high_volume_multiplier: f64,
    pub family_multipliers: FamilyMultipliers,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            base_batch_size: 10,
            low_volume_below: 20,
            low_volume_multiplier: 0.5,
            high_volume_above: 1000,
            high_volume_multiplier: 0.3,
            family_multipliers: FamilyMultipliers::default(),
        }
    }
}

impl BatchConfig {
    pub fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        override_from(lookup, "BATCH_BASE_SIZE", &mut self.base_batch_size)?;
        override_from(lookup, "BATCH_LOW_VOLUME_MULTIPLIER", &mut self.low_volume_multiplier)?;
        override_from(lookup, "BATCH_HIGH_VOLUME_MULTIPLIER", &mut self.high_volume_multiplier)?;
        Ok(())
    }

    /// Volume multiplier for the given lifetime observation count.
    pub fn volume_multiplier(&self, lifetime_observations: u64) -> f64 {
        if lifetime_observations < self.low_volume_below {
            self.low_volume_multiplier
        } else if lifetime_observations > self.high_volume_above {
            self.high_volume_multiplier
        } else {
            1.0
        }
    }

    /// Adaptive queue threshold for `family`, never below 1.
    pub fn threshold(&self, family: ModelFamily, lifetime_observations: u64) -> usize {
        let raw = self.base_batch_size as f64
            * self.volume_multiplier(lifetime_observations)
            * self.family_multipliers.get(family);
        // Absorb representation error so 10 * 0.5 * 2.0 lands on 10, not 9.
        let floored = (raw + 1e-9).floor();
        if floored.is_finite() && floored >= 1.0 {
            floored as usize
        } else {
            1
        }
    }

    /// Config whose thresholds are `size` for every family at any volume.
    pub fn fixed(size: usize) -> Self {
        Self {
            base_batch_size: size,
            low_volume_multiplier: 1.0,
            high_volume_multiplier: 1.0,
            family_multipliers: FamilyMultipliers {
                rating: 1.0,
                gradient_boosting: 1.0,
                random_forest: 1.0,
                goal_rate: 1.0,
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds_by_volume() {
        let config = BatchConfig::default();

        // Warm-up volume (< 20): base 10 * 0.5
        assert_eq!(config.threshold(ModelFamily::Rating, 0), 1);
        assert_eq!(config.threshold(ModelFamily::GradientBoosting, 5), 10);
        assert_eq!(config.threshold(ModelFamily::RandomForest, 19), 5);
        assert_eq!(config.threshold(ModelFamily::GoalRate, 0), 2);

        // Normal volume
        assert_eq!(config.threshold(ModelFamily::GradientBoosting, 20), 20);
        assert_eq!(config.threshold(ModelFamily::RandomForest, 1000), 10);
        assert_eq!(config.threshold(ModelFamily::GoalRate, 500), 5);

        // High volume (> 1000): base 10 * 0.3
        assert_eq!(config.threshold(ModelFamily::GradientBoosting, 1001), 6);
        assert_eq!(config.threshold(ModelFamily::RandomForest, 5000), 3);
        assert_eq!(config.threshold(ModelFamily::GoalRate, 5000), 1);
    }

    #[test]
    fn test_threshold_never_zero() {
        let mut config = BatchConfig::default();
        config.base_batch_size = 0;
        for family in ModelFamily::ALL {
            assert_eq!(config.threshold(family, 100), 1);
        }
    }

    #[test]
    fn test_fixed_threshold() {
        let config = BatchConfig::fixed(5);
        for family in ModelFamily::ALL {
            assert_eq!(config.threshold(family, 0), 5);
            assert_eq!(config.threshold(family, 50_000), 5);
        }
    }
}
