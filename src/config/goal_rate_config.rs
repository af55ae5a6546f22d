//! Goal-rate (Poisson) model configuration.

use super::{EnvLookup, override_from};
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GoalRateConfig {
    /// Goals per game across the league
    pub league_average: f64,
    pub home_multiplier: f64,
    pub learning_rate: f64,
    pub min_offensive_rate: f64,
    pub max_offensive_rate: f64,
    pub min_defensive_rate: f64,
    pub max_defensive_rate: f64,
    pub min_expected_goals: f64,
    pub max_expected_goals: f64,
    pub weight: f64,
}

impl Default for GoalRateConfig {
    fn default() -> Self {
        Self {
            league_average: 3.1,
            home_multiplier: 1.08,
            learning_rate: 0.1,
            min_offensive_rate: 0.5,
            max_offensive_rate: 1.8,
            min_defensive_rate: 0.6,
            max_defensive_rate: 1.5,
            min_expected_goals: 0.5,
            max_expected_goals: 7.0,
            weight: 0.15,
        }
    }
}

impl GoalRateConfig {
    pub fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        override_from(lookup, "GOAL_RATE_LEAGUE_AVERAGE", &mut self.league_average)?;
        override_from(lookup, "GOAL_RATE_HOME_MULTIPLIER", &mut self.home_multiplier)?;
        override_from(lookup, "GOAL_RATE_LEARNING_RATE", &mut self.learning_rate)?;
        override_from(lookup, "GOAL_RATE_WEIGHT", &mut self.weight)?;
        Ok(())
    }
}
