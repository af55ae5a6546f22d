//! Rating engine configuration.
//!
//! Every K-factor multiplier lives here rather than in code, together with the
//! seed table and the division table that drives the rivalry multiplier.

use super::{EnvLookup, override_from, parse_pairs};
use crate::domain::rating::{KFactorPolicy, SeedTable};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EloConfig {
    pub initial_rating: f64,
    /// Per-team offsets added to the initial rating on first sight
    pub seed_adjustments: HashMap<String, f64>,
    pub k_factor: f64,
    pub home_advantage: f64,
    pub history_cap: usize,
    pub weight: f64,

    // Dynamic K-factor
    pub experience_horizon: f64,
    pub experience_floor: f64,
    pub extra_time_multiplier: f64,
    pub blowout_margin: u32,
    pub blowout_multiplier: f64,
    pub decisive_margin: u32,
    pub decisive_multiplier: f64,
    pub rating_gap_threshold: f64,
    pub expected_result_multiplier: f64,
    pub upset_multiplier: f64,
    pub playoff_multiplier: f64,
    pub rivalry_multiplier: f64,
    /// Team to division. Rivalry applies only when both teams share a division.
    pub divisions: HashMap<String, String>,

    // Seasonal decay
    pub idle_decay_days: i64,
    pub decay_retention: f64,
}

impl Default for EloConfig {
    fn default() -> Self {
        let policy = KFactorPolicy::default();
        Self {
            initial_rating: 1500.0,
            seed_adjustments: HashMap::new(),
            k_factor: policy.base_k,
            home_advantage: 100.0,
            history_cap: 100,
            weight: 0.20,
            experience_horizon: policy.experience_horizon,
            experience_floor: policy.experience_floor,
            extra_time_multiplier: policy.extra_time_multiplier,
            blowout_margin: policy.blowout_margin,
            blowout_multiplier: policy.blowout_multiplier,
            decisive_margin: policy.decisive_margin,
            decisive_multiplier: policy.decisive_multiplier,
            rating_gap_threshold: policy.rating_gap_threshold,
            expected_result_multiplier: policy.expected_result_multiplier,
            upset_multiplier: policy.upset_multiplier,
            playoff_multiplier: policy.playoff_multiplier,
            rivalry_multiplier: policy.rivalry_multiplier,
            divisions: HashMap::new(),
            idle_decay_days: 7,
            decay_retention: 0.95,
        }
    }
}

impl EloConfig {
    pub fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        override_from(lookup, "ELO_INITIAL_RATING", &mut self.initial_rating)?;
        override_from(lookup, "ELO_K_FACTOR", &mut self.k_factor)?;
        override_from(lookup, "ELO_HOME_ADVANTAGE", &mut self.home_advantage)?;
        override_from(lookup, "ELO_HISTORY_CAP", &mut self.history_cap)?;
        override_from(lookup, "ELO_WEIGHT", &mut self.weight)?;
        override_from(lookup, "ELO_UPSET_MULTIPLIER", &mut self.upset_multiplier)?;
        override_from(lookup, "ELO_PLAYOFF_MULTIPLIER", &mut self.playoff_multiplier)?;
        override_from(lookup, "ELO_RIVALRY_MULTIPLIER", &mut self.rivalry_multiplier)?;
        override_from(lookup, "ELO_IDLE_DECAY_DAYS", &mut self.idle_decay_days)?;

        // Divisions as "TOR:atlantic,MTL:atlantic"
        if let Some(raw) = lookup("ELO_DIVISIONS") {
            self.divisions = parse_pairs(&raw);
        }
        Ok(())
    }

    pub fn k_factor_policy(&self) -> KFactorPolicy {
        KFactorPolicy {
            base_k: self.k_factor,
            experience_horizon: self.experience_horizon,
            experience_floor: self.experience_floor,
            extra_time_multiplier: self.extra_time_multiplier,
            blowout_margin: self.blowout_margin,
            blowout_multiplier: self.blowout_multiplier,
            decisive_margin: self.decisive_margin,
            decisive_multiplier: self.decisive_multiplier,
            rating_gap_threshold: self.rating_gap_threshold,
            expected_result_multiplier: self.expected_result_multiplier,
            upset_multiplier: self.upset_multiplier,
            playoff_multiplier: self.playoff_multiplier,
            rivalry_multiplier: self.rivalry_multiplier,
        }
    }

    pub fn seed_table(&self) -> SeedTable {
        SeedTable::new(self.initial_rating, self.seed_adjustments.clone())
    }

    pub fn same_division(&self, home: &str, away: &str) -> bool {
        match (self.divisions.get(home), self.divisions.get(away)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }
}
