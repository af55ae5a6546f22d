//! Configuration module for matchcast.
//!
//! Defaults come from each sub-config's `Default`. An optional TOML file named by
//! `MATCHCAST_CONFIG_FILE` replaces them, and single environment variables then
//! override individual fields.

mod batch_config;
mod boosting_config;
mod elo_config;
mod goal_rate_config;
mod persistence_config;

pub use batch_config::{BatchConfig, FamilyMultipliers};
pub use boosting_config::{BoostingConfig, ForestConfig};
pub use elo_config::EloConfig;
pub use goal_rate_config::GoalRateConfig;
pub use persistence_config::{
    BATCH_QUEUE_FILE, BOOSTING_STATE_FILE, ELO_STATE_FILE, FOREST_STATE_FILE,
    GOAL_RATE_STATE_FILE, PersistenceConfig,
};

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use tracing::info;

/// Environment variable naming the optional TOML configuration file
pub const CONFIG_FILE_VAR: &str = "MATCHCAST_CONFIG_FILE";

/// Source of environment values, injectable so overrides can be tested
/// without touching the process environment.
pub type EnvLookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub elo: EloConfig,
    pub boosting: BoostingConfig,
    pub forest: ForestConfig,
    pub goal_rate: GoalRateConfig,
    pub batch: BatchConfig,
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::load(&|key: &str| env::var(key).ok())
    }

    /// Load configuration through `lookup`: optional TOML file, then overrides.
    pub fn load(lookup: EnvLookup<'_>) -> Result<Self> {
        let mut config = match lookup(CONFIG_FILE_VAR) {
            Some(path) => Self::from_toml_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(lookup)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        let config = Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        self.elo
            .apply_env(lookup)
            .context("Failed to load rating config")?;
        self.boosting
            .apply_env(lookup)
            .context("Failed to load boosting config")?;
        self.forest
            .apply_env(lookup)
            .context("Failed to load forest config")?;
        self.goal_rate
            .apply_env(lookup)
            .context("Failed to load goal-rate config")?;
        self.batch
            .apply_env(lookup)
            .context("Failed to load batch config")?;
        self.persistence
            .apply_env(lookup)
            .context("Failed to load persistence config")?;
        Ok(())
    }

    /// Reject values the engines cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.elo.history_cap == 0 {
            bail!("elo.history_cap must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.elo.decay_retention) {
            bail!(
                "elo.decay_retention must be in [0, 1], got {}",
                self.elo.decay_retention
            );
        }
        if self.boosting.num_trees == 0 || self.forest.num_trees == 0 {
            bail!("tree engines need at least one tree");
        }
        if self.boosting.learning_rate <= 0.0 {
            bail!("boosting.learning_rate must be positive");
        }
        if self.boosting.training_window < self.boosting.min_training_samples {
            bail!("boosting.training_window is smaller than min_training_samples");
        }
        if self.forest.training_window < self.forest.min_training_samples {
            bail!("forest.training_window is smaller than min_training_samples");
        }
        if self.goal_rate.min_offensive_rate > self.goal_rate.max_offensive_rate
            || self.goal_rate.min_defensive_rate > self.goal_rate.max_defensive_rate
        {
            bail!("goal_rate bounds are inverted");
        }
        for (name, weight) in [
            ("elo", self.elo.weight),
            ("boosting", self.boosting.weight),
            ("forest", self.forest.weight),
            ("goal_rate", self.goal_rate.weight),
        ] {
            if !(0.0..=1.0).contains(&weight) {
                bail!("{}.weight must be in [0, 1], got {}", name, weight);
            }
        }
        Ok(())
    }
}

/// Replace `target` with the parsed value of `key` when it is set.
pub(crate) fn override_from<T>(lookup: EnvLookup<'_>, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    if let Some(raw) = lookup(key) {
        *target = raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Failed to parse {}", key))?;
    }
    Ok(())
}

/// Parse `"a:x,b:y"` into a map, skipping malformed entries.
pub(crate) fn parse_pairs(raw: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for entry in raw.split(',') {
        if let Some((key, value)) = entry.split_once(':') {
            map.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    map
}
