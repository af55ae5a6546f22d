//! Locations of the persisted state documents.

use super::{EnvLookup, override_from};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const ELO_STATE_FILE: &str = "elo_ratings.json";
pub const BOOSTING_STATE_FILE: &str = "gradient_boosting.json";
pub const FOREST_STATE_FILE: &str = "random_forest.json";
pub const GOAL_RATE_STATE_FILE: &str = "goal_rates.json";
pub const BATCH_QUEUE_FILE: &str = "batch_queues.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
        }
    }
}

impl PersistenceConfig {
    pub fn apply_env(&mut self, lookup: EnvLookup<'_>) -> Result<()> {
        override_from(lookup, "MATCHCAST_DATA_DIR", &mut self.data_dir)
    }

    pub fn path_for(&self, file_name: &str) -> PathBuf {
        self.data_dir.join(file_name)
    }
}
