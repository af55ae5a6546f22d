//! Port interfaces between the engines, the orchestrator and external collaborators.

use crate::domain::errors::ModelError;
use crate::domain::types::{ModelFamily, ModelResult, Observation, TeamFeatures, TrainingReport};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Serving contract shared by every scoring model.
///
/// `predict` is read-only and safe to call from many threads at once. An untrained
/// model answers with a neutral, low-confidence result instead of an error; the only
/// failure it may report is a rejected input.
pub trait PredictionModel: Send + Sync {
    fn predict(&self, home: &TeamFeatures, away: &TeamFeatures)
    -> Result<ModelResult, ModelError>;

    /// Display name used in ensemble output
    fn name(&self) -> &str;

    /// Default weight of this model in the ensemble blend
    fn weight(&self) -> f64;
}

/// Training contract driven by the batch orchestrator.
pub trait BatchTrainable: Send + Sync {
    fn family(&self) -> ModelFamily;

    /// Absorb a batch of finished observations. Nothing is committed on error.
    fn train_batch(&self, batch: &[Observation]) -> Result<TrainingReport, ModelError>;

    /// Write the committed model state to durable storage.
    fn persist(&self) -> anyhow::Result<()>;

    /// Ids of the most recently absorbed batch, as last persisted with the model.
    fn absorbed_ids(&self) -> HashSet<String>;
}

/// Source of engineered per-entity features (external collaborator).
pub trait FeatureProvider: Send + Sync {
    fn team_features(&self, team_id: &str, as_of: DateTime<Utc>) -> Option<TeamFeatures>;
}
