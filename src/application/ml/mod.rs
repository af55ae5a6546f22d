//! Scoring engines. Each one serves predictions through `PredictionModel` and
//! learns through `BatchTrainable`.

pub mod elo_rating;
pub mod goal_rate;
pub mod gradient_boosting;
pub mod random_forest;
pub mod training_window;

pub use elo_rating::{EloRatingEngine, RatingStateDocument};
pub use goal_rate::{GoalRateEngine, GoalRateStateDocument};
pub use gradient_boosting::{BoostingStateDocument, GradientBoostingEngine};
pub use random_forest::{ForestStateDocument, RandomForestEngine};
pub use training_window::{TrainingExample, TrainingWindow};

use crate::domain::errors::ModelError;
use crate::domain::repositories::DocumentRepository;
use crate::domain::types::{ModelFamily, ModelResult, Observation};
use std::time::Instant;
use tracing::{info, warn};

/// Load a persisted engine document, falling back to a cold start when it is
/// missing, unreadable or written by an incompatible schema.
pub(crate) fn restore_document<T>(
    repository: &dyn DocumentRepository<T>,
    component: &str,
    expected_version: u32,
    version_of: impl Fn(&T) -> u32,
) -> Option<T> {
    match repository.load() {
        Ok(Some(document)) => {
            let version = version_of(&document);
            if version == expected_version {
                info!(
                    "{}: restored state from {}",
                    component,
                    repository.location()
                );
                Some(document)
            } else {
                warn!(
                    "{}: ignoring state at {} with schema version {} (expected {}), starting cold",
                    component,
                    repository.location(),
                    version,
                    expected_version
                );
                None
            }
        }
        Ok(None) => {
            info!("{}: no saved state, starting cold", component);
            None
        }
        Err(e) => {
            warn!(
                "{}: failed to load state from {}: {:#}. Starting cold.",
                component,
                repository.location(),
                e
            );
            None
        }
    }
}

/// Reject observations that must never reach a model.
pub(crate) fn validate_observation(obs: &Observation) -> Result<(), ModelError> {
    if !obs.game_state.is_terminal() {
        return Err(ModelError::NotFinished {
            observation_id: obs.id.clone(),
            state: obs.game_state.to_string(),
        });
    }
    let invalid = |reason: &str| ModelError::InvalidObservation {
        observation_id: obs.id.clone(),
        reason: reason.to_string(),
    };
    if obs.id.trim().is_empty() {
        return Err(invalid("empty observation id"));
    }
    if obs.home_team.trim().is_empty() || obs.away_team.trim().is_empty() {
        return Err(invalid("empty team id"));
    }
    if obs.home_team == obs.away_team {
        return Err(invalid("team cannot play itself"));
    }
    Ok(())
}

/// Error for a non-empty batch in which no observation produced a usable
/// feature row. Nothing is committed, so the caller keeps the batch queued.
pub(crate) fn no_usable_rows(
    family: ModelFamily,
    batch_len: usize,
    component: &str,
) -> ModelError {
    warn!(
        "{}: none of {} observations had usable features, nothing absorbed",
        component, batch_len
    );
    ModelError::TrainingFailed {
        families: family.as_str().to_string(),
    }
}

/// Neutral answer of a model that has not learned anything yet.
pub(crate) fn untrained_result(model_name: &str, weight: f64, started: Instant) -> ModelResult {
    ModelResult {
        model_name: model_name.to_string(),
        win_probability: 0.5,
        confidence: 0.3,
        predicted_score: "3-2".to_string(),
        weight,
        processing_time_ms: elapsed_ms(started),
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::GameState;
    use crate::infrastructure::persistence::InMemoryDocumentRepository;
    use chrono::Utc;

    #[test]
    fn test_validation_rules() {
        let now = Utc::now();
        let ok = Observation::new("g1", "TOR", "MTL", 3, 2, now);
        assert!(validate_observation(&ok).is_ok());

        let live = ok.clone().with_state(GameState::Live);
        assert!(matches!(
            validate_observation(&live),
            Err(ModelError::NotFinished { .. })
        ));

        let mirror = Observation::new("g2", "TOR", "TOR", 3, 2, now);
        assert!(matches!(
            validate_observation(&mirror),
            Err(ModelError::InvalidObservation { .. })
        ));

        let anonymous = Observation::new("g3", "", "MTL", 3, 2, now);
        assert!(validate_observation(&anonymous).is_err());
    }

    #[test]
    fn test_restore_rejects_other_schema() {
        let repo = InMemoryDocumentRepository::with_document((7u32, "payload".to_string()));
        assert!(restore_document(&repo, "Test", 1, |doc| doc.0).is_none());
        assert!(restore_document(&repo, "Test", 7, |doc| doc.0).is_some());
    }
}
