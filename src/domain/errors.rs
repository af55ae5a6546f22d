use thiserror::Error;

/// Errors raised by the prediction engines and the training pipeline
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Game {observation_id} not finished yet (state: {state})")]
    NotFinished { observation_id: String, state: String },

    #[error("Invalid observation {observation_id}: {reason}")]
    InvalidObservation {
        observation_id: String,
        reason: String,
    },

    #[error("Malformed feature vector: {reason}")]
    MalformedFeatures { reason: String },

    #[error("Insufficient training data: need at least {required} samples, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Batch training failed for: {families}")]
    TrainingFailed { families: String },

    #[error("Lock poisoned: {resource}")]
    LockPoisoned { resource: String },

    #[error("Persistence failed: {reason}")]
    Persistence { reason: String },
}

impl ModelError {
    pub fn lock_poisoned(resource: &str) -> Self {
        ModelError::LockPoisoned {
            resource: resource.to_string(),
        }
    }

    pub fn wrong_width(expected: usize, actual: usize) -> Self {
        ModelError::MalformedFeatures {
            reason: format!("expected {} values, got {}", expected, actual),
        }
    }

    pub fn non_finite_feature(index: usize, value: f64) -> Self {
        ModelError::MalformedFeatures {
            reason: format!("value {} at position {} is not finite", value, index),
        }
    }

    pub fn persistence(err: &anyhow::Error) -> Self {
        ModelError::Persistence {
            reason: format!("{:#}", err),
        }
    }

    /// Rejected input leaves all state untouched and is not worth retrying.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ModelError::NotFinished { .. }
                | ModelError::InvalidObservation { .. }
                | ModelError::MalformedFeatures { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_finished_formatting() {
        let err = ModelError::NotFinished {
            observation_id: "2025020417".to_string(),
            state: "LIVE".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("2025020417"));
        assert!(msg.contains("LIVE"));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_insufficient_data_is_not_rejection() {
        let err = ModelError::InsufficientData {
            required: 10,
            available: 4,
        };

        assert!(err.to_string().contains("need at least 10"));
        assert!(!err.is_rejection());
    }

    #[test]
    fn test_malformed_features_are_rejections() {
        let err = ModelError::non_finite_feature(2, f64::NAN);
        assert!(err.to_string().contains("position 2"));
        assert!(err.is_rejection());
        assert!(ModelError::wrong_width(4, 3).to_string().contains("expected 4 values, got 3"));
    }

    #[test]
    fn test_persistence_keeps_error_chain() {
        let cause = anyhow::anyhow!("disk full").context("Failed to write data/elo.json");
        let err = ModelError::persistence(&cause);
        assert!(err.to_string().contains("elo.json"));
        assert!(err.to_string().contains("disk full"));
        assert!(!err.is_rejection());
    }
}
