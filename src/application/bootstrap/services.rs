use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::application::ml::{
    BoostingStateDocument, EloRatingEngine, ForestStateDocument, GoalRateEngine,
    GoalRateStateDocument, GradientBoostingEngine, RandomForestEngine, RatingStateDocument,
};
use crate::application::training::{BatchQueueDocument, BatchTrainingOrchestrator};
use crate::config::{
    BATCH_QUEUE_FILE, BOOSTING_STATE_FILE, Config, ELO_STATE_FILE, FOREST_STATE_FILE,
    GOAL_RATE_STATE_FILE, PersistenceConfig,
};
use crate::domain::errors::ModelError;
use crate::domain::ports::{BatchTrainable, FeatureProvider, PredictionModel};
use crate::domain::repositories::DocumentRepository;
use crate::domain::types::{ModelResult, TeamFeatures};
use crate::infrastructure::persistence::{InMemoryDocumentRepository, JsonFileRepository};

/// Stores backing every persisted document.
pub struct EngineRepositories {
    pub ratings: Arc<dyn DocumentRepository<RatingStateDocument>>,
    pub boosting: Arc<dyn DocumentRepository<BoostingStateDocument>>,
    pub forest: Arc<dyn DocumentRepository<ForestStateDocument>>,
    pub goal_rates: Arc<dyn DocumentRepository<GoalRateStateDocument>>,
    pub queues: Arc<dyn DocumentRepository<BatchQueueDocument>>,
}

impl EngineRepositories {
    /// JSON documents under the configured data directory.
    pub fn json(persistence: &PersistenceConfig) -> Self {
        Self {
            ratings: Arc::new(JsonFileRepository::new(persistence.path_for(ELO_STATE_FILE))),
            boosting: Arc::new(JsonFileRepository::new(
                persistence.path_for(BOOSTING_STATE_FILE),
            )),
            forest: Arc::new(JsonFileRepository::new(persistence.path_for(FOREST_STATE_FILE))),
            goal_rates: Arc::new(JsonFileRepository::new(
                persistence.path_for(GOAL_RATE_STATE_FILE),
            )),
            queues: Arc::new(JsonFileRepository::new(persistence.path_for(BATCH_QUEUE_FILE))),
        }
    }

    /// Volatile stores, nothing survives the process.
    pub fn in_memory() -> Self {
        Self {
            ratings: Arc::new(InMemoryDocumentRepository::new()),
            boosting: Arc::new(InMemoryDocumentRepository::new()),
            forest: Arc::new(InMemoryDocumentRepository::new()),
            goal_rates: Arc::new(InMemoryDocumentRepository::new()),
            queues: Arc::new(InMemoryDocumentRepository::new()),
        }
    }
}

/// Every engine built once and shared through `Arc`s.
pub struct EngineServices {
    pub elo: Arc<EloRatingEngine>,
    pub gradient_boosting: Arc<GradientBoostingEngine>,
    pub random_forest: Arc<RandomForestEngine>,
    pub goal_rate: Arc<GoalRateEngine>,
    pub orchestrator: Arc<BatchTrainingOrchestrator>,
    models: Vec<Arc<dyn PredictionModel>>,
}

impl EngineServices {
    /// Wire the engines over JSON stores in `config.persistence.data_dir`.
    pub fn build(config: &Config, features: Arc<dyn FeatureProvider>) -> Result<Self> {
        std::fs::create_dir_all(&config.persistence.data_dir).with_context(|| {
            format!(
                "Failed to create data directory {:?}",
                config.persistence.data_dir
            )
        })?;
        info!(
            "EngineServices: using data directory {:?}",
            config.persistence.data_dir
        );
        Ok(Self::build_with(
            config,
            features,
            EngineRepositories::json(&config.persistence),
        ))
    }

    pub fn build_with(
        config: &Config,
        features: Arc<dyn FeatureProvider>,
        repositories: EngineRepositories,
    ) -> Self {
        let elo = Arc::new(EloRatingEngine::new(
            config.elo.clone(),
            repositories.ratings,
        ));
        let gradient_boosting = Arc::new(GradientBoostingEngine::new(
            config.boosting.clone(),
            features.clone(),
            repositories.boosting,
        ));
        let random_forest = Arc::new(RandomForestEngine::new(
            config.forest.clone(),
            features,
            repositories.forest,
        ));
        let goal_rate = Arc::new(GoalRateEngine::new(
            config.goal_rate.clone(),
            repositories.goal_rates,
        ));

        let trainers: Vec<Arc<dyn BatchTrainable>> = vec![
            elo.clone(),
            gradient_boosting.clone(),
            random_forest.clone(),
            goal_rate.clone(),
        ];
        let orchestrator = Arc::new(BatchTrainingOrchestrator::new(
            config.batch.clone(),
            trainers,
            repositories.queues,
        ));

        let models: Vec<Arc<dyn PredictionModel>> = vec![
            elo.clone(),
            gradient_boosting.clone(),
            random_forest.clone(),
            goal_rate.clone(),
        ];

        Self {
            elo,
            gradient_boosting,
            random_forest,
            goal_rate,
            orchestrator,
            models,
        }
    }

    pub fn models(&self) -> &[Arc<dyn PredictionModel>] {
        &self.models
    }

    /// One result per registered model, in registration order.
    pub fn predict_all(
        &self,
        home: &TeamFeatures,
        away: &TeamFeatures,
    ) -> Result<Vec<ModelResult>, ModelError> {
        self.models
            .iter()
            .map(|model| model.predict(home, away))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::features::InMemoryFeatureProvider;

    #[test]
    fn test_untrained_services_answer_neutrally() {
        let services = EngineServices::build_with(
            &Config::default(),
            Arc::new(InMemoryFeatureProvider::new()),
            EngineRepositories::in_memory(),
        );

        let results = services
            .predict_all(&TeamFeatures::bare("TOR"), &TeamFeatures::bare("MTL"))
            .unwrap();
        assert_eq!(results.len(), 4);
        for result in &results {
            assert_eq!(result.win_probability, 0.5);
            assert!(result.confidence < 0.5);
        }
        let weights: Vec<f64> = results.iter().map(|r| r.weight).collect();
        assert_eq!(weights, vec![0.20, 0.10, 0.07, 0.15]);
    }
}
