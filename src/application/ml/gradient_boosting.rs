use super::training_window::{
    TrainingExample, TrainingWindow, check_feature_row, examples_from_batch, feature_row,
};
use super::{elapsed_ms, no_usable_rows, restore_document, untrained_result};
use crate::config::BoostingConfig;
use crate::domain::errors::ModelError;
use crate::domain::math::sigmoid;
use crate::domain::ports::{BatchTrainable, FeatureProvider, PredictionModel};
use crate::domain::repositories::DocumentRepository;
use crate::domain::tree::{GBTree, RegressionTreeBuilder, feature_importance, rank_importance};
use crate::domain::types::{ModelFamily, ModelResult, Observation, TeamFeatures, TrainingReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const BOOSTING_SCHEMA_VERSION: u32 = 1;

const MODEL_NAME: &str = "Gradient Boosting";
const COMPONENT: &str = "GradientBoosting";
/// Trees between training-accuracy log lines
const ACCURACY_LOG_INTERVAL: usize = 20;

/// Durable tree-engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingStateDocument {
    pub schema_version: u32,
    pub trees: Vec<GBTree>,
    pub learning_rate: f64,
    pub trained: bool,
    pub feature_dimension: usize,
    pub feature_importance: BTreeMap<String, f64>,
    #[serde(default)]
    pub training_window: Vec<TrainingExample>,
    #[serde(default)]
    pub absorbed_ids: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Immutable boosted ensemble. Replaced as a whole on every retrain.
#[derive(Debug, Clone, PartialEq)]
pub struct BoostedModel {
    pub trees: Vec<GBTree>,
    pub learning_rate: f64,
    pub trained: bool,
    pub feature_dimension: usize,
    pub feature_importance: BTreeMap<String, f64>,
}

impl BoostedModel {
    pub fn untrained(learning_rate: f64) -> Self {
        Self {
            trees: Vec::new(),
            learning_rate,
            trained: false,
            feature_dimension: 0,
            feature_importance: BTreeMap::new(),
        }
    }

    /// Fit `num_trees` regression trees on logistic residuals, one after another.
    pub fn fit(features: &[Vec<f64>], labels: &[f64], config: &BoostingConfig) -> Self {
        let params = config.tree_params();
        let lr = config.learning_rate;
        let mut running = vec![0.0; labels.len()];
        let mut trees = Vec::with_capacity(config.num_trees);

        for i in 0..config.num_trees {
            let residuals: Vec<f64> = labels
                .iter()
                .zip(&running)
                .map(|(label, score)| label - sigmoid(*score))
                .collect();

            let tree = RegressionTreeBuilder::new(features, &residuals, params).build(None);
            for (score, row) in running.iter_mut().zip(features) {
                *score += lr * tree.predict(row);
            }
            trees.push(tree);

            if (i + 1) % ACCURACY_LOG_INTERVAL == 0 {
                debug!(
                    "{}: tree {}/{}, training accuracy {:.3}",
                    COMPONENT,
                    i + 1,
                    config.num_trees,
                    accuracy(&running, labels)
                );
            }
        }

        let feature_importance = feature_importance(&trees);
        Self {
            trees,
            learning_rate: lr,
            trained: true,
            feature_dimension: features.first().map(Vec::len).unwrap_or(0),
            feature_importance,
        }
    }

    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.trees
            .iter()
            .map(|tree| self.learning_rate * tree.predict(row))
            .sum()
    }

    pub fn probability(&self, row: &[f64]) -> f64 {
        sigmoid(self.raw_score(row))
    }
}

fn accuracy(scores: &[f64], labels: &[f64]) -> f64 {
    if labels.is_empty() {
        return 0.0;
    }
    let correct = scores
        .iter()
        .zip(labels)
        .filter(|(score, label)| (sigmoid(**score) > 0.5) == (**label > 0.5))
        .count();
    correct as f64 / labels.len() as f64
}

#[derive(Debug)]
struct TrainingState {
    window: TrainingWindow,
    absorbed_ids: Vec<String>,
    last_updated: Option<DateTime<Utc>>,
}

/// Gradient-boosted tree engine.
///
/// Readers clone the committed `Arc<BoostedModel>` and never block each other.
/// Retraining fits a fresh model from the whole training window and swaps it in.
pub struct GradientBoostingEngine {
    config: BoostingConfig,
    features: Arc<dyn FeatureProvider>,
    repository: Arc<dyn DocumentRepository<BoostingStateDocument>>,
    model: RwLock<Arc<BoostedModel>>,
    training: Mutex<TrainingState>,
    persist_lock: Mutex<()>,
}

impl GradientBoostingEngine {
    pub fn new(
        config: BoostingConfig,
        features: Arc<dyn FeatureProvider>,
        repository: Arc<dyn DocumentRepository<BoostingStateDocument>>,
    ) -> Self {
        let restored = restore_document(
            repository.as_ref(),
            COMPONENT,
            BOOSTING_SCHEMA_VERSION,
            |doc| doc.schema_version,
        );

        let (model, training) = match restored {
            Some(doc) => {
                info!(
                    "{}: {} trees, {} training rows",
                    COMPONENT,
                    doc.trees.len(),
                    doc.training_window.len()
                );
                (
                    BoostedModel {
                        trees: doc.trees,
                        learning_rate: doc.learning_rate,
                        trained: doc.trained,
                        feature_dimension: doc.feature_dimension,
                        feature_importance: doc.feature_importance,
                    },
                    TrainingState {
                        window: TrainingWindow::from_examples(
                            doc.training_window,
                            config.training_window,
                        ),
                        absorbed_ids: doc.absorbed_ids,
                        last_updated: doc.last_updated,
                    },
                )
            }
            None => (
                BoostedModel::untrained(config.learning_rate),
                TrainingState {
                    window: TrainingWindow::new(config.training_window),
                    absorbed_ids: Vec::new(),
                    last_updated: None,
                },
            ),
        };

        Self {
            config,
            features,
            repository,
            model: RwLock::new(Arc::new(model)),
            training: Mutex::new(training),
            persist_lock: Mutex::new(()),
        }
    }

    /// Latest committed model.
    pub fn current_model(&self) -> Result<Arc<BoostedModel>, ModelError> {
        self.model
            .read()
            .map(|model| Arc::clone(&model))
            .map_err(|_| ModelError::lock_poisoned("boosting model"))
    }

    pub fn is_trained(&self) -> bool {
        self.current_model().map(|m| m.trained).unwrap_or(false)
    }

    pub fn feature_importance(&self) -> BTreeMap<String, f64> {
        self.current_model()
            .map(|m| m.feature_importance.clone())
            .unwrap_or_default()
    }

    /// Features by descending importance.
    pub fn feature_importance_ranking(&self) -> Vec<(String, f64)> {
        rank_importance(&self.feature_importance())
    }

    pub fn training_rows(&self) -> usize {
        self.lock_training().map(|t| t.window.len()).unwrap_or(0)
    }

    fn lock_training(&self) -> Result<MutexGuard<'_, TrainingState>, ModelError> {
        self.training
            .lock()
            .map_err(|_| ModelError::lock_poisoned("boosting training window"))
    }
}

impl PredictionModel for GradientBoostingEngine {
    fn predict(
        &self,
        home: &TeamFeatures,
        away: &TeamFeatures,
    ) -> Result<ModelResult, ModelError> {
        let started = Instant::now();
        let model = self.current_model()?;
        if !model.trained {
            return Ok(untrained_result(MODEL_NAME, self.config.weight, started));
        }

        let row = feature_row(home, away);
        check_feature_row(&row, model.feature_dimension)?;

        let win_probability = model.probability(&row).clamp(0.35, 0.85);
        let confidence = ((win_probability - 0.5).abs() * 2.0).clamp(0.40, 0.90);

        Ok(ModelResult {
            model_name: MODEL_NAME.to_string(),
            win_probability,
            confidence,
            predicted_score: banded_score(win_probability).to_string(),
            weight: self.config.weight,
            processing_time_ms: elapsed_ms(started),
        })
    }

    fn name(&self) -> &str {
        MODEL_NAME
    }

    fn weight(&self) -> f64 {
        self.config.weight
    }
}

impl BatchTrainable for GradientBoostingEngine {
    fn family(&self) -> ModelFamily {
        ModelFamily::GradientBoosting
    }

    fn train_batch(&self, batch: &[Observation]) -> Result<TrainingReport, ModelError> {
        let started = Instant::now();
        let mut training = self.lock_training()?;

        let (examples, skipped) = examples_from_batch(
            self.features.as_ref(),
            batch,
            training.window.dimension(),
            COMPONENT,
        );
        let absorbed = examples.len();
        if absorbed == 0 && !batch.is_empty() {
            return Err(no_usable_rows(self.family(), batch.len(), COMPONENT));
        }
        let candidate = training.window.extended(examples);

        if candidate.len() < self.config.min_training_samples {
            return Err(ModelError::InsufficientData {
                required: self.config.min_training_samples,
                available: candidate.len(),
            });
        }

        let (features, labels) = candidate.matrix();
        let model = BoostedModel::fit(&features, &labels, &self.config);
        info!(
            "{}: retrained {} trees on {} rows ({} new, {} skipped)",
            COMPONENT,
            model.trees.len(),
            candidate.len(),
            absorbed,
            skipped
        );

        {
            let mut current = self
                .model
                .write()
                .map_err(|_| ModelError::lock_poisoned("boosting model"))?;
            *current = Arc::new(model);
        }
        training.window = candidate;
        training.absorbed_ids = batch.iter().map(|obs| obs.id.clone()).collect();
        training.last_updated = Some(Utc::now());

        Ok(TrainingReport {
            absorbed,
            skipped,
            fitted_on: training.window.len(),
            duration_ms: elapsed_ms(started),
        })
    }

    fn persist(&self) -> anyhow::Result<()> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("boosting persist lock poisoned"))?;

        let document = {
            let training = self.lock_training()?;
            let model = self.current_model()?;
            BoostingStateDocument {
                schema_version: BOOSTING_SCHEMA_VERSION,
                trees: model.trees.clone(),
                learning_rate: model.learning_rate,
                trained: model.trained,
                feature_dimension: model.feature_dimension,
                feature_importance: model.feature_importance.clone(),
                training_window: training.window.examples(),
                absorbed_ids: training.absorbed_ids.clone(),
                last_updated: training.last_updated,
            }
        };

        self.repository.save(&document)?;
        debug!(
            "{}: saved {} trees to {}",
            COMPONENT,
            document.trees.len(),
            self.repository.location()
        );
        Ok(())
    }

    fn absorbed_ids(&self) -> HashSet<String> {
        match self.lock_training() {
            Ok(training) => training.absorbed_ids.iter().cloned().collect(),
            Err(e) => {
                warn!("{}: {}", COMPONENT, e);
                HashSet::new()
            }
        }
    }
}

fn banded_score(win_probability: f64) -> &'static str {
    if win_probability > 0.65 {
        "4-2"
    } else if win_probability > 0.55 {
        "3-2"
    } else if win_probability > 0.45 {
        "3-3 (OT)"
    } else if win_probability > 0.35 {
        "2-3"
    } else {
        "2-4"
    }
}
