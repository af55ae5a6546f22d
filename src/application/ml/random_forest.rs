use super::training_window::{
    TrainingExample, TrainingWindow, check_feature_row, examples_from_batch, feature_row,
};
use super::{elapsed_ms, no_usable_rows, restore_document, untrained_result};
use crate::config::ForestConfig;
use crate::domain::errors::ModelError;
use crate::domain::ports::{BatchTrainable, FeatureProvider, PredictionModel};
use crate::domain::repositories::DocumentRepository;
use crate::domain::tree::{GBTree, RegressionTreeBuilder, feature_importance};
use crate::domain::types::{ModelFamily, ModelResult, Observation, TeamFeatures, TrainingReport};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const FOREST_SCHEMA_VERSION: u32 = 1;

const MODEL_NAME: &str = "Random Forest";
const COMPONENT: &str = "RandomForest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForestStateDocument {
    pub schema_version: u32,
    pub trees: Vec<GBTree>,
    pub trained: bool,
    pub feature_dimension: usize,
    pub feature_importance: BTreeMap<String, f64>,
    #[serde(default)]
    pub training_window: Vec<TrainingExample>,
    #[serde(default)]
    pub absorbed_ids: Vec<String>,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForestModel {
    pub trees: Vec<GBTree>,
    pub trained: bool,
    pub feature_dimension: usize,
    pub feature_importance: BTreeMap<String, f64>,
}

/// Tally of per-tree verdicts for one matchup
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ForestVotes {
    pub win: usize,
    pub loss: usize,
    pub overtime: usize,
}

impl ForestVotes {
    pub fn total(&self) -> usize {
        self.win + self.loss + self.overtime
    }

    pub fn max(&self) -> usize {
        self.win.max(self.loss).max(self.overtime)
    }
}

impl ForestModel {
    pub fn untrained() -> Self {
        Self {
            trees: Vec::new(),
            trained: false,
            feature_dimension: 0,
            feature_importance: BTreeMap::new(),
        }
    }

    /// Bagged trees, each fitted on its own bootstrap sample. Tree `i` draws from
    /// an rng seeded with `seed + i`, so a fit is reproducible whatever the pool size.
    pub fn fit(features: &[Vec<f64>], labels: &[f64], config: &ForestConfig) -> Self {
        let rows = features.len().min(labels.len());
        if rows == 0 {
            return Self::untrained();
        }
        let dimension = features.first().map(Vec::len).unwrap_or(0);
        let builder = RegressionTreeBuilder::new(features, labels, config.tree_params(dimension));

        let trees: Vec<GBTree> = (0..config.num_trees)
            .into_par_iter()
            .map(|i| {
                let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(i as u64));
                let sample: Vec<usize> = (0..rows).map(|_| rng.random_range(0..rows)).collect();
                builder.build_on(sample, Some(&mut rng))
            })
            .collect();

        let feature_importance = feature_importance(&trees);
        Self {
            trees,
            trained: true,
            feature_dimension: dimension,
            feature_importance,
        }
    }

    /// Tree outputs above 0.6 vote win, below 0.4 vote loss, the rest overtime.
    pub fn votes(&self, row: &[f64]) -> ForestVotes {
        let mut votes = ForestVotes::default();
        for tree in &self.trees {
            let output = tree.predict(row);
            if output > 0.6 {
                votes.win += 1;
            } else if output < 0.4 {
                votes.loss += 1;
            } else {
                votes.overtime += 1;
            }
        }
        votes
    }
}

#[derive(Debug)]
struct TrainingState {
    window: TrainingWindow,
    absorbed_ids: Vec<String>,
    last_updated: Option<DateTime<Utc>>,
}

/// Random forest engine over the same training window as the boosting engine.
pub struct RandomForestEngine {
    config: ForestConfig,
    features: Arc<dyn FeatureProvider>,
    repository: Arc<dyn DocumentRepository<ForestStateDocument>>,
    model: RwLock<Arc<ForestModel>>,
    training: Mutex<TrainingState>,
    persist_lock: Mutex<()>,
}

impl RandomForestEngine {
    pub fn new(
        config: ForestConfig,
        features: Arc<dyn FeatureProvider>,
        repository: Arc<dyn DocumentRepository<ForestStateDocument>>,
    ) -> Self {
        let restored = restore_document(
            repository.as_ref(),
            COMPONENT,
            FOREST_SCHEMA_VERSION,
            |doc| doc.schema_version,
        );

        let (model, training) = match restored {
            Some(doc) => (
                ForestModel {
                    trees: doc.trees,
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
            ),
            None => (
                ForestModel::untrained(),
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

    pub fn current_model(&self) -> Result<Arc<ForestModel>, ModelError> {
        self.model
            .read()
            .map(|model| Arc::clone(&model))
            .map_err(|_| ModelError::lock_poisoned("forest model"))
    }

    pub fn is_trained(&self) -> bool {
        self.current_model().map(|m| m.trained).unwrap_or(false)
    }

    fn lock_training(&self) -> Result<MutexGuard<'_, TrainingState>, ModelError> {
        self.training
            .lock()
            .map_err(|_| ModelError::lock_poisoned("forest training window"))
    }
}

impl PredictionModel for RandomForestEngine {
    fn predict(
        &self,
        home: &TeamFeatures,
        away: &TeamFeatures,
    ) -> Result<ModelResult, ModelError> {
        let started = Instant::now();
        let model = self.current_model()?;
        if !model.trained || model.trees.is_empty() {
            return Ok(untrained_result(MODEL_NAME, self.config.weight, started));
        }

        let row = feature_row(home, away);
        check_feature_row(&row, model.feature_dimension)?;

        let votes = model.votes(&row);
        let total = votes.total() as f64;
        let win_probability = (votes.win as f64 / total).clamp(0.35, 0.85);
        let confidence = (votes.max() as f64 / total).clamp(0.40, 0.90);

        Ok(ModelResult {
            model_name: MODEL_NAME.to_string(),
            win_probability,
            confidence,
            predicted_score: leaning_score(win_probability),
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

impl BatchTrainable for RandomForestEngine {
    fn family(&self) -> ModelFamily {
        ModelFamily::RandomForest
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
        let model = ForestModel::fit(&features, &labels, &self.config);
        info!(
            "{}: grew {} trees on {} rows ({} new, {} skipped)",
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
                .map_err(|_| ModelError::lock_poisoned("forest model"))?;
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
            .map_err(|_| anyhow::anyhow!("forest persist lock poisoned"))?;

        let document = {
            let training = self.lock_training()?;
            let model = self.current_model()?;
            ForestStateDocument {
                schema_version: FOREST_SCHEMA_VERSION,
                trees: model.trees.clone(),
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

/// Score line leaning toward the favourite, never level.
fn leaning_score(win_probability: f64) -> String {
    let lean = win_probability - 0.5;
    let (home_goals, away_goals) = if lean > 0.0 {
        (3.0 + lean * 2.0, 2.5 - lean * 1.5)
    } else {
        (3.0 + lean * 1.5, 2.5 - lean * 2.0)
    };
    let mut home = home_goals.round().max(0.0) as u32;
    let mut away = away_goals.round().max(0.0) as u32;
    if home == away {
        if lean > 0.0 {
            home += 1;
        } else {
            away += 1;
        }
    }
    format!("{}-{}", home, away)
}
