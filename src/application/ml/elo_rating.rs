use super::{elapsed_ms, restore_document, untrained_result, validate_observation};
use crate::config::EloConfig;
use crate::domain::errors::ModelError;
use crate::domain::ports::{BatchTrainable, PredictionModel};
use crate::domain::rating::{
    DEFAULT_CONFIDENCE, KFactorPolicy, RatingBook, RatingHistoryEntry, RatingUpdate, SeedTable,
    UpdateContext, expected_score,
};
use crate::domain::repositories::DocumentRepository;
use crate::domain::types::{ModelFamily, ModelResult, Observation, TeamFeatures, TrainingReport};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;
use tracing::{debug, info, warn};

pub const RATING_SCHEMA_VERSION: u32 = 1;

const MODEL_NAME: &str = "Elo Rating";

/// Durable rating state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingStateDocument {
    pub schema_version: u32,
    #[serde(flatten)]
    pub book: RatingBook,
    /// Ids of the last batch applied before this document was written
    #[serde(default)]
    pub absorbed_ids: Vec<String>,
}

#[derive(Debug, Default)]
struct EloState {
    book: RatingBook,
    absorbed_ids: Vec<String>,
}

/// Online Elo rating engine.
///
/// Ratings mutate in place under one table-wide write lock. Every update is
/// planned from the pre-update snapshot and committed in one step, so a rejected
/// observation leaves no trace.
pub struct EloRatingEngine {
    config: EloConfig,
    policy: KFactorPolicy,
    seeds: SeedTable,
    state: RwLock<EloState>,
    repository: Arc<dyn DocumentRepository<RatingStateDocument>>,
    persist_lock: Mutex<()>,
}

impl EloRatingEngine {
    pub fn new(
        config: EloConfig,
        repository: Arc<dyn DocumentRepository<RatingStateDocument>>,
    ) -> Self {
        let state = match restore_document(
            repository.as_ref(),
            "EloRating",
            RATING_SCHEMA_VERSION,
            |doc| doc.schema_version,
        ) {
            Some(doc) => {
                info!("EloRating: {} teams rated", doc.book.ratings.len());
                EloState {
                    book: doc.book,
                    absorbed_ids: doc.absorbed_ids,
                }
            }
            None => EloState::default(),
        };

        Self {
            policy: config.k_factor_policy(),
            seeds: config.seed_table(),
            config,
            state: RwLock::new(state),
            repository,
            persist_lock: Mutex::new(()),
        }
    }

    /// Apply one finished game and persist the table.
    ///
    /// A storage failure is logged; the in-memory update stands.
    pub fn update_ratings(&self, obs: &Observation) -> Result<RatingUpdate, ModelError> {
        let update = {
            let mut state = self
                .state
                .write()
                .map_err(|_| ModelError::lock_poisoned("elo ratings"))?;
            let update = self.apply(&mut state.book, obs)?;
            state.absorbed_ids = vec![obs.id.clone()];
            update
        };

        if let Err(e) = self.persist() {
            warn!("EloRating: ratings not saved: {}", ModelError::persistence(&e));
        }
        Ok(update)
    }

    fn apply(&self, book: &mut RatingBook, obs: &Observation) -> Result<RatingUpdate, ModelError> {
        validate_observation(obs)?;

        self.decay_if_idle(book, obs);

        let ctx = UpdateContext {
            seeds: &self.seeds,
            policy: &self.policy,
            home_advantage: self.config.home_advantage,
            same_division: self.config.same_division(&obs.home_team, &obs.away_team),
        };
        let update = book.plan_update(obs, &ctx);
        book.commit(&update, self.config.history_cap, Utc::now());

        debug!(
            "EloRating: {} {} ({:.1} -> {:.1}) vs {} ({:.1} -> {:.1}), K={:.2}",
            obs.id,
            update.home.team,
            update.home.old_rating,
            update.home.new_rating,
            update.away.team,
            update.away.old_rating,
            update.away.new_rating,
            update.k_factor
        );
        Ok(update)
    }

    fn decay_if_idle(&self, book: &mut RatingBook, obs: &Observation) {
        let Some(last) = book.last_game_date else {
            return;
        };
        if obs.game_date - last > Duration::days(self.config.idle_decay_days) {
            let moved = book.decay_toward_seed(&self.seeds, self.config.decay_retention);
            if moved > 0 {
                info!(
                    "EloRating: table idle since {}, pulled {} ratings toward their seeds",
                    last.date_naive(),
                    moved
                );
            }
        }
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, EloState>, ModelError> {
        self.state
            .read()
            .map_err(|_| ModelError::lock_poisoned("elo ratings"))
    }

    /// Current rating, or the seed for an unknown team (not inserted).
    pub fn rating(&self, team: &str) -> f64 {
        match self.read_state() {
            Ok(state) => state.book.rating_or_seed(team, &self.seeds),
            Err(_) => self.seeds.seed(team),
        }
    }

    pub fn all_ratings(&self) -> HashMap<String, f64> {
        match self.read_state() {
            Ok(state) => state.book.ratings.clone(),
            Err(_) => HashMap::new(),
        }
    }

    /// Rating changes for `team`, oldest first.
    pub fn rating_history(&self, team: &str) -> Vec<RatingHistoryEntry> {
        match self.read_state() {
            Ok(state) => state
                .book
                .history
                .get(team)
                .map(|entries| entries.iter().cloned().collect())
                .unwrap_or_default(),
            Err(_) => Vec::new(),
        }
    }

    pub fn confidence(&self, team: &str) -> f64 {
        match self.read_state() {
            Ok(state) => state.book.confidence_of(team),
            Err(_) => DEFAULT_CONFIDENCE,
        }
    }

    pub fn games_played(&self, team: &str) -> u32 {
        match self.read_state() {
            Ok(state) => state.book.games_of(team),
            Err(_) => 0,
        }
    }
}

impl PredictionModel for EloRatingEngine {
    fn predict(
        &self,
        home: &TeamFeatures,
        away: &TeamFeatures,
    ) -> Result<ModelResult, ModelError> {
        let started = Instant::now();
        let (home_rating, away_rating) = {
            let state = self.read_state()?;
            if state.book.ratings.is_empty() {
                return Ok(untrained_result(MODEL_NAME, self.config.weight, started));
            }
            (
                state.book.rating_or_seed(&home.team_id, &self.seeds),
                state.book.rating_or_seed(&away.team_id, &self.seeds),
            )
        };

        let adjusted_home = home_rating + self.config.home_advantage;
        let win_probability = expected_score(adjusted_home, away_rating).clamp(0.05, 0.95);
        let confidence = (0.5 + (home_rating - away_rating).abs() / 800.0).clamp(0.6, 0.95);

        Ok(ModelResult {
            model_name: MODEL_NAME.to_string(),
            win_probability,
            confidence,
            predicted_score: predicted_score(adjusted_home - away_rating),
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

impl BatchTrainable for EloRatingEngine {
    fn family(&self) -> ModelFamily {
        ModelFamily::Rating
    }

    /// Apply the batch in order. Rejected observations are skipped.
    fn train_batch(&self, batch: &[Observation]) -> Result<TrainingReport, ModelError> {
        let started = Instant::now();
        let mut state = self
            .state
            .write()
            .map_err(|_| ModelError::lock_poisoned("elo ratings"))?;

        let mut report = TrainingReport::default();
        for obs in batch {
            match self.apply(&mut state.book, obs) {
                Ok(_) => report.absorbed += 1,
                Err(e) => {
                    warn!("EloRating: skipping {}: {}", obs.id, e);
                    report.skipped += 1;
                }
            }
        }
        state.absorbed_ids = batch.iter().map(|obs| obs.id.clone()).collect();

        report.fitted_on = state.book.ratings.len();
        report.duration_ms = elapsed_ms(started);
        Ok(report)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("elo persist lock poisoned"))?;

        let document = {
            let state = self
                .state
                .read()
                .map_err(|_| anyhow::anyhow!("elo ratings lock poisoned"))?;
            RatingStateDocument {
                schema_version: RATING_SCHEMA_VERSION,
                book: state.book.clone(),
                absorbed_ids: state.absorbed_ids.clone(),
            }
        };

        self.repository.save(&document)?;
        debug!(
            "EloRating: saved {} ratings to {}",
            document.book.ratings.len(),
            self.repository.location()
        );
        Ok(())
    }

    fn absorbed_ids(&self) -> HashSet<String> {
        match self.read_state() {
            Ok(state) => state.absorbed_ids.iter().cloned().collect(),
            Err(_) => HashSet::new(),
        }
    }
}

/// Score line around three goals each, shifted by the rating gap. Never 0-0.
fn predicted_score(rating_gap: f64) -> String {
    let shift = rating_gap / 200.0;
    let home_goals = (3.0 + shift).round().max(0.0) as u32;
    let away_goals = (3.0 - shift).round().max(0.0) as u32;
    if home_goals == 0 && away_goals == 0 {
        return "1-0".to_string();
    }
    format!("{}-{}", home_goals, away_goals)
}
