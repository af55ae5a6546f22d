//! Poisson goal-rate model.
//!
//! Every team carries an offensive and a defensive multiplier around the league
//! scoring average. Expected goals for a side are its offensive rate times the
//! opponent's defensive rate times the league average (times the home multiplier
//! for the home side). Rates move online after every finished game.

use super::{elapsed_ms, restore_document, untrained_result, validate_observation};
use crate::config::GoalRateConfig;
use crate::domain::errors::ModelError;
use crate::domain::ports::{BatchTrainable, PredictionModel};
use crate::domain::repositories::DocumentRepository;
use crate::domain::types::{ModelFamily, ModelResult, Observation, TeamFeatures, TrainingReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Discrete, Poisson};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

pub const GOAL_RATE_SCHEMA_VERSION: u32 = 1;

const MODEL_NAME: &str = "Poisson Regression";
const COMPONENT: &str = "GoalRate";
/// Goals per side considered when integrating the score distribution
const MAX_GOALS: u64 = 20;
/// Rate of a team never seen before
const NEUTRAL_RATE: f64 = 1.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalRateTable {
    pub offensive: HashMap<String, f64>,
    pub defensive: HashMap<String, f64>,
    pub games_played: HashMap<String, u32>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl GoalRateTable {
    pub fn offensive_rate(&self, team: &str) -> f64 {
        self.offensive.get(team).copied().unwrap_or(NEUTRAL_RATE)
    }

    pub fn defensive_rate(&self, team: &str) -> f64 {
        self.defensive.get(team).copied().unwrap_or(NEUTRAL_RATE)
    }

    /// Expected goals (home, away), each bounded to the configured range.
    pub fn expected_goals(&self, home: &str, away: &str, config: &GoalRateConfig) -> (f64, f64) {
        let bound = |goals: f64| goals.clamp(config.min_expected_goals, config.max_expected_goals);
        let home_goals = self.offensive_rate(home)
            * self.defensive_rate(away)
            * config.league_average
            * config.home_multiplier;
        let away_goals =
            self.offensive_rate(away) * self.defensive_rate(home) * config.league_average;
        (bound(home_goals), bound(away_goals))
    }

    /// Nudge both teams' rates toward the observed score.
    ///
    /// A side that outscores its expectation gains offense and its opponent's
    /// defensive multiplier grows (it concedes more than expected).
    pub fn absorb(&mut self, obs: &Observation, config: &GoalRateConfig) {
        let (home_expected, away_expected) =
            self.expected_goals(&obs.home_team, &obs.away_team, config);
        let home_surprise = (f64::from(obs.home_score) - home_expected) / home_expected;
        let away_surprise = (f64::from(obs.away_score) - away_expected) / away_expected;
        let lr = config.learning_rate;

        let bound_off = |rate: f64| rate.clamp(config.min_offensive_rate, config.max_offensive_rate);
        let bound_def = |rate: f64| rate.clamp(config.min_defensive_rate, config.max_defensive_rate);

        let home_off = bound_off(self.offensive_rate(&obs.home_team) + lr * home_surprise);
        let away_off = bound_off(self.offensive_rate(&obs.away_team) + lr * away_surprise);
        let home_def = bound_def(self.defensive_rate(&obs.home_team) + lr * away_surprise);
        let away_def = bound_def(self.defensive_rate(&obs.away_team) + lr * home_surprise);

        self.offensive.insert(obs.home_team.clone(), home_off);
        self.offensive.insert(obs.away_team.clone(), away_off);
        self.defensive.insert(obs.home_team.clone(), home_def);
        self.defensive.insert(obs.away_team.clone(), away_def);
        for team in [&obs.home_team, &obs.away_team] {
            *self.games_played.entry(team.clone()).or_insert(0) += 1;
        }
        self.last_updated = Some(Utc::now());

        debug!(
            "{}: {} off {:.3} def {:.3} | {} off {:.3} def {:.3}",
            COMPONENT, obs.home_team, home_off, home_def, obs.away_team, away_off, away_def
        );
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalRateStateDocument {
    pub schema_version: u32,
    #[serde(flatten)]
    pub table: GoalRateTable,
    #[serde(default)]
    pub absorbed_ids: Vec<String>,
}

pub struct GoalRateEngine {
    config: GoalRateConfig,
    repository: Arc<dyn DocumentRepository<GoalRateStateDocument>>,
    table: RwLock<Arc<GoalRateTable>>,
    absorbed_ids: Mutex<Vec<String>>,
    persist_lock: Mutex<()>,
}

impl GoalRateEngine {
    pub fn new(
        config: GoalRateConfig,
        repository: Arc<dyn DocumentRepository<GoalRateStateDocument>>,
    ) -> Self {
        let (table, absorbed_ids) = match restore_document(
            repository.as_ref(),
            COMPONENT,
            GOAL_RATE_SCHEMA_VERSION,
            |doc| doc.schema_version,
        ) {
            Some(doc) => (doc.table, doc.absorbed_ids),
            None => (GoalRateTable::default(), Vec::new()),
        };

        Self {
            config,
            repository,
            table: RwLock::new(Arc::new(table)),
            absorbed_ids: Mutex::new(absorbed_ids),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn current_table(&self) -> Result<Arc<GoalRateTable>, ModelError> {
        self.table
            .read()
            .map(|table| Arc::clone(&table))
            .map_err(|_| ModelError::lock_poisoned("goal rates"))
    }

    /// (offensive, defensive) rates for `team`.
    pub fn team_rates(&self, team: &str) -> (f64, f64) {
        match self.current_table() {
            Ok(table) => (table.offensive_rate(team), table.defensive_rate(team)),
            Err(_) => (NEUTRAL_RATE, NEUTRAL_RATE),
        }
    }

    fn lock_absorbed(&self) -> Result<MutexGuard<'_, Vec<String>>, ModelError> {
        self.absorbed_ids
            .lock()
            .map_err(|_| ModelError::lock_poisoned("goal rate batch ids"))
    }
}

impl PredictionModel for GoalRateEngine {
    fn predict(
        &self,
        home: &TeamFeatures,
        away: &TeamFeatures,
    ) -> Result<ModelResult, ModelError> {
        let started = Instant::now();
        let table = self.current_table()?;
        if table.games_played.is_empty() {
            return Ok(untrained_result(MODEL_NAME, self.config.weight, started));
        }

        let (home_expected, away_expected) =
            table.expected_goals(&home.team_id, &away.team_id, &self.config);

        let Some(win_probability) = home_win_probability(home_expected, away_expected) else {
            warn!(
                "{}: invalid goal expectations {:.3}/{:.3}",
                COMPONENT, home_expected, away_expected
            );
            return Ok(untrained_result(MODEL_NAME, self.config.weight, started));
        };
        let confidence = (0.6 + (home_expected - away_expected).abs() * 0.08).clamp(0.65, 0.92);

        Ok(ModelResult {
            model_name: MODEL_NAME.to_string(),
            win_probability,
            confidence,
            predicted_score: format!(
                "{}-{}",
                likely_goals(home_expected),
                likely_goals(away_expected)
            ),
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

impl BatchTrainable for GoalRateEngine {
    fn family(&self) -> ModelFamily {
        ModelFamily::GoalRate
    }

    fn train_batch(&self, batch: &[Observation]) -> Result<TrainingReport, ModelError> {
        let started = Instant::now();
        let mut absorbed_ids = self.lock_absorbed()?;

        let mut next = (*self.current_table()?).clone();
        let mut report = TrainingReport::default();
        for obs in batch {
            match validate_observation(obs) {
                Ok(()) => {
                    next.absorb(obs, &self.config);
                    report.absorbed += 1;
                }
                Err(e) => {
                    warn!("{}: skipping {}: {}", COMPONENT, obs.id, e);
                    report.skipped += 1;
                }
            }
        }
        report.fitted_on = next.games_played.len();

        {
            let mut current = self
                .table
                .write()
                .map_err(|_| ModelError::lock_poisoned("goal rates"))?;
            *current = Arc::new(next);
        }
        *absorbed_ids = batch.iter().map(|obs| obs.id.clone()).collect();

        report.duration_ms = elapsed_ms(started);
        Ok(report)
    }

    fn persist(&self) -> anyhow::Result<()> {
        let _guard = self
            .persist_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("goal rate persist lock poisoned"))?;

        let document = {
            let absorbed_ids = self.lock_absorbed()?;
            GoalRateStateDocument {
                schema_version: GOAL_RATE_SCHEMA_VERSION,
                table: (*self.current_table()?).clone(),
                absorbed_ids: absorbed_ids.clone(),
            }
        };

        self.repository.save(&document)?;
        debug!(
            "{}: saved rates for {} teams to {}",
            COMPONENT,
            document.table.games_played.len(),
            self.repository.location()
        );
        Ok(())
    }

    fn absorbed_ids(&self) -> HashSet<String> {
        match self.lock_absorbed() {
            Ok(ids) => ids.iter().cloned().collect(),
            Err(e) => {
                warn!("{}: {}", COMPONENT, e);
                HashSet::new()
            }
        }
    }
}

/// P(home > away) plus half of P(level) for independent Poisson scores.
fn home_win_probability(home_expected: f64, away_expected: f64) -> Option<f64> {
    let home = goal_pmf(home_expected)?;
    let away = goal_pmf(away_expected)?;

    let mut win = 0.0;
    let mut level = 0.0;
    for (h, p_home) in home.iter().enumerate() {
        for (a, p_away) in away.iter().enumerate() {
            let joint = p_home * p_away;
            if h > a {
                win += joint;
            } else if h == a {
                level += joint;
            }
        }
    }
    Some((win + 0.5 * level).clamp(0.0, 1.0))
}

fn goal_pmf(lambda: f64) -> Option<Vec<f64>> {
    let distribution = Poisson::new(lambda).ok()?;
    Some((0..=MAX_GOALS).map(|k| distribution.pmf(k)).collect())
}

/// Most likely goal count, nudged up when the expectation sits close to the next
/// integer.
fn likely_goals(expected: f64) -> u32 {
    let mode = expected.floor().max(0.0);
    if expected - mode > 0.7 {
        mode as u32 + 1
    } else {
        mode as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::InMemoryDocumentRepository;

    fn obs(id: &str, home: &str, away: &str, hs: u32, aws: u32) -> Observation {
        Observation::new(id, home, away, hs, aws, Utc::now())
    }

    fn engine() -> GoalRateEngine {
        GoalRateEngine::new(
            GoalRateConfig::default(),
            Arc::new(InMemoryDocumentRepository::new()),
        )
    }

    #[test]
    fn test_symmetric_expectations_split_evenly() {
        let p = home_win_probability(3.0, 3.0).unwrap();
        assert!((p - 0.5).abs() < 1e-6);
        assert!(home_win_probability(4.0, 2.0).unwrap() > 0.7);
    }

    #[test]
    fn test_likely_goals() {
        assert_eq!(likely_goals(3.35), 3);
        assert_eq!(likely_goals(2.75), 3);
        assert_eq!(likely_goals(0.65), 0);
        assert_eq!(likely_goals(0.85), 1);
    }

    #[test]
    fn test_rates_move_with_scores_and_stay_bounded() {
        let engine = engine();
        let batch: Vec<Observation> = (0..40)
            .map(|i| obs(&format!("g{i}"), "EDM", "SJS", 9, 0))
            .collect();
        engine.train_batch(&batch).unwrap();

        let (edm_off, edm_def) = engine.team_rates("EDM");
        let (sjs_off, sjs_def) = engine.team_rates("SJS");
        assert_eq!(edm_off, 1.8);
        assert_eq!(sjs_off, 0.5);
        assert_eq!(sjs_def, 1.5);
        assert_eq!(edm_def, 0.6);

        let result = engine
            .predict(&TeamFeatures::bare("EDM"), &TeamFeatures::bare("SJS"))
            .unwrap();
        assert!(result.win_probability > 0.9);
        assert_eq!(result.confidence, 0.92);
    }

    #[test]
    fn test_untrained_is_neutral_and_unknown_teams_not_inserted() {
        let engine = engine();
        let result = engine
            .predict(&TeamFeatures::bare("TOR"), &TeamFeatures::bare("MTL"))
            .unwrap();
        assert_eq!(result.win_probability, 0.5);

        engine.train_batch(&[obs("g1", "TOR", "MTL", 3, 2)]).unwrap();
        engine
            .predict(&TeamFeatures::bare("NEW"), &TeamFeatures::bare("TOR"))
            .unwrap();
        assert!(!engine.current_table().unwrap().offensive.contains_key("NEW"));
    }

    #[test]
    fn test_restart_restores_rates() {
        let repo = Arc::new(InMemoryDocumentRepository::new());
        let engine = GoalRateEngine::new(GoalRateConfig::default(), repo.clone());
        engine.train_batch(&[obs("g1", "TOR", "MTL", 6, 1)]).unwrap();
        engine.persist().unwrap();

        let restored = GoalRateEngine::new(GoalRateConfig::default(), repo);
        assert_eq!(restored.team_rates("TOR"), engine.team_rates("TOR"));
        assert!(restored.absorbed_ids().contains("g1"));
    }
}
