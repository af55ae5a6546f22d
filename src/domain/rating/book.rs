use super::elo::{KFactorInputs, KFactorPolicy, OutcomeLabel, expected_score, next_confidence};
use crate::domain::types::Observation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Confidence assigned to an entity before its first rated game
pub const DEFAULT_CONFIDENCE: f64 = 0.5;

/// One applied rating change, as seen by one side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingHistoryEntry {
    pub timestamp: DateTime<Utc>,
    pub old_rating: f64,
    pub new_rating: f64,
    pub delta: f64,
    pub opponent: String,
    pub outcome: OutcomeLabel,
    pub score_line: String,
    pub k_factor: f64,
    pub was_home: bool,
    pub confidence: f64,
}

/// Starting ratings for entities seen for the first time.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedTable {
    pub base_rating: f64,
    pub adjustments: HashMap<String, f64>,
}

impl SeedTable {
    pub fn new(base_rating: f64, adjustments: HashMap<String, f64>) -> Self {
        Self {
            base_rating,
            adjustments,
        }
    }

    pub fn seed(&self, team: &str) -> f64 {
        self.base_rating + self.adjustments.get(team).copied().unwrap_or(0.0)
    }
}

/// Pending change for one side, computed before anything is written.
#[derive(Debug, Clone, PartialEq)]
pub struct SideUpdate {
    pub team: String,
    pub old_rating: f64,
    pub new_rating: f64,
    pub delta: f64,
    pub confidence: f64,
    pub games_played: u32,
    pub entry: RatingHistoryEntry,
}

/// Full rating update for one observation, committed atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct RatingUpdate {
    pub observation_id: String,
    pub home: SideUpdate,
    pub away: SideUpdate,
    pub expected_home: f64,
    pub actual_home: f64,
    pub k_factor: f64,
}

/// Rating knobs that are not part of the K-factor.
#[derive(Debug, Clone, Copy)]
pub struct UpdateContext<'a> {
    pub seeds: &'a SeedTable,
    pub policy: &'a KFactorPolicy,
    pub home_advantage: f64,
    pub same_division: bool,
}

/// In-memory rating table: ratings, bounded histories, confidences and game counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingBook {
    pub ratings: HashMap<String, f64>,
    pub history: HashMap<String, VecDeque<RatingHistoryEntry>>,
    pub confidence: HashMap<String, f64>,
    pub games_played: HashMap<String, u32>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Latest game date applied, drives idle decay
    #[serde(default)]
    pub last_game_date: Option<DateTime<Utc>>,
}

impl RatingBook {
    pub fn rating_or_seed(&self, team: &str, seeds: &SeedTable) -> f64 {
        self.ratings
            .get(team)
            .copied()
            .unwrap_or_else(|| seeds.seed(team))
    }

    pub fn confidence_of(&self, team: &str) -> f64 {
        self.confidence
            .get(team)
            .copied()
            .unwrap_or(DEFAULT_CONFIDENCE)
    }

    pub fn games_of(&self, team: &str) -> u32 {
        self.games_played.get(team).copied().unwrap_or(0)
    }

    /// Compute the update for `obs` against the current snapshot without mutating it.
    pub fn plan_update(&self, obs: &Observation, ctx: &UpdateContext<'_>) -> RatingUpdate {
        let home_rating = self.rating_or_seed(&obs.home_team, ctx.seeds);
        let away_rating = self.rating_or_seed(&obs.away_team, ctx.seeds);

        let adjusted_home = home_rating + ctx.home_advantage;
        let expected_home = expected_score(adjusted_home, away_rating);

        let home_label = OutcomeLabel::for_home(obs);
        let actual_home = home_label.actual_score();

        let inputs = KFactorInputs {
            home_rating,
            away_rating,
            home_games: self.games_of(&obs.home_team),
            away_games: self.games_of(&obs.away_team),
            same_division: ctx.same_division,
        };
        let k_factor = ctx.policy.k_factor(obs, &inputs);

        let home_delta = k_factor * (actual_home - expected_home);
        let away_delta = -home_delta;

        let home = self.side_update(
            obs,
            &obs.home_team,
            &obs.away_team,
            home_rating,
            home_delta,
            home_label,
            k_factor,
            true,
        );
        let away = self.side_update(
            obs,
            &obs.away_team,
            &obs.home_team,
            away_rating,
            away_delta,
            home_label.mirrored(),
            k_factor,
            false,
        );

        RatingUpdate {
            observation_id: obs.id.clone(),
            home,
            away,
            expected_home,
            actual_home,
            k_factor,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn side_update(
        &self,
        obs: &Observation,
        team: &str,
        opponent: &str,
        old_rating: f64,
        delta: f64,
        outcome: OutcomeLabel,
        k_factor: f64,
        was_home: bool,
    ) -> SideUpdate {
        let new_rating = old_rating + delta;
        let confidence = next_confidence(self.confidence_of(team), delta);
        let score_line = if was_home {
            format!("{}-{}", obs.home_score, obs.away_score)
        } else {
            format!("{}-{}", obs.away_score, obs.home_score)
        };

        SideUpdate {
            team: team.to_string(),
            old_rating,
            new_rating,
            delta,
            confidence,
            games_played: self.games_of(team).saturating_add(1),
            entry: RatingHistoryEntry {
                timestamp: obs.game_date,
                old_rating,
                new_rating,
                delta,
                opponent: opponent.to_string(),
                outcome,
                score_line,
                k_factor,
                was_home,
                confidence,
            },
        }
    }

    /// Apply a planned update. History per entity is capped with FIFO eviction.
    pub fn commit(&mut self, update: &RatingUpdate, history_cap: usize, now: DateTime<Utc>) {
        for side in [&update.home, &update.away] {
            self.ratings.insert(side.team.clone(), side.new_rating);
            self.confidence.insert(side.team.clone(), side.confidence);
            self.games_played
                .insert(side.team.clone(), side.games_played);

            let history = self.history.entry(side.team.clone()).or_default();
            history.push_back(side.entry.clone());
            while history.len() > history_cap {
                history.pop_front();
            }
        }
        let game_date = update.home.entry.timestamp;
        self.last_game_date = Some(
            self.last_game_date
                .map_or(game_date, |last| last.max(game_date)),
        );
        self.last_updated = Some(now);
    }

    /// Pull every rating part of the way back toward its seed.
    ///
    /// `retention` is the share of the distance from the seed that survives.
    /// Returns the number of ratings moved.
    pub fn decay_toward_seed(&mut self, seeds: &SeedTable, retention: f64) -> usize {
        let retention = retention.clamp(0.0, 1.0);
        let mut moved = 0;
        for (team, rating) in self.ratings.iter_mut() {
            let seed = seeds.seed(team);
            let pull = (*rating - seed) * (1.0 - retention);
            if pull.abs() > 1.0 {
                *rating -= pull;
                moved += 1;
            }
        }
        moved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 4, 0, 0, 0).unwrap()
    }

    fn ctx<'a>(seeds: &'a SeedTable, policy: &'a KFactorPolicy) -> UpdateContext<'a> {
        UpdateContext {
            seeds,
            policy,
            home_advantage: 100.0,
            same_division: false,
        }
    }

    #[test]
    fn test_plan_does_not_mutate() {
        let book = RatingBook::default();
        let seeds = SeedTable::new(1500.0, HashMap::new());
        let policy = KFactorPolicy::default();
        let obs = Observation::new("g1", "TOR", "OTT", 3, 1, date());

        let update = book.plan_update(&obs, &ctx(&seeds, &policy));
        assert!(book.ratings.is_empty());
        assert!(update.home.delta > 0.0);
        assert_eq!(update.home.delta, -update.away.delta);
    }

    #[test]
    fn test_commit_caps_history_fifo() {
        let mut book = RatingBook::default();
        let seeds = SeedTable::new(1500.0, HashMap::new());
        let policy = KFactorPolicy::default();

        for i in 0..5 {
            let obs = Observation::new(format!("g{i}"), "TOR", "OTT", 3 + i, 1, date());
            let update = book.plan_update(&obs, &ctx(&seeds, &policy));
            book.commit(&update, 3, date());
        }

        let history = &book.history["TOR"];
        assert_eq!(history.len(), 3);
        assert_eq!(history.front().map(|e| e.score_line.as_str()), Some("5-1"));
        assert_eq!(history.back().map(|e| e.score_line.as_str()), Some("7-1"));
        assert_eq!(book.games_of("TOR"), 5);
        assert_eq!(book.history["OTT"].back().map(|e| e.outcome), Some(OutcomeLabel::Loss));
    }

    #[test]
    fn test_seed_adjustments() {
        let seeds = SeedTable::new(1500.0, HashMap::from([("COL".to_string(), 150.0)]));
        let book = RatingBook::default();
        assert_eq!(book.rating_or_seed("COL", &seeds), 1650.0);
        assert_eq!(book.rating_or_seed("SJS", &seeds), 1500.0);
    }

    #[test]
    fn test_decay_skips_small_pulls() {
        let seeds = SeedTable::new(1500.0, HashMap::new());
        let mut book = RatingBook::default();
        book.ratings.insert("FAR".to_string(), 1700.0);
        book.ratings.insert("NEAR".to_string(), 1510.0);

        let moved = book.decay_toward_seed(&seeds, 0.95);
        assert_eq!(moved, 1);
        assert!((book.ratings["FAR"] - 1690.0).abs() < 1e-9);
        assert_eq!(book.ratings["NEAR"], 1510.0);
    }
}
