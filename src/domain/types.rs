use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a contest as reported by the upstream schedule feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameState {
    Scheduled,
    Live,
    #[default]
    Final,
    Off,
}

impl GameState {
    /// Only finished contests may feed the learning pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, GameState::Final | GameState::Off)
    }
}

impl fmt::Display for GameState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameState::Scheduled => write!(f, "SCHEDULED"),
            GameState::Live => write!(f, "LIVE"),
            GameState::Final => write!(f, "FINAL"),
            GameState::Off => write!(f, "OFF"),
        }
    }
}

/// One completed contest. Entity A is the home side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Idempotency key assigned by the ingestion side
    pub id: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    pub game_date: DateTime<Utc>,
    /// Decided in overtime or by shootout
    #[serde(default)]
    pub extra_time: bool,
    #[serde(default)]
    pub game_state: GameState,
    #[serde(default)]
    pub playoff: bool,
}

impl Observation {
    pub fn new(
        id: impl Into<String>,
        home_team: impl Into<String>,
        away_team: impl Into<String>,
        home_score: u32,
        away_score: u32,
        game_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            home_team: home_team.into(),
            away_team: away_team.into(),
            home_score,
            away_score,
            game_date,
            extra_time: false,
            game_state: GameState::Final,
            playoff: false,
        }
    }

    pub fn with_extra_time(mut self, extra_time: bool) -> Self {
        self.extra_time = extra_time;
        self
    }

    pub fn with_state(mut self, state: GameState) -> Self {
        self.game_state = state;
        self
    }

    pub fn with_playoff(mut self, playoff: bool) -> Self {
        self.playoff = playoff;
        self
    }

    pub fn home_won(&self) -> bool {
        self.home_score > self.away_score
    }

    pub fn away_won(&self) -> bool {
        self.away_score > self.home_score
    }

    pub fn margin(&self) -> u32 {
        self.home_score.abs_diff(self.away_score)
    }

    /// Binary training label: 1.0 when the home side won.
    pub fn home_label(&self) -> f64 {
        if self.home_won() { 1.0 } else { 0.0 }
    }

    pub fn score_line(&self) -> String {
        format!("{}-{}", self.home_score, self.away_score)
    }
}

/// Opaque per-entity inputs produced by the feature-engineering services.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamFeatures {
    pub team_id: String,
    #[serde(default)]
    pub values: Vec<f64>,
}

impl TeamFeatures {
    pub fn new(team_id: impl Into<String>, values: Vec<f64>) -> Self {
        Self {
            team_id: team_id.into(),
            values,
        }
    }

    /// Features for an entity with no engineered inputs (rating-only models).
    pub fn bare(team_id: impl Into<String>) -> Self {
        Self::new(team_id, Vec::new())
    }
}

/// Output of a single model for one matchup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResult {
    pub model_name: String,
    pub win_probability: f64,
    pub confidence: f64,
    pub predicted_score: String,
    pub weight: f64,
    pub processing_time_ms: u64,
}

/// Model family owning one batch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelFamily {
    Rating,
    GradientBoosting,
    RandomForest,
    GoalRate,
}

impl ModelFamily {
    pub const ALL: [ModelFamily; 4] = [
        ModelFamily::Rating,
        ModelFamily::GradientBoosting,
        ModelFamily::RandomForest,
        ModelFamily::GoalRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelFamily::Rating => "rating",
            ModelFamily::GradientBoosting => "gradient_boosting",
            ModelFamily::RandomForest => "random_forest",
            ModelFamily::GoalRate => "goal_rate",
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Summary of one successful batch retrain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingReport {
    /// Observations absorbed into the model
    pub absorbed: usize,
    /// Observations skipped (missing or malformed inputs)
    pub skipped: usize,
    /// Size of the data the model was fitted on after this batch
    pub fitted_on: usize,
    pub duration_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_terminal_states() {
        assert!(GameState::Final.is_terminal());
        assert!(GameState::Off.is_terminal());
        assert!(!GameState::Live.is_terminal());
        assert!(!GameState::Scheduled.is_terminal());
    }

    #[test]
    fn test_observation_defaults_when_fields_missing() {
        let json = r#"{
            "id": "2025020001",
            "home_team": "TOR",
            "away_team": "MTL",
            "home_score": 4,
            "away_score": 2,
            "game_date": "2025-01-10T00:00:00Z"
        }"#;
        let obs: Observation = serde_json::from_str(json).unwrap();
        assert_eq!(obs.game_state, GameState::Final);
        assert!(!obs.extra_time);
        assert!(!obs.playoff);
        assert_eq!(obs.home_label(), 1.0);
        assert_eq!(obs.margin(), 2);
    }

    #[test]
    fn test_family_serializes_as_snake_case_key() {
        let json = serde_json::to_string(&ModelFamily::GradientBoosting).unwrap();
        assert_eq!(json, "\"gradient_boosting\"");
        assert_eq!(ModelFamily::GoalRate.to_string(), "goal_rate");
    }

    #[test]
    fn test_tie_label_is_zero() {
        let obs = Observation::new("g1", "BOS", "NYR", 2, 2, date());
        assert_eq!(obs.home_label(), 0.0);
        assert!(!obs.home_won());
        assert!(!obs.away_won());
    }
}
