//! Elo arithmetic: expected score, outcome labels, dynamic K-factor and
//! rating-confidence dynamics.

use crate::domain::types::Observation;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Expected score of side 1 against side 2 on the logistic Elo curve.
pub fn expected_score(rating: f64, opponent: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((opponent - rating) / 400.0))
}

/// Result of a contest from one side's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeLabel {
    #[serde(rename = "W")]
    Win,
    #[serde(rename = "L")]
    Loss,
    /// Lost in overtime or shootout
    #[serde(rename = "OTL")]
    OvertimeLoss,
    #[serde(rename = "T")]
    Tie,
}

impl OutcomeLabel {
    /// Home-side label for a finished observation.
    pub fn for_home(obs: &Observation) -> Self {
        if obs.home_won() {
            OutcomeLabel::Win
        } else if obs.away_won() {
            if obs.extra_time {
                OutcomeLabel::OvertimeLoss
            } else {
                OutcomeLabel::Loss
            }
        } else {
            OutcomeLabel::Tie
        }
    }

    /// Label seen by the opposing side.
    pub fn mirrored(&self) -> Self {
        match self {
            OutcomeLabel::Win => OutcomeLabel::Loss,
            OutcomeLabel::Loss | OutcomeLabel::OvertimeLoss => OutcomeLabel::Win,
            OutcomeLabel::Tie => OutcomeLabel::Tie,
        }
    }

    /// Actual score fed into the Elo update. Overtime losses earn partial credit.
    pub fn actual_score(&self) -> f64 {
        match self {
            OutcomeLabel::Win => 1.0,
            OutcomeLabel::Loss => 0.0,
            OutcomeLabel::OvertimeLoss | OutcomeLabel::Tie => 0.5,
        }
    }
}

impl fmt::Display for OutcomeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeLabel::Win => write!(f, "W"),
            OutcomeLabel::Loss => write!(f, "L"),
            OutcomeLabel::OvertimeLoss => write!(f, "OTL"),
            OutcomeLabel::Tie => write!(f, "T"),
        }
    }
}

/// Multipliers applied on top of the base K-factor.
///
/// Every factor is bounded on its own; the final K is their product.
#[derive(Debug, Clone, PartialEq)]
pub struct KFactorPolicy {
    pub base_k: f64,
    /// Games over which the learning rate decays toward its floor
    pub experience_horizon: f64,
    /// Fraction of base K that never decays away
    pub experience_floor: f64,
    pub extra_time_multiplier: f64,
    pub blowout_margin: u32,
    pub blowout_multiplier: f64,
    pub decisive_margin: u32,
    pub decisive_multiplier: f64,
    pub rating_gap_threshold: f64,
    pub expected_result_multiplier: f64,
    pub upset_multiplier: f64,
    pub playoff_multiplier: f64,
    pub rivalry_multiplier: f64,
}

impl Default for KFactorPolicy {
    fn default() -> Self {
        Self {
            base_k: 32.0,
            experience_horizon: 30.0,
            experience_floor: 0.7,
            extra_time_multiplier: 0.8,
            blowout_margin: 4,
            blowout_multiplier: 1.2,
            decisive_margin: 3,
            decisive_multiplier: 1.1,
            rating_gap_threshold: 200.0,
            expected_result_multiplier: 0.9,
            upset_multiplier: 1.3,
            playoff_multiplier: 1.5,
            rivalry_multiplier: 1.1,
        }
    }
}

/// Context the K-factor depends on, gathered from the pre-update snapshot.
#[derive(Debug, Clone, Copy)]
pub struct KFactorInputs {
    pub home_rating: f64,
    pub away_rating: f64,
    pub home_games: u32,
    pub away_games: u32,
    pub same_division: bool,
}

impl KFactorPolicy {
    pub fn k_factor(&self, obs: &Observation, inputs: &KFactorInputs) -> f64 {
        let mut k = self.base_k;

        k *= self.experience_factor(inputs.home_games, inputs.away_games);

        if obs.extra_time {
            k *= self.extra_time_multiplier;
        }

        let margin = obs.margin();
        if margin >= self.blowout_margin {
            k *= self.blowout_multiplier;
        } else if margin >= self.decisive_margin {
            k *= self.decisive_multiplier;
        }

        let gap = inputs.home_rating - inputs.away_rating;
        if gap.abs() > self.rating_gap_threshold {
            let favourite_won = (gap > 0.0 && obs.home_won()) || (gap < 0.0 && obs.away_won());
            if favourite_won {
                k *= self.expected_result_multiplier;
            } else {
                k *= self.upset_multiplier;
            }
        }

        if obs.playoff {
            k *= self.playoff_multiplier;
        }
        if inputs.same_division {
            k *= self.rivalry_multiplier;
        }

        k
    }

    /// Learning-rate decay as both sides accumulate games, bounded to [floor, 1].
    pub fn experience_factor(&self, home_games: u32, away_games: u32) -> f64 {
        let avg_games = (u64::from(home_games) + u64::from(away_games)) as f64 / 2.0;
        let horizon = self.experience_horizon.max(f64::EPSILON);
        let decay = 1.0 / (1.0 + avg_games / horizon);
        let floor = self.experience_floor.clamp(0.0, 1.0);
        (floor + (1.0 - floor) * decay).clamp(floor, 1.0)
    }
}

/// Rating confidence after applying a delta of the given size.
///
/// Large swings erode confidence, small ones build it slowly. Always in [0, 1].
pub fn next_confidence(current: f64, delta: f64) -> f64 {
    let current = current.clamp(0.0, 1.0);
    let impact = (delta.abs() / 50.0).min(1.0);
    let next = if impact > 0.2 {
        current * (1.0 - impact * 0.1)
    } else {
        current + 0.01
    };
    next.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn obs(home: u32, away: u32) -> Observation {
        Observation::new(
            "g",
            "A",
            "B",
            home,
            away,
            Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        )
    }

    fn neutral_inputs(home_rating: f64, away_rating: f64) -> KFactorInputs {
        KFactorInputs {
            home_rating,
            away_rating,
            home_games: 0,
            away_games: 0,
            same_division: false,
        }
    }

    #[test]
    fn test_expected_score_symmetry() {
        let e = expected_score(1700.0, 1400.0);
        assert!((e - 0.8490).abs() < 0.001);
        assert!((e + expected_score(1400.0, 1700.0) - 1.0).abs() < 1e-12);
        assert!((expected_score(1500.0, 1500.0) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(OutcomeLabel::for_home(&obs(3, 1)), OutcomeLabel::Win);
        assert_eq!(OutcomeLabel::for_home(&obs(1, 3)), OutcomeLabel::Loss);
        assert_eq!(
            OutcomeLabel::for_home(&obs(2, 3).with_extra_time(true)),
            OutcomeLabel::OvertimeLoss
        );
        assert_eq!(OutcomeLabel::OvertimeLoss.mirrored(), OutcomeLabel::Win);
        assert_eq!(OutcomeLabel::OvertimeLoss.actual_score(), 0.5);
        assert_eq!(OutcomeLabel::Tie.mirrored(), OutcomeLabel::Tie);
    }

    #[test]
    fn test_base_k_without_modifiers() {
        let policy = KFactorPolicy::default();
        let k = policy.k_factor(&obs(2, 1), &neutral_inputs(1600.0, 1400.0));
        assert!((k - 32.0).abs() < 1e-9);
    }

    #[test]
    fn test_margin_and_extra_time_modifiers() {
        let policy = KFactorPolicy::default();
        let blowout = policy.k_factor(&obs(6, 1), &neutral_inputs(1500.0, 1500.0));
        assert!((blowout - 32.0 * 1.2).abs() < 1e-9);

        let decisive = policy.k_factor(&obs(4, 1), &neutral_inputs(1500.0, 1500.0));
        assert!((decisive - 32.0 * 1.1).abs() < 1e-9);

        let overtime = policy.k_factor(
            &obs(3, 2).with_extra_time(true),
            &neutral_inputs(1500.0, 1500.0),
        );
        assert!((overtime - 32.0 * 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_upset_amplification() {
        let policy = KFactorPolicy::default();
        let upset = policy.k_factor(&obs(1, 2), &neutral_inputs(1750.0, 1500.0));
        assert!((upset - 32.0 * 1.3).abs() < 1e-9);

        let expected = policy.k_factor(&obs(2, 1), &neutral_inputs(1750.0, 1500.0));
        assert!((expected - 32.0 * 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_experience_factor_bounded() {
        let policy = KFactorPolicy::default();
        assert!((policy.experience_factor(0, 0) - 1.0).abs() < 1e-12);
        let seasoned = policy.experience_factor(30, 30);
        assert!((seasoned - 0.85).abs() < 1e-12);
        let veteran = policy.experience_factor(u32::MAX, u32::MAX);
        assert!(veteran >= 0.7 && veteran < 0.71);
    }

    #[test]
    fn test_importance_multipliers() {
        let policy = KFactorPolicy::default();
        let mut inputs = neutral_inputs(1500.0, 1500.0);
        inputs.same_division = true;
        let k = policy.k_factor(&obs(2, 1).with_playoff(true), &inputs);
        assert!((k - 32.0 * 1.5 * 1.1).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_stays_in_unit_interval() {
        let mut c = 0.5;
        for delta in [0.0, 80.0, -120.0, 3.0, 1e9, -1e9, 0.1] {
            c = next_confidence(c, delta);
            assert!((0.0..=1.0).contains(&c));
        }
        let mut c = 0.995;
        for _ in 0..10 {
            c = next_confidence(c, 0.5);
        }
        assert_eq!(c, 1.0);
    }

    #[test]
    fn test_large_delta_reduces_confidence() {
        let c = next_confidence(0.5, 50.0);
        assert!((c - 0.45).abs() < 1e-12);
        let c = next_confidence(0.5, 5.0);
        assert!((c - 0.51).abs() < 1e-12);
    }
}
