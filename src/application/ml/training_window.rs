//! Bounded window of labelled feature rows used by the tree engines.

use crate::domain::errors::ModelError;
use crate::domain::ports::FeatureProvider;
use crate::domain::types::{Observation, TeamFeatures};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::warn;

/// One labelled row: home features followed by away features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub observation_id: String,
    pub features: Vec<f64>,
    /// 1.0 when the home side won
    pub label: f64,
}

/// FIFO window of training examples. The oldest rows are evicted past `capacity`.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingWindow {
    examples: VecDeque<TrainingExample>,
    capacity: usize,
}

impl TrainingWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            examples: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Rebuild a window from persisted rows, keeping the newest `capacity`.
    pub fn from_examples(examples: Vec<TrainingExample>, capacity: usize) -> Self {
        let mut window = Self::new(capacity);
        for example in examples {
            window.push(example);
        }
        window
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Width of the rows held, `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.examples.front().map(|e| e.features.len())
    }

    pub fn examples(&self) -> Vec<TrainingExample> {
        self.examples.iter().cloned().collect()
    }

    fn push(&mut self, example: TrainingExample) {
        self.examples.push_back(example);
        while self.examples.len() > self.capacity {
            self.examples.pop_front();
        }
    }

    /// Copy of this window with `new_examples` appended. Rows whose observation
    /// is already in the window are ignored, so a replayed batch is not counted twice.
    pub fn extended(&self, new_examples: Vec<TrainingExample>) -> TrainingWindow {
        let mut seen: HashSet<String> = self
            .examples
            .iter()
            .map(|e| e.observation_id.clone())
            .collect();
        let mut next = self.clone();
        for example in new_examples {
            if seen.insert(example.observation_id.clone()) {
                next.push(example);
            }
        }
        next
    }

    /// Row-major feature matrix and label vector.
    pub fn matrix(&self) -> (Vec<Vec<f64>>, Vec<f64>) {
        self.examples
            .iter()
            .map(|e| (e.features.clone(), e.label))
            .unzip()
    }
}

/// Model input row for a matchup: home values followed by away values.
pub fn feature_row(home: &TeamFeatures, away: &TeamFeatures) -> Vec<f64> {
    let mut row = Vec::with_capacity(home.values.len() + away.values.len());
    row.extend_from_slice(&home.values);
    row.extend_from_slice(&away.values);
    row
}

/// A model input row must match the fitted width and hold only finite values.
pub fn check_feature_row(row: &[f64], expected: usize) -> Result<(), ModelError> {
    if row.len() != expected {
        return Err(ModelError::wrong_width(expected, row.len()));
    }
    match row.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(ModelError::non_finite_feature(index, row[index])),
        None => Ok(()),
    }
}

/// Turn a batch into labelled rows through the feature provider.
///
/// Observations with missing features, NaN or infinite values, or whose row
/// width differs from `dimension` (or from the first row built), are skipped. Returns the rows and
/// the number skipped.
pub fn examples_from_batch(
    provider: &dyn FeatureProvider,
    batch: &[Observation],
    dimension: Option<usize>,
    component: &str,
) -> (Vec<TrainingExample>, usize) {
    let mut expected = dimension;
    let mut examples = Vec::with_capacity(batch.len());
    let mut skipped = 0;

    for obs in batch {
        let home = provider.team_features(&obs.home_team, obs.game_date);
        let away = provider.team_features(&obs.away_team, obs.game_date);
        let (Some(home), Some(away)) = (home, away) else {
            warn!(
                "{}: no features for {} ({} vs {}), skipping",
                component, obs.id, obs.home_team, obs.away_team
            );
            skipped += 1;
            continue;
        };

        let row = feature_row(&home, &away);
        if row.is_empty() {
            warn!("{}: empty feature row for {}, skipping", component, obs.id);
            skipped += 1;
            continue;
        }

        if let Some(index) = row.iter().position(|v| !v.is_finite()) {
            warn!(
                "{}: non-finite value {} at position {} for {}, skipping",
                component, row[index], index, obs.id
            );
            skipped += 1;
            continue;
        }

        match expected {
            Some(width) if width != row.len() => {
                warn!(
                    "{}: feature row for {} has {} values, expected {}, skipping",
                    component,
                    obs.id,
                    row.len(),
                    width
                );
                skipped += 1;
                continue;
            }
            _ => expected = Some(row.len()),
        }

        examples.push(TrainingExample {
            observation_id: obs.id.clone(),
            features: row,
            label: obs.home_label(),
        });
    }

    (examples, skipped)
}
