//! In-memory feature source backed by pre-computed snapshots.

use crate::domain::ports::FeatureProvider;
use crate::domain::types::TeamFeatures;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::info;

/// Feature values for one team, valid from `as_of` onwards.
/// Snapshots without a date apply to every date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSnapshot {
    pub team_id: String,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
    pub values: Vec<f64>,
}

#[derive(Debug, Default)]
pub struct InMemoryFeatureProvider {
    snapshots: HashMap<String, Vec<FeatureSnapshot>>,
}

impl InMemoryFeatureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshots(snapshots: impl IntoIterator<Item = FeatureSnapshot>) -> Self {
        let mut provider = Self::new();
        for snapshot in snapshots {
            provider.insert(snapshot);
        }
        provider
    }

    /// Read a JSON array of snapshots.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read feature file {:?}", path))?;
        let snapshots: Vec<FeatureSnapshot> =
            serde_json::from_str(&content).context("Failed to parse feature snapshots")?;
        info!(
            "Loaded {} feature snapshots from {:?}",
            snapshots.len(),
            path
        );
        Ok(Self::from_snapshots(snapshots))
    }

    pub fn insert(&mut self, snapshot: FeatureSnapshot) {
        let entries = self.snapshots.entry(snapshot.team_id.clone()).or_default();
        entries.push(snapshot);
        entries.sort_by_key(|s| s.as_of);
    }

    /// Undated snapshot shorthand.
    pub fn with_team(mut self, team_id: &str, values: Vec<f64>) -> Self {
        self.insert(FeatureSnapshot {
            team_id: team_id.to_string(),
            as_of: None,
            values,
        });
        self
    }

    pub fn team_count(&self) -> usize {
        self.snapshots.len()
    }
}

impl FeatureProvider for InMemoryFeatureProvider {
    /// Latest snapshot dated at or before `as_of`.
    fn team_features(&self, team_id: &str, as_of: DateTime<Utc>) -> Option<TeamFeatures> {
        self.snapshots
            .get(team_id)?
            .iter()
            .rev()
            .find(|s| s.as_of.is_none_or(|date| date <= as_of))
            .map(|s| TeamFeatures::new(team_id, s.values.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_latest_snapshot_not_after_date() {
        let provider = InMemoryFeatureProvider::from_snapshots(vec![
            FeatureSnapshot {
                team_id: "TOR".to_string(),
                as_of: Some(day(10)),
                values: vec![2.0],
            },
            FeatureSnapshot {
                team_id: "TOR".to_string(),
                as_of: Some(day(1)),
                values: vec![1.0],
            },
        ]);

        assert_eq!(provider.team_features("TOR", day(5)).unwrap().values, vec![1.0]);
        assert_eq!(provider.team_features("TOR", day(10)).unwrap().values, vec![2.0]);
        assert!(provider.team_features("TOR", Utc.with_ymd_and_hms(2024, 12, 1, 0, 0, 0).unwrap()).is_none());
        assert!(provider.team_features("MTL", day(5)).is_none());
    }

    #[test]
    fn test_undated_snapshot_always_applies() {
        let provider = InMemoryFeatureProvider::new().with_team("EDM", vec![0.4, 0.6]);
        let features = provider.team_features("EDM", day(3)).unwrap();
        assert_eq!(features.team_id, "EDM");
        assert_eq!(features.values, vec![0.4, 0.6]);
    }
}
