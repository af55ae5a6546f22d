//! Per-family observation queues and their persisted form.

use crate::domain::ports::BatchTrainable;
use crate::domain::types::{ModelFamily, Observation, TrainingReport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

pub const BATCH_QUEUE_SCHEMA_VERSION: u32 = 1;

/// Every family's pending observations, written as one document after each
/// orchestrator step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchQueueDocument {
    pub schema_version: u32,
    pub queues: BTreeMap<ModelFamily, Vec<Observation>>,
    /// Lifetime observations accepted by the orchestrator
    pub total_observed: u64,
    /// Increases with every snapshot; a lower revision never replaces a higher one
    pub revision: u64,
    pub last_saved: Option<DateTime<Utc>>,
}

impl BatchQueueDocument {
    pub fn empty() -> Self {
        Self {
            schema_version: BATCH_QUEUE_SCHEMA_VERSION,
            queues: BTreeMap::new(),
            total_observed: 0,
            revision: 0,
            last_saved: None,
        }
    }

    pub fn queued(&self) -> usize {
        self.queues.values().map(Vec::len).sum()
    }
}

/// One family's trainer together with its queue.
///
/// The queue mutex is held only to append, copy or remove observations.
/// Retrains of a family are serialized on `training`, and only its holder
/// removes observations, so the queue front is always the batch being trained.
pub(crate) struct FamilyLane {
    pub family: ModelFamily,
    pub trainer: Arc<dyn BatchTrainable>,
    pub queue: Mutex<VecDeque<Observation>>,
    pub training: Mutex<()>,
}

impl FamilyLane {
    pub fn new(trainer: Arc<dyn BatchTrainable>, queued: Vec<Observation>) -> Self {
        Self {
            family: trainer.family(),
            trainer,
            queue: Mutex::new(queued.into()),
            training: Mutex::new(()),
        }
    }
}

/// Outcome of one submitted observation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub observation_id: String,
    /// Families retrained by this submission
    pub trained: BTreeMap<ModelFamily, TrainingReport>,
    /// Families whose retrain failed, with the reason; their queues were kept
    pub failed: BTreeMap<ModelFamily, String>,
    pub queue_lengths: BTreeMap<ModelFamily, usize>,
    pub total_observed: u64,
}

impl BatchReport {
    pub fn retrained(&self) -> bool {
        !self.trained.is_empty()
    }
}
