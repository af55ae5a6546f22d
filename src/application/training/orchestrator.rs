//! Adaptive batch training.
//!
//! Every accepted observation is appended to each family's queue. A family whose
//! queue reaches its adaptive threshold is retrained on a copy of the whole queue,
//! its model is persisted and the trained observations are removed. Fitting and
//! writing happen outside the queue lock. The queues themselves are persisted after
//! every submission so nothing accepted is lost across a restart.

use super::batch_queue::{BATCH_QUEUE_SCHEMA_VERSION, BatchQueueDocument, BatchReport, FamilyLane};
use crate::application::ml::{restore_document, validate_observation};
use crate::config::BatchConfig;
use crate::domain::errors::ModelError;
use crate::domain::ports::BatchTrainable;
use crate::domain::repositories::DocumentRepository;
use crate::domain::types::{ModelFamily, Observation, TrainingReport};
use chrono::Utc;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

const COMPONENT: &str = "BatchOrchestrator";

pub struct BatchTrainingOrchestrator {
    config: BatchConfig,
    lanes: Vec<FamilyLane>,
    total_observed: AtomicU64,
    repository: Arc<dyn DocumentRepository<BatchQueueDocument>>,
    /// Next snapshot revision; held while a snapshot is taken
    next_revision: Mutex<u64>,
    /// Revision of the last document written
    written_revision: Mutex<u64>,
}

impl BatchTrainingOrchestrator {
    /// Build the orchestrator over `trainers`, restoring persisted queues.
    ///
    /// Queued observations a trainer reports as already absorbed are dropped from
    /// that family's queue: the model was saved but the queue write never happened.
    pub fn new(
        config: BatchConfig,
        trainers: Vec<Arc<dyn BatchTrainable>>,
        repository: Arc<dyn DocumentRepository<BatchQueueDocument>>,
    ) -> Self {
        let mut document = restore_document(
            repository.as_ref(),
            COMPONENT,
            BATCH_QUEUE_SCHEMA_VERSION,
            |doc| doc.schema_version,
        )
        .unwrap_or_else(BatchQueueDocument::empty);

        let lanes: Vec<FamilyLane> = trainers
            .into_iter()
            .map(|trainer| {
                let family = trainer.family();
                let mut queued = document.queues.remove(&family).unwrap_or_default();
                let absorbed = trainer.absorbed_ids();
                let before = queued.len();
                queued.retain(|obs| !absorbed.contains(&obs.id));
                if queued.len() < before {
                    info!(
                        "{}: {} queued observations already absorbed by {}, removed",
                        COMPONENT,
                        before - queued.len(),
                        family
                    );
                }
                FamilyLane::new(trainer, queued)
            })
            .collect();

        for (family, orphaned) in &document.queues {
            if !orphaned.is_empty() {
                warn!(
                    "{}: dropping {} queued observations for unregistered family {}",
                    COMPONENT,
                    orphaned.len(),
                    family
                );
            }
        }

        info!(
            "{}: {} families, {} lifetime observations, {} queued",
            COMPONENT,
            lanes.len(),
            document.total_observed,
            lanes
                .iter()
                .map(|lane| lane.queue.lock().map(|q| q.len()).unwrap_or(0))
                .sum::<usize>()
        );

        Self {
            config,
            lanes,
            total_observed: AtomicU64::new(document.total_observed),
            repository,
            next_revision: Mutex::new(document.revision),
            written_revision: Mutex::new(document.revision),
        }
    }

    /// Accept one finished observation, retrain every family that became due and
    /// persist the queues.
    pub fn submit_observation(&self, obs: Observation) -> Result<BatchReport, ModelError> {
        validate_observation(&obs)?;

        let total = self.total_observed.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = BatchReport {
            observation_id: obs.id.clone(),
            total_observed: total,
            ..BatchReport::default()
        };

        for lane in &self.lanes {
            let threshold = self.config.threshold(lane.family, total);
            let queued = {
                let mut queue = lock_queue(lane)?;
                queue.push_back(obs.clone());
                queue.len()
            };

            if queued >= threshold {
                debug!(
                    "{}: {} queue reached {} (threshold {})",
                    COMPONENT, lane.family, queued, threshold
                );
                match drain_when(lane, |len| len >= threshold) {
                    Ok(Some(training)) => {
                        report.trained.insert(lane.family, training);
                    }
                    // A concurrent submission drained the queue first.
                    Ok(None) => {}
                    Err(e) => {
                        report.failed.insert(lane.family, e.to_string());
                    }
                }
            }
            report.queue_lengths.insert(lane.family, lock_queue(lane)?.len());
        }

        self.persist_queues();
        Ok(report)
    }

    /// Retrain every family with a non-empty queue, regardless of thresholds.
    ///
    /// All families are attempted; the error names those that failed.
    pub fn force_batch_training(
        &self,
    ) -> Result<BTreeMap<ModelFamily, TrainingReport>, ModelError> {
        let mut trained = BTreeMap::new();
        let mut failed = Vec::new();

        for lane in &self.lanes {
            let pending = lock_queue(lane)?.len();
            if pending == 0 {
                continue;
            }
            info!(
                "{}: forcing {} retrain on {} observations",
                COMPONENT, lane.family, pending
            );
            match drain_when(lane, |len| len > 0) {
                Ok(Some(report)) => {
                    trained.insert(lane.family, report);
                }
                Ok(None) => {}
                Err(_) => failed.push(lane.family.as_str()),
            }
        }

        self.persist_queues();

        if failed.is_empty() {
            Ok(trained)
        } else {
            Err(ModelError::TrainingFailed {
                families: failed.join(", "),
            })
        }
    }

    pub fn queue_lengths(&self) -> BTreeMap<ModelFamily, usize> {
        self.lanes
            .iter()
            .map(|lane| {
                let len = lane.queue.lock().map(|q| q.len()).unwrap_or(0);
                (lane.family, len)
            })
            .collect()
    }

    /// Current adaptive threshold of every registered family.
    pub fn thresholds(&self) -> BTreeMap<ModelFamily, usize> {
        let total = self.total_observed();
        self.lanes
            .iter()
            .map(|lane| (lane.family, self.config.threshold(lane.family, total)))
            .collect()
    }

    pub fn total_observed(&self) -> u64 {
        self.total_observed.load(Ordering::SeqCst)
    }

    pub fn families(&self) -> Vec<ModelFamily> {
        self.lanes.iter().map(|lane| lane.family).collect()
    }

    /// Write the queues, logging instead of failing: the in-memory queues stay
    /// authoritative and the next submission writes again.
    fn persist_queues(&self) {
        let document = match self.snapshot() {
            Ok(document) => document,
            Err(e) => {
                error!("{}: cannot snapshot queues: {}", COMPONENT, e);
                return;
            }
        };

        let Ok(mut written) = self.written_revision.lock() else {
            error!("{}: queue write lock poisoned", COMPONENT);
            return;
        };
        if *written > document.revision {
            debug!(
                "{}: skipping stale queue snapshot {} (written {})",
                COMPONENT, document.revision, *written
            );
            return;
        }
        match self.repository.save(&document) {
            Ok(()) => *written = document.revision,
            Err(e) => warn!(
                "{}: failed to persist queues to {}: {:#}",
                COMPONENT,
                self.repository.location(),
                e
            ),
        }
    }

    fn snapshot(&self) -> Result<BatchQueueDocument, ModelError> {
        let mut next = self
            .next_revision
            .lock()
            .map_err(|_| ModelError::lock_poisoned("queue revision"))?;
        *next += 1;

        let mut queues = BTreeMap::new();
        for lane in &self.lanes {
            let queue = lock_queue(lane)?;
            queues.insert(lane.family, queue.iter().cloned().collect());
        }

        Ok(BatchQueueDocument {
            schema_version: BATCH_QUEUE_SCHEMA_VERSION,
            queues,
            total_observed: self.total_observed(),
            revision: *next,
            last_saved: Some(Utc::now()),
        })
    }
}

fn lock_queue(lane: &FamilyLane) -> Result<MutexGuard<'_, VecDeque<Observation>>, ModelError> {
    lane.queue
        .lock()
        .map_err(|_| ModelError::lock_poisoned(lane.family.as_str()))
}

/// Retrain on a copy of the queue when `due` holds for its length, persist the
/// model, then remove the trained observations from the queue front.
///
/// The queue lock is released while the model is fitted and written, so
/// submissions and queue snapshots proceed. A failed retrain leaves the queue
/// untouched. Returns `Ok(None)` when the queue is no longer due.
fn drain_when(
    lane: &FamilyLane,
    due: impl Fn(usize) -> bool,
) -> Result<Option<TrainingReport>, ModelError> {
    let _training = lane
        .training
        .lock()
        .map_err(|_| ModelError::lock_poisoned(lane.family.as_str()))?;

    let batch: Vec<Observation> = {
        let queue = lock_queue(lane)?;
        if !due(queue.len()) {
            return Ok(None);
        }
        queue.iter().cloned().collect()
    };

    let report = match lane.trainer.train_batch(&batch) {
        Ok(report) => report,
        Err(e) => {
            warn!(
                "{}: {} retrain failed, keeping {} queued: {}",
                COMPONENT,
                lane.family,
                batch.len(),
                e
            );
            return Err(e);
        }
    };

    if let Err(e) = lane.trainer.persist() {
        warn!(
            "{}: {} model trained but not saved: {}",
            COMPONENT,
            lane.family,
            ModelError::persistence(&e)
        );
    }

    info!(
        "{}: {} retrained on {} observations ({} absorbed, {} skipped, {}ms)",
        COMPONENT,
        lane.family,
        batch.len(),
        report.absorbed,
        report.skipped,
        report.duration_ms
    );

    let mut queue = lock_queue(lane)?;
    let trained = batch.len().min(queue.len());
    queue.drain(..trained);
    Ok(Some(report))
}
