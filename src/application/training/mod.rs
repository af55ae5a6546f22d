//! Queueing and scheduling of batch retrains.

pub mod batch_queue;
pub mod orchestrator;

pub use batch_queue::{BATCH_QUEUE_SCHEMA_VERSION, BatchQueueDocument, BatchReport};
pub use orchestrator::BatchTrainingOrchestrator;
