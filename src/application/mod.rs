// Process wiring
pub mod bootstrap;

// Scoring engines
pub mod ml;

// Batch queues and retrain scheduling
pub mod training;
