//! Repository abstraction for durable model state.
//!
//! Every engine persists its state as one self-describing document that is
//! replaced in full on each write and read in full on start. Implementations live
//! in `infrastructure::persistence`.

use anyhow::Result;

/// Whole-document store for one persisted artifact
pub trait DocumentRepository<T>: Send + Sync {
    /// Load the stored document, `None` when nothing has been written yet
    fn load(&self) -> Result<Option<T>>;

    /// Replace the stored document
    fn save(&self, document: &T) -> Result<()>;

    /// Human readable location, for logs
    fn location(&self) -> String;
}
