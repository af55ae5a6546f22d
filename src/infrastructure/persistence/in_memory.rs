//! In-memory document store.
//!
//! Keeps the last saved document in process memory. Writes can be switched to
//! fail, which lets tests drive the storage-failure paths of the engines.

use crate::domain::repositories::DocumentRepository;
use anyhow::{Result, bail};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

pub struct InMemoryDocumentRepository<T> {
    document: RwLock<Option<T>>,
    fail_writes: AtomicBool,
    saves: AtomicUsize,
}

impl<T> InMemoryDocumentRepository<T> {
    pub fn new() -> Self {
        Self {
            document: RwLock::new(None),
            fail_writes: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    /// Store pre-seeded with `document`, as if written by an earlier process.
    pub fn with_document(document: T) -> Self {
        Self {
            document: RwLock::new(Some(document)),
            fail_writes: AtomicBool::new(false),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl<T> Default for InMemoryDocumentRepository<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> DocumentRepository<T> for InMemoryDocumentRepository<T>
where
    T: Clone + Send + Sync,
{
    fn load(&self) -> Result<Option<T>> {
        match self.document.read() {
            Ok(guard) => Ok(guard.clone()),
            Err(_) => bail!("in-memory document lock poisoned"),
        }
    }

    fn save(&self, document: &T) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("simulated write failure");
        }
        match self.document.write() {
            Ok(mut guard) => {
                *guard = Some(document.clone());
                self.saves.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            Err(_) => bail!("in-memory document lock poisoned"),
        }
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let repo = InMemoryDocumentRepository::new();
        assert!(repo.load().unwrap().is_none());

        repo.save(&vec![1, 2, 3]).unwrap();
        assert_eq!(repo.load().unwrap(), Some(vec![1, 2, 3]));
        assert_eq!(repo.save_count(), 1);
    }

    #[test]
    fn test_failing_writes_keep_previous_document() {
        let repo = InMemoryDocumentRepository::with_document("v1".to_string());
        repo.set_fail_writes(true);

        assert!(repo.save(&"v2".to_string()).is_err());
        assert_eq!(repo.load().unwrap().as_deref(), Some("v1"));
        assert_eq!(repo.save_count(), 0);
    }
}
