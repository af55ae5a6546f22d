//! JSON file storage for model state documents.
//!
//! Each document is written in full to a temp file next to its target and then
//! renamed over it, so a reader never observes a half-written file.

use crate::domain::repositories::DocumentRepository;
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Whole-document JSON store at a fixed path.
pub struct JsonFileRepository<T> {
    file_path: PathBuf,
    _document: PhantomData<fn() -> T>,
}

impl<T> JsonFileRepository<T> {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            _document: PhantomData,
        }
    }

    /// Store `file_name` inside `data_dir`.
    pub fn in_dir(data_dir: &Path, file_name: &str) -> Self {
        Self::new(data_dir.join(file_name))
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }
}

impl<T> DocumentRepository<T> for JsonFileRepository<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<Option<T>> {
        if !self.file_path.exists() {
            debug!("No state file at {:?}", self.file_path);
            return Ok(None);
        }

        let content = fs::read_to_string(&self.file_path)
            .with_context(|| format!("Failed to read {:?}", self.file_path))?;
        let document: T = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", self.file_path))?;

        info!("Loaded state from {:?}", self.file_path);
        Ok(Some(document))
    }

    fn save(&self, document: &T) -> Result<()> {
        if let Some(parent) = self.file_path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).context("Failed to create data directory")?;
        }

        let content =
            serde_json::to_string_pretty(document).context("Failed to serialize state")?;

        // Atomic write: write to temp file then rename
        let temp_path = self.file_path.with_extension("json.tmp");
        fs::write(&temp_path, content).context("Failed to write temp file")?;
        fs::rename(&temp_path, &self.file_path).context("Failed to rename temp file")?;

        debug!("Saved state to {:?}", self.file_path);
        Ok(())
    }

    fn location(&self) -> String {
        self.file_path.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicU64, Ordering};

    static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        schema_version: u32,
        ratings: Vec<(String, f64)>,
    }

    fn create_test_dir() -> PathBuf {
        let unique_id = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let temp_dir = std::env::temp_dir().join(format!(
            "matchcast_test_{}_{}_{}_json_store",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0),
            unique_id
        ));
        fs::create_dir_all(&temp_dir).expect("Failed to create test temp dir");
        temp_dir
    }

    #[test]
    fn test_load_nonexistent_returns_none() {
        let dir = create_test_dir();
        let repo: JsonFileRepository<Sample> = JsonFileRepository::in_dir(&dir, "missing.json");
        assert!(repo.load().unwrap().is_none());
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_save_creates_parent_and_roundtrips() {
        let dir = create_test_dir();
        let repo = JsonFileRepository::new(dir.join("nested").join("state.json"));
        let doc = Sample {
            schema_version: 1,
            ratings: vec![("TOR".to_string(), 1512.5)],
        };

        repo.save(&doc).unwrap();
        assert!(!dir.join("nested").join("state.json.tmp").exists());
        assert_eq!(repo.load().unwrap(), Some(doc));
        fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = create_test_dir();
        let path = dir.join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let repo: JsonFileRepository<Sample> = JsonFileRepository::new(&path);
        let err = repo.load().unwrap_err();
        assert!(format!("{err:#}").contains("Failed to parse"));
        fs::remove_dir_all(dir).ok();
    }
}
