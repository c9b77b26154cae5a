//! # History Store
//!
//! Persisted record of every image the source has handed out, in insertion
//! order. This is the single source of truth for duplicate detection across
//! restarts: the in-memory candidate list is rebuilt from here at startup.
//!
//! ## Storage
//! One JSON array in `~/.config/simple-desktops-wallpaper/history.json`.
//! Every mutation rewrites the file through a temp file and an atomic
//! rename *before* returning, so a crash immediately after a successful
//! call cannot lose the record and a concurrent reader never observes a
//! half-written file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::candidate::SdImage;
use crate::config::app_config_dir;
use crate::error::{Error, Result};

/// A previously returned image, as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Preview-resolution URL of the image.
    pub preview_url: String,
    /// When the record was inserted. Storage order is insertion order; the
    /// timestamp is informational.
    pub inserted_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn new(preview_url: impl Into<String>) -> Self {
        Self {
            preview_url: preview_url.into(),
            inserted_at: Utc::now(),
        }
    }

    /// Dedup name derived from the preview URL, if derivable.
    pub fn name(&self) -> Option<String> {
        SdImage::new(self.preview_url.as_str()).name()
    }
}

/// Ordered, persisted history of previously seen images.
pub struct HistoryStore {
    path: PathBuf,
    records: Mutex<Vec<HistoryRecord>>,
}

impl HistoryStore {
    /// Default location next to the config file.
    pub fn default_path() -> Option<PathBuf> {
        app_config_dir().map(|p| p.join("history.json"))
    }

    /// Opens the store at `path`, loading any existing records.
    ///
    /// A missing file is an empty history. An unreadable or unparseable
    /// file is a storage error; silently discarding history would defeat
    /// duplicate detection.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        let records = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| Error::storage("history decode", e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::storage("history read", e)),
        };

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Appends a record and persists synchronously.
    ///
    /// The in-memory list is only updated once the write has succeeded, so
    /// a failed insert leaves the store unchanged.
    pub fn insert(&self, record: HistoryRecord) -> Result<()> {
        let mut records = self.records.lock().expect("history lock poisoned");

        let mut next = records.clone();
        next.push(record);
        self.persist(&next)?;

        *records = next;
        Ok(())
    }

    /// Removes the record whose derived name matches, if any.
    ///
    /// A missing record is a no-op, not an error: the caller only knows the
    /// image should be gone, and it already is.
    pub fn remove(&self, name: &str) -> Result<()> {
        let mut records = self.records.lock().expect("history lock poisoned");

        let Some(index) = records
            .iter()
            .position(|r| r.name().as_deref() == Some(name))
        else {
            return Ok(());
        };

        let mut next = records.clone();
        next.remove(index);
        self.persist(&next)?;

        *records = next;
        Ok(())
    }

    /// Returns a snapshot of all records, oldest-first or newest-first.
    ///
    /// The snapshot is independent of later mutations; iterate it as often
    /// as needed.
    pub fn retrieve_all(&self, newest_first: bool) -> Vec<HistoryRecord> {
        let records = self.records.lock().expect("history lock poisoned");
        if newest_first {
            records.iter().rev().cloned().collect()
        } else {
            records.clone()
        }
    }

    /// Looks up a record by its derived name.
    pub fn retrieve(&self, name: &str) -> Option<HistoryRecord> {
        let records = self.records.lock().expect("history lock poisoned");
        records
            .iter()
            .find(|r| r.name().as_deref() == Some(name))
            .cloned()
    }

    /// Writes `records` to disk through a temp file and atomic rename.
    fn persist(&self, records: &[HistoryRecord]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| Error::storage("history dir", e))?;
        }

        let content = serde_json::to_string_pretty(records)
            .map_err(|e| Error::storage("history encode", e))?;

        let tmp = tmp_path(&self.path);
        std::fs::write(&tmp, content).map_err(|e| Error::storage("history write", e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| Error::storage("history replace", e))?;

        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREVIEW_A: &str =
        "http://static.simpledesktops.com/uploads/desktops/2020/01/30/a.png.295x184_q100.png";
    const PREVIEW_B: &str =
        "http://static.simpledesktops.com/uploads/desktops/2020/02/14/b.png.295x184_q100.png";

    fn store_in(dir: &tempfile::TempDir) -> HistoryStore {
        HistoryStore::open(dir.path().join("history.json")).unwrap()
    }

    #[test]
    fn retrieval_order_follows_insertion() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.insert(HistoryRecord::new(PREVIEW_A)).unwrap();
        store.insert(HistoryRecord::new(PREVIEW_B)).unwrap();

        let newest_first = store.retrieve_all(true);
        assert_eq!(newest_first[0].preview_url, PREVIEW_B);
        assert_eq!(newest_first[1].preview_url, PREVIEW_A);

        let oldest_first = store.retrieve_all(false);
        assert_eq!(oldest_first[0].preview_url, PREVIEW_A);
    }

    #[test]
    fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        {
            let store = HistoryStore::open(&path).unwrap();
            store.insert(HistoryRecord::new(PREVIEW_A)).unwrap();
        }

        let reopened = HistoryStore::open(&path).unwrap();
        let records = reopened.retrieve_all(true);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].preview_url, PREVIEW_A);
    }

    #[test]
    fn remove_by_name_and_missing_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.insert(HistoryRecord::new(PREVIEW_A)).unwrap();
        let name = HistoryRecord::new(PREVIEW_A).name().unwrap();

        store.remove(&name).unwrap();
        assert!(store.retrieve_all(true).is_empty());

        // Removing again is fine.
        store.remove(&name).unwrap();
        store.remove("never-existed.png").unwrap();
    }

    #[test]
    fn retrieve_finds_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.insert(HistoryRecord::new(PREVIEW_A)).unwrap();
        store.insert(HistoryRecord::new(PREVIEW_B)).unwrap();

        let record = store.retrieve("2020-01-30-a.png").unwrap();
        assert_eq!(record.preview_url, PREVIEW_A);
        assert!(store.retrieve("2020-01-30-missing.png").is_none());
    }

    #[test]
    fn no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(&dir);

        store.insert(HistoryRecord::new(PREVIEW_A)).unwrap();
        assert!(!dir.path().join("history.json.tmp").exists());
        assert!(dir.path().join("history.json").exists());
    }

    #[test]
    fn corrupt_file_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(HistoryStore::open(&path).is_err());
    }
}
