//! # Buffer Store
//!
//! One JSON-array document on local storage.
//!
//! Every write replaces the whole document: the records are serialized into
//! a temporary file next to the target, synced, then renamed over it. A
//! reader therefore sees either the previous complete array or the new one,
//! never a partial write.
//!
//! The `*_async` variants run the same file work on Tokio's blocking pool
//! and are what the offline buffer calls from the uplink worker.

use chrono::Utc;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::{Result, UplinkError};
use crate::telemetry::TelemetryRecord;

/// A single buffer document
#[derive(Debug, Clone)]
pub struct BufferStore {
    path: PathBuf,
}

impl BufferStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document strictly
    ///
    /// A missing or empty file is an empty buffer.
    ///
    /// # Errors
    ///
    /// * `BufferIo` - the file exists but cannot be read
    /// * `BufferCorrupt` - the content is not an array of records
    pub fn read(&self) -> Result<Vec<TelemetryRecord>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        if contents.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&contents).map_err(|e| UplinkError::BufferCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    /// Read the document, treating corrupt content as empty
    ///
    /// Corrupt content is moved aside (best effort) so the next write does
    /// not destroy it outright.
    pub fn load(&self) -> Result<Vec<TelemetryRecord>> {
        match self.read() {
            Err(UplinkError::BufferCorrupt { path, reason }) => {
                warn!("Discarding corrupt buffer {}: {}", path.display(), reason);
                self.quarantine();
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// Atomically replace the document with `records`
    pub fn persist(&self, records: &[TelemetryRecord]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| self.io_error(e))?;

        let mut temp = NamedTempFile::new_in(&dir).map_err(|e| self.io_error(e))?;
        serde_json::to_writer(&mut temp, records)?;
        temp.flush().map_err(|e| self.io_error(e))?;
        temp.as_file().sync_all().map_err(|e| self.io_error(e))?;
        temp.persist(&self.path).map_err(|e| self.io_error(e.error))?;

        debug!("Persisted {} record(s) to {}", records.len(), self.path.display());
        Ok(())
    }

    /// [`load`](Self::load) on the blocking thread pool
    pub async fn load_async(&self) -> Result<Vec<TelemetryRecord>> {
        let store = self.clone();
        run_blocking(move || store.load()).await
    }

    /// [`persist`](Self::persist) on the blocking thread pool
    pub async fn persist_async(&self, records: Vec<TelemetryRecord>) -> Result<()> {
        let store = self.clone();
        run_blocking(move || store.persist(&records)).await
    }

    /// Add `record` at the tail in one load/persist cycle
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Records in the document after the append
    pub async fn append_async(&self, record: TelemetryRecord) -> Result<usize> {
        let store = self.clone();
        run_blocking(move || {
            let mut records = store.load()?;
            records.push(record);
            store.persist(&records)?;
            Ok(records.len())
        })
        .await
    }

    fn quarantine(&self) {
        let mut aside = self.path.clone().into_os_string();
        aside.push(format!(".corrupt-{}", Utc::now().format("%Y%m%d%H%M%S")));
        if let Err(e) = fs::rename(&self.path, &aside) {
            debug!("Could not move corrupt buffer aside: {}", e);
        }
    }

    fn io_error(&self, source: io::Error) -> UplinkError {
        UplinkError::BufferIo {
            path: self.path.clone(),
            source,
        }
    }
}

async fn run_blocking<T, F>(task: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| UplinkError::Io(io::Error::other(e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(n: i64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: n,
            signal: -90,
            latitude: None,
            longitude: None,
            accuracy: None,
            speed: None,
            device: "test".to_string(),
            android_version: 34,
            source: "unit".to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path().join("absent.json"));
        assert!(store.read().unwrap().is_empty());
    }

    #[test]
    fn test_blank_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("blank.json");
        fs::write(&path, "  \n").unwrap();
        assert!(BufferStore::new(path).read().unwrap().is_empty());
    }

    #[test]
    fn test_persist_then_read_keeps_order() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path().join("buf.json"));
        let records: Vec<_> = (1..=4).map(record).collect();

        store.persist(&records).unwrap();
        assert_eq!(store.read().unwrap(), records);
    }

    #[test]
    fn test_document_is_a_json_array() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path().join("buf.json"));
        store.persist(&[record(7)]).unwrap();

        let raw = fs::read_to_string(store.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.is_array());
        assert_eq!(value[0]["timestamp"], 7);
    }

    #[test]
    fn test_persist_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path().join("nested").join("deeper").join("buf.json"));
        store.persist(&[record(1)]).unwrap();
        assert_eq!(store.read().unwrap().len(), 1);
    }

    #[test]
    fn test_persist_leaves_no_temp_files() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path().join("buf.json"));
        store.persist(&[record(1)]).unwrap();
        store.persist(&[record(1), record(2)]).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_corrupt_read_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buf.json");
        fs::write(&path, "[{\"timestamp\": 1,").unwrap();

        match BufferStore::new(path).read() {
            Err(UplinkError::BufferCorrupt { .. }) => {}
            other => panic!("Expected BufferCorrupt, got: {:?}", other),
        }
    }

    #[test]
    fn test_load_moves_corrupt_file_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("buf.json");
        fs::write(&path, "not json at all").unwrap();

        let store = BufferStore::new(&path);
        assert!(store.load().unwrap().is_empty());
        assert!(!path.exists());

        let moved = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().starts_with("buf.json.corrupt-"));
        assert!(moved);
    }

    #[test]
    fn test_persist_into_file_parent_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();

        let store = BufferStore::new(blocker.join("buf.json"));
        assert!(matches!(
            store.persist(&[record(1)]),
            Err(UplinkError::BufferIo { .. })
        ));
    }

    #[tokio::test]
    async fn test_async_variants_share_the_document() {
        let dir = TempDir::new().unwrap();
        let store = BufferStore::new(dir.path().join("buf.json"));

        assert_eq!(store.append_async(record(1)).await.unwrap(), 1);
        assert_eq!(store.append_async(record(2)).await.unwrap(), 2);
        let loaded = store.load_async().await.unwrap();
        assert_eq!(loaded.iter().map(|r| r.timestamp).collect::<Vec<_>>(), vec![1, 2]);

        store.persist_async(vec![record(3)]).await.unwrap();
        assert_eq!(store.read().unwrap(), vec![record(3)]);
    }

    #[tokio::test]
    async fn test_async_append_into_file_parent_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        fs::write(&blocker, "x").unwrap();

        let store = BufferStore::new(blocker.join("buf.json"));
        assert!(matches!(
            store.append_async(record(1)).await,
            Err(UplinkError::BufferIo { .. })
        ));
    }
}
