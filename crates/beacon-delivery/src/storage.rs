//! Durable whole-snapshot persistence of the pending queue.
//!
//! The queue is rewritten in full after every mutation. Depths are small
//! (bounded by offline time times event rate), so an O(n) rewrite keeps the
//! file trivially simple and self-describing. Storage is reached through the
//! `ByteStorage` trait so tests can run without touching the filesystem.

use std::{
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
    pin::Pin,
    sync::Arc,
};

use beacon_core::{EventRecord, QueueSnapshot};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Raw durable byte storage.
pub trait ByteStorage: Send + Sync + std::fmt::Debug {
    /// Reads the whole artifact at `path`, or `None` if it does not exist.
    fn read_all<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>>;

    /// Replaces the artifact at `path` with `bytes`.
    fn write_all<'a>(
        &'a self,
        path: &'a Path,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Local filesystem storage.
///
/// Writes go to a sibling temporary file that is synced and then renamed
/// over the target, so readers see either the old or the new snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileStorage;

impl FileStorage {
    /// Creates a filesystem storage.
    pub fn new() -> Self {
        Self
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

impl ByteStorage for FileStorage {
    fn read_all<'a>(
        &'a self,
        path: &'a Path,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>> {
        Box::pin(async move {
            match tokio::fs::read(path).await {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
                Err(e) => {
                    Err(DeliveryError::persistence_read(path.display().to_string(), e.to_string()))
                },
            }
        })
    }

    fn write_all<'a>(
        &'a self,
        path: &'a Path,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let write_error = |e: std::io::Error| {
                DeliveryError::persistence_write(path.display().to_string(), e.to_string())
            };

            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(write_error)?;
            }

            let tmp = temp_path(path);
            let mut file = tokio::fs::File::create(&tmp).await.map_err(write_error)?;
            file.write_all(&bytes).await.map_err(write_error)?;
            file.sync_all().await.map_err(write_error)?;
            drop(file);

            tokio::fs::rename(&tmp, path).await.map_err(write_error)
        })
    }
}

/// Pending queue persisted as one JSON snapshot at a fixed path.
#[derive(Debug, Clone)]
pub struct PersistentQueueStore {
    storage: Arc<dyn ByteStorage>,
    path: PathBuf,
}

impl PersistentQueueStore {
    /// Creates a store writing to `path` through `storage`.
    pub fn new(storage: Arc<dyn ByteStorage>, path: impl Into<PathBuf>) -> Self {
        Self { storage, path: path.into() }
    }

    /// Location of the snapshot.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overwrites the snapshot with `records`, head first.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::PersistenceWrite` if the write fails, or
    /// `DeliveryError::Encoding` if the snapshot cannot be encoded.
    pub async fn save<'a>(&self, records: impl IntoIterator<Item = &'a EventRecord>) -> Result<()> {
        let snapshot = QueueSnapshot::from_records(records);
        let bytes = snapshot.to_json()?;

        self.storage.write_all(&self.path, bytes).await?;

        debug!(path = %self.path.display(), queued = snapshot.events.len(), "saved event queue");
        Ok(())
    }

    /// Loads the snapshot.
    ///
    /// Never fails: a missing, unreadable, empty or malformed snapshot yields
    /// an empty queue. Individual entries that fail validation are skipped.
    pub async fn load(&self) -> Vec<EventRecord> {
        let bytes = match self.storage.read_all(&self.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                debug!(path = %self.path.display(), "no persisted event queue");
                return Vec::new();
            },
            Err(error) => {
                warn!(error = %error, "starting with empty event queue");
                return Vec::new();
            },
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }

        let snapshot = match QueueSnapshot::from_json(&bytes) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                let error = DeliveryError::corrupt(self.path.display().to_string(), e.to_string());
                warn!(error = %error, "starting with empty event queue");
                return Vec::new();
            },
        };

        let records: Vec<EventRecord> = snapshot
            .events
            .into_iter()
            .filter_map(|wire| match EventRecord::try_from(wire) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "skipping invalid persisted event");
                    None
                },
            })
            .collect();

        debug!(path = %self.path.display(), queued = records.len(), "loaded event queue");
        records
    }
}

pub mod mock {
    //! In-memory byte storage for testing persistence without a filesystem.
    //!
    //! Supports injecting read and write failures and counts writes.

    use std::{
        collections::HashMap,
        future::Future,
        path::{Path, PathBuf},
        pin::Pin,
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use tokio::sync::RwLock;

    use super::ByteStorage;
    use crate::error::{DeliveryError, Result};

    /// In-memory `ByteStorage`.
    #[derive(Debug, Default)]
    pub struct MemoryStorage {
        files: RwLock<HashMap<PathBuf, Vec<u8>>>,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
        writes: AtomicUsize,
    }

    impl MemoryStorage {
        /// Creates an empty storage.
        pub fn new() -> Self {
            Self::default()
        }

        /// Seeds the artifact at `path`.
        pub async fn insert(&self, path: impl Into<PathBuf>, bytes: impl Into<Vec<u8>>) {
            self.files.write().await.insert(path.into(), bytes.into());
        }

        /// Returns the stored artifact at `path`.
        pub async fn contents(&self, path: &Path) -> Option<Vec<u8>> {
            self.files.read().await.get(path).cloned()
        }

        /// Makes subsequent reads fail.
        pub fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::Release);
        }

        /// Makes subsequent writes fail.
        pub fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::Release);
        }

        /// Number of successful writes.
        pub fn write_count(&self) -> usize {
            self.writes.load(Ordering::Acquire)
        }
    }

    impl ByteStorage for MemoryStorage {
        fn read_all<'a>(
            &'a self,
            path: &'a Path,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Vec<u8>>>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail_reads.load(Ordering::Acquire) {
                    return Err(DeliveryError::persistence_read(
                        path.display().to_string(),
                        "injected read failure",
                    ));
                }
                Ok(self.files.read().await.get(path).cloned())
            })
        }

        fn write_all<'a>(
            &'a self,
            path: &'a Path,
            bytes: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                if self.fail_writes.load(Ordering::Acquire) {
                    return Err(DeliveryError::persistence_write(
                        path.display().to_string(),
                        "injected write failure",
                    ));
                }
                self.files.write().await.insert(path.to_path_buf(), bytes);
                self.writes.fetch_add(1, Ordering::AcqRel);
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::EventName;

    use super::{mock::MemoryStorage, *};

    fn record(name: &str, time: f64) -> EventRecord {
        EventRecord::new(EventName::new(name).unwrap(), time).unwrap()
    }

    #[test]
    fn temp_path_is_sibling() {
        assert_eq!(
            temp_path(Path::new("/data/eventQueue.json")),
            PathBuf::from("/data/eventQueue.json.tmp")
        );
    }

    #[tokio::test]
    async fn missing_snapshot_loads_empty() {
        let store = PersistentQueueStore::new(Arc::new(MemoryStorage::new()), "q.json");
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_snapshot_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("q.json", b"{\"events\": [".to_vec()).await;

        let store = PersistentQueueStore::new(storage, "q.json");
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn empty_snapshot_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        storage.insert("q.json", Vec::new()).await;

        let store = PersistentQueueStore::new(storage, "q.json");
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn read_failure_loads_empty() {
        let storage = Arc::new(MemoryStorage::new());
        let snapshot = br#"{"events":[{"event":"a","session_time":1.0}]}"#;
        storage.insert("q.json", snapshot.to_vec()).await;
        storage.fail_reads(true);

        let store = PersistentQueueStore::new(storage, "q.json");
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn invalid_entries_are_skipped() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .insert(
                "q.json",
                br#"{"events":[
                    {"event":"a","session_time":1.0},
                    {"event":"","session_time":2.0},
                    {"event":"c","session_time":-3.0},
                    {"event":"d","session_time":4.0}
                ]}"#
                .to_vec(),
            )
            .await;

        let store = PersistentQueueStore::new(storage, "q.json");
        assert_eq!(store.load().await, vec![record("a", 1.0), record("d", 4.0)]);
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let storage = Arc::new(MemoryStorage::new());
        storage.fail_writes(true);

        let store = PersistentQueueStore::new(storage.clone(), "q.json");
        let result = store.save(&[record("a", 1.0)]).await;

        assert!(matches!(result, Err(DeliveryError::PersistenceWrite { .. })));
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn save_then_load_preserves_order() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PersistentQueueStore::new(storage, "q.json");
        let records = vec![record("first", 0.5), record("second", 1.5), record("third", 9.0)];

        store.save(&records).await.unwrap();

        assert_eq!(store.load().await, records);
    }

    #[tokio::test]
    async fn file_storage_creates_directory_and_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("eventQueue.json");
        let store = PersistentQueueStore::new(Arc::new(FileStorage::new()), &path);

        store.save(&[record("a", 1.0), record("b", 2.0)]).await.unwrap();
        store.save(&[record("b", 2.0)]).await.unwrap();

        assert_eq!(
            std::fs::read(&path).unwrap(),
            br#"{"events":[{"event":"b","session_time":2.0}]}"#
        );
        assert!(!temp_path(&path).exists());
        assert_eq!(store.load().await, vec![record("b", 2.0)]);
    }

    #[tokio::test]
    async fn file_storage_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = FileStorage::new().read_all(&dir.path().join("absent.json")).await.unwrap();
        assert!(bytes.is_none());
    }
}
