//! Persistent tier
//!
//! The cache talks to durable storage only through [`PersistentStore`]. The
//! bundled [`FileStore`] keeps one JSON document per entry, grouped in one
//! directory per partition.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};

use super::entry::CacheEntry;
use super::keys::RESPONSE_PREFIX;
use crate::errors::{PulsechainError, Result};

/// Named partition of the persistent store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    Responses,
    Collections,
}

impl Partition {
    pub const ALL: [Partition; 2] = [Partition::Responses, Partition::Collections];

    pub fn as_str(&self) -> &'static str {
        match self {
            Partition::Responses => "responses",
            Partition::Collections => "collections",
        }
    }

    /// Partition a key is written to
    pub fn for_key(key: &str) -> Self {
        if key.starts_with(RESPONSE_PREFIX) {
            Partition::Responses
        } else {
            Partition::Collections
        }
    }
}

/// Durable key-value storage for cache entries
#[async_trait]
pub trait PersistentStore: Send + Sync {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry<JsonValue>>>;

    async fn put(&self, partition: Partition, key: &str, entry: &CacheEntry<JsonValue>) -> Result<()>;

    async fn delete(&self, partition: Partition, key: &str) -> Result<()>;

    async fn clear(&self, partition: Partition) -> Result<()>;

    async fn count(&self, partition: Partition) -> Result<usize>;

    async fn keys(&self, partition: Partition) -> Result<Vec<String>>;
}

/// On-disk record; the key is stored alongside since file names are hashed
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    key: String,
    #[serde(flatten)]
    entry: CacheEntry<JsonValue>,
}

/// File-backed store: `<root>/<partition>/<sha256(key)>.json`
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn partition_dir(&self, partition: Partition) -> PathBuf {
        self.root.join(partition.as_str())
    }

    fn entry_path(&self, partition: Partition, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.partition_dir(partition)
            .join(format!("{}.json", hex::encode(digest)))
    }

    async fn read_record(path: &Path) -> Result<Option<StoredRecord>> {
        match tokio::fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text).map(Some).map_err(|e| {
                PulsechainError::Cache(format!("unreadable entry {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PulsechainError::Io(e)),
        }
    }

    async fn entry_files(&self, partition: Partition) -> Result<Vec<PathBuf>> {
        let mut dir = match tokio::fs::read_dir(self.partition_dir(partition)).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PulsechainError::Io(e)),
        };

        let mut files = Vec::new();
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        Ok(files)
    }
}

#[async_trait]
impl PersistentStore for FileStore {
    async fn get(&self, partition: Partition, key: &str) -> Result<Option<CacheEntry<JsonValue>>> {
        let record = Self::read_record(&self.entry_path(partition, key)).await?;
        // A hash collision would surface as a different stored key
        Ok(record.filter(|r| r.key == key).map(|r| r.entry))
    }

    async fn put(&self, partition: Partition, key: &str, entry: &CacheEntry<JsonValue>) -> Result<()> {
        tokio::fs::create_dir_all(self.partition_dir(partition)).await?;

        let record = StoredRecord {
            key: key.to_string(),
            entry: entry.clone(),
        };
        let path = self.entry_path(partition, key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&record)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, partition: Partition, key: &str) -> Result<()> {
        match tokio::fs::remove_file(self.entry_path(partition, key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PulsechainError::Io(e)),
        }
    }

    async fn clear(&self, partition: Partition) -> Result<()> {
        match tokio::fs::remove_dir_all(self.partition_dir(partition)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PulsechainError::Io(e)),
        }
    }

    async fn count(&self, partition: Partition) -> Result<usize> {
        Ok(self.entry_files(partition).await?.len())
    }

    async fn keys(&self, partition: Partition) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.entry_files(partition).await? {
            match Self::read_record(&path).await {
                Ok(Some(record)) => keys.push(record.key),
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), "Skipping unreadable cache file: {}", e);
                }
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_partition_for_key() {
        assert_eq!(Partition::for_key("response:GET:http://x:"), Partition::Responses);
        assert_eq!(Partition::for_key("collection:42"), Partition::Collections);
    }

    #[tokio::test]
    async fn test_file_store_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let entry = CacheEntry::new(json!({"status": 200}), Duration::from_secs(60));

        store.put(Partition::Responses, "response:GET:http://x:", &entry).await.unwrap();
        let loaded = store.get(Partition::Responses, "response:GET:http://x:").await.unwrap();
        assert_eq!(loaded, Some(entry));
        assert_eq!(store.count(Partition::Responses).await.unwrap(), 1);
        assert_eq!(store.keys(Partition::Responses).await.unwrap(), vec!["response:GET:http://x:".to_string()]);

        store.delete(Partition::Responses, "response:GET:http://x:").await.unwrap();
        assert!(store.get(Partition::Responses, "response:GET:http://x:").await.unwrap().is_none());
        // Deleting twice is fine
        store.delete(Partition::Responses, "response:GET:http://x:").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_missing_partition() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("never-created"));
        assert_eq!(store.count(Partition::Collections).await.unwrap(), 0);
        assert!(store.keys(Partition::Collections).await.unwrap().is_empty());
        store.clear(Partition::Collections).await.unwrap();
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_cache_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        let key = "collection:broken";
        std::fs::create_dir_all(store.partition_dir(Partition::Collections)).unwrap();
        std::fs::write(store.entry_path(Partition::Collections, key), "{not json").unwrap();

        let err = store.get(Partition::Collections, key).await.unwrap_err();
        assert!(matches!(err, PulsechainError::Cache(ref m) if m.contains("unreadable entry")), "{:?}", err);
        // Listing skips the file instead of failing
        assert!(store.keys(Partition::Collections).await.unwrap().is_empty());
    }
}
