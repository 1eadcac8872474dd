//! Two-tier response cache
//!
//! A size-bounded memory tier in front of an optional [`PersistentStore`].
//! Caching is best-effort: storage failures are logged and swallowed, and never
//! reach the caller.
//!
//! The cache is an explicit service object. Create one per process, wrap it in
//! an `Arc`, and hand it to whatever needs it.

pub mod entry;
pub mod keys;
pub mod memory;
pub mod store;

pub use entry::{now_millis, CacheEntry};
pub use keys::{collection_key, key_for, request_key};
pub use memory::EvictionPolicy;
pub use store::{FileStore, Partition, PersistentStore};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::task::JoinHandle;

use memory::{Lookup, MemoryTier};

/// 50 MiB memory tier
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 50 * 1024 * 1024;

/// Housekeeping interval
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// TTL used when the caller does not give one
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Cache tuning
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub max_memory_bytes: usize,
    pub cleanup_interval: Duration,
    pub eviction: EvictionPolicy,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_memory_bytes: DEFAULT_MAX_MEMORY_BYTES,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            eviction: EvictionPolicy::default(),
        }
    }
}

/// Snapshot of cache counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub memory_entries: usize,
    pub persistent_entries: usize,
    /// Estimated bytes held in memory
    pub memory_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, 0 when nothing was looked up
    pub hit_rate: f64,
}

/// What one housekeeping pass removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub expired: usize,
    pub evicted: usize,
}

pub struct ResponseCache {
    memory: Mutex<MemoryTier>,
    store: Option<Arc<dyn PersistentStore>>,
    settings: CacheSettings,
    hits: AtomicU64,
    misses: AtomicU64,
    last_cleanup: Mutex<Instant>,
}

impl ResponseCache {
    /// Cache backed by the given persistent store
    pub fn new(settings: CacheSettings, store: Arc<dyn PersistentStore>) -> Self {
        Self::build(settings, Some(store))
    }

    /// Cache without a persistent tier
    pub fn memory_only(settings: CacheSettings) -> Self {
        Self::build(settings, None)
    }

    fn build(settings: CacheSettings, store: Option<Arc<dyn PersistentStore>>) -> Self {
        Self {
            memory: Mutex::new(MemoryTier::new(settings.max_memory_bytes, settings.eviction)),
            store,
            settings,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            last_cleanup: Mutex::new(Instant::now()),
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn has_persistent_tier(&self) -> bool {
        self.store.is_some()
    }

    fn memory(&self) -> MutexGuard<'_, MemoryTier> {
        // A panic while holding the lock leaves the map usable; keep going
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a key, memory first, then the persistent tier.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.cleanup_if_needed();
        let now = now_millis();

        let lookup = self.memory().get(key, now);
        match lookup {
            Lookup::Hit(value) => return self.decode_hit(key, value),
            Lookup::Expired => {
                tracing::debug!(key, "Cache entry expired in memory");
                self.delete_persistent(key).await;
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Lookup::Missing => {}
        }

        if let Some(store) = &self.store {
            let partition = Partition::for_key(key);
            match store.get(partition, key).await {
                Ok(Some(entry)) if entry.is_valid_at(now) => {
                    let value = entry.data.clone();
                    let promoted = self.memory().promote(key, entry);
                    tracing::debug!(key, promoted, "Cache hit in persistent tier");
                    return self.decode_hit(key, value);
                }
                Ok(Some(_)) => {
                    tracing::debug!(key, "Cache entry expired in persistent tier");
                    if let Err(e) = store.delete(partition, key).await {
                        tracing::warn!(key, "Failed to delete expired cache entry: {}", e);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(key, "Persistent cache read failed: {}", e);
                }
            }
        }

        tracing::debug!(key, "Cache miss");
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    fn decode_hit<T: DeserializeOwned>(&self, key: &str, value: JsonValue) -> Option<T> {
        match serde_json::from_value(value) {
            Ok(data) => {
                tracing::debug!(key, "Cache hit");
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(data)
            }
            Err(e) => {
                tracing::warn!(key, "Cached value has an unexpected shape: {}", e);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Store a value under `key` for `ttl`.
    pub async fn set<T: Serialize>(&self, key: &str, data: &T, ttl: Duration) {
        self.cleanup_if_needed();

        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key, "Value is not cacheable: {}", e);
                return;
            }
        };
        let entry = CacheEntry::new(value, ttl);

        let in_memory = self.memory().insert(key, entry.clone());
        if !in_memory {
            tracing::debug!(key, "Entry larger than the memory tier, persisting only");
        }

        if let Some(store) = &self.store {
            if let Err(e) = store.put(Partition::for_key(key), key, &entry).await {
                tracing::warn!(key, "Persistent cache write failed: {}", e);
            }
        }
    }

    /// Remove one key from both tiers
    pub async fn delete(&self, key: &str) {
        self.memory().remove(key);
        self.delete_persistent(key).await;
    }

    async fn delete_persistent(&self, key: &str) {
        if let Some(store) = &self.store {
            for partition in Partition::ALL {
                if let Err(e) = store.delete(partition, key).await {
                    tracing::warn!(key, partition = partition.as_str(), "Persistent cache delete failed: {}", e);
                }
            }
        }
    }

    /// Remove every key matching `pattern` from both tiers.
    ///
    /// The pattern is a regular expression; if it does not compile it is matched
    /// as a literal substring. Returns the number of keys removed.
    pub async fn invalidate(&self, pattern: &str) -> usize {
        let regex = Regex::new(pattern)
            .or_else(|_| Regex::new(&regex::escape(pattern)));
        let matches = |key: &str| match &regex {
            Ok(re) => re.is_match(key),
            Err(_) => key.contains(pattern),
        };

        let mut removed = 0;
        {
            let mut memory = self.memory();
            for key in memory.keys() {
                if matches(&key) && memory.remove(&key) {
                    removed += 1;
                }
            }
        }

        if let Some(store) = &self.store {
            for partition in Partition::ALL {
                let keys = match store.keys(partition).await {
                    Ok(keys) => keys,
                    Err(e) => {
                        tracing::warn!(partition = partition.as_str(), "Persistent cache scan failed: {}", e);
                        continue;
                    }
                };
                for key in keys.into_iter().filter(|k| matches(k)) {
                    match store.delete(partition, &key).await {
                        Ok(()) => removed += 1,
                        Err(e) => tracing::warn!(key, "Persistent cache delete failed: {}", e),
                    }
                }
            }
        }

        tracing::debug!(pattern, removed, "Cache invalidated");
        removed
    }

    /// Empty both tiers. Counters are kept; see [`reset_stats`](Self::reset_stats).
    pub async fn clear(&self) {
        self.memory().clear();
        if let Some(store) = &self.store {
            for partition in Partition::ALL {
                if let Err(e) = store.clear(partition).await {
                    tracing::warn!(partition = partition.as_str(), "Persistent cache clear failed: {}", e);
                }
            }
        }
    }

    pub async fn stats(&self) -> CacheStats {
        let (memory_entries, memory_bytes) = {
            let memory = self.memory();
            (memory.len(), memory.size())
        };

        let mut persistent_entries = 0;
        if let Some(store) = &self.store {
            for partition in Partition::ALL {
                match store.count(partition).await {
                    Ok(n) => persistent_entries += n,
                    Err(e) => tracing::warn!(partition = partition.as_str(), "Persistent cache count failed: {}", e),
                }
            }
        }

        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 { hits as f64 / total as f64 } else { 0.0 };

        CacheStats {
            total_entries: memory_entries + persistent_entries,
            memory_entries,
            persistent_entries,
            memory_bytes,
            hits,
            misses,
            hit_rate,
        }
    }

    pub fn reset_stats(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
    }

    /// Purge expired memory entries, then evict the oldest fifth if the tier
    /// is still over its cap.
    pub fn run_housekeeping(&self) -> HousekeepingReport {
        let mut memory = self.memory();
        let expired = memory.purge_expired(now_millis());
        let evicted = if memory.is_over_cap() { memory.evict_oldest() } else { 0 };

        if expired > 0 || evicted > 0 {
            tracing::debug!(expired, evicted, "Cache housekeeping");
        }
        HousekeepingReport { expired, evicted }
    }

    fn cleanup_if_needed(&self) {
        {
            let mut last = self
                .last_cleanup
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if last.elapsed() < self.settings.cleanup_interval {
                return;
            }
            *last = Instant::now();
        }
        self.run_housekeeping();
    }

    /// Run housekeeping on a background interval until the cache is dropped.
    pub fn spawn_housekeeping(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.settings.cleanup_interval.max(Duration::from_millis(1));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.run_housekeeping();
                    }
                    None => break,
                }
            }
        })
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("settings", &self.settings)
            .field("persistent", &self.store.is_some())
            .finish_non_exhaustive()
    }
}
