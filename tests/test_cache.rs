//! Two-tier cache with the file-backed persistent store

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use pulsechain::cache::{
    collection_key, key_for, CacheEntry, CacheSettings, FileStore, Partition, PersistentStore, ResponseCache,
};
use pulsechain::client::RequestExecutor;
use pulsechain::errors::{PulsechainError, Result};
use pulsechain::http::{HttpRequest, HttpResponse};

fn cache_in(dir: &std::path::Path) -> ResponseCache {
    ResponseCache::new(CacheSettings::default(), Arc::new(FileStore::new(dir)))
}

#[tokio::test]
async fn test_entries_survive_a_new_cache_instance() {
    let dir = tempfile::tempdir().unwrap();
    let key = key_for(&HttpRequest::get("https://api.example.com/users"));

    {
        let cache = cache_in(dir.path());
        cache.set(&key, &HttpResponse::new(200, "[1,2]"), Duration::from_secs(60)).await;
    }

    let cache = cache_in(dir.path());
    let cached: HttpResponse = cache.get(&key).await.unwrap();
    assert_eq!(cached.body, "[1,2]");

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    // Promoted into memory on the tier-2 hit
    assert_eq!(stats.memory_entries, 1);
    assert_eq!(stats.persistent_entries, 1);
}

#[tokio::test]
async fn test_keys_land_in_their_partitions() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    let cache = ResponseCache::new(CacheSettings::default(), store.clone());

    cache
        .set(&key_for(&HttpRequest::get("https://a.test/")), &json!("r"), Duration::from_secs(60))
        .await;
    cache
        .set(&collection_key("c1"), &json!({"name": "c1"}), Duration::from_secs(60))
        .await;

    assert_eq!(store.count(Partition::Responses).await.unwrap(), 1);
    assert_eq!(store.count(Partition::Collections).await.unwrap(), 1);
}

#[tokio::test]
async fn test_expired_entries_are_removed_from_both_tiers() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileStore::new(dir.path()));
    let cache = ResponseCache::new(CacheSettings::default(), store.clone());
    let key = key_for(&HttpRequest::get("https://a.test/short"));

    cache.set(&key, &json!(1), Duration::from_millis(20)).await;
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(cache.get::<serde_json::Value>(&key).await, None);
    assert_eq!(store.count(Partition::Responses).await.unwrap(), 0);
    assert_eq!(cache.stats().await.misses, 1);
}

#[tokio::test]
async fn test_invalidate_and_clear_reach_the_store() {
    let dir = tempfile::tempdir().unwrap();
    let key_a = key_for(&HttpRequest::get("https://a.test/users/1"));
    let key_b = key_for(&HttpRequest::get("https://b.test/users/1"));

    {
        let cache = cache_in(dir.path());
        cache.set(&key_a, &json!("a"), Duration::from_secs(60)).await;
        cache.set(&key_b, &json!("b"), Duration::from_secs(60)).await;
    }

    // Fresh instance: only the persistent tier holds the keys
    let cache = cache_in(dir.path());
    assert_eq!(cache.invalidate(r"a\.test").await, 1);
    assert_eq!(cache.get::<String>(&key_a).await, None);
    assert_eq!(cache.get::<String>(&key_b).await.as_deref(), Some("b"));

    cache.clear().await;
    assert_eq!(cache.stats().await.total_entries, 0);
}

/// Persistent tier that rejects every call
struct BrokenDisk;

fn disk_error<T>() -> Result<T> {
    Err(PulsechainError::Cache("disk unavailable".into()))
}

#[async_trait]
impl PersistentStore for BrokenDisk {
    async fn get(&self, _: Partition, _: &str) -> Result<Option<CacheEntry<serde_json::Value>>> {
        disk_error()
    }

    async fn put(&self, _: Partition, _: &str, _: &CacheEntry<serde_json::Value>) -> Result<()> {
        disk_error()
    }

    async fn delete(&self, _: Partition, _: &str) -> Result<()> {
        disk_error()
    }

    async fn clear(&self, _: Partition) -> Result<()> {
        disk_error()
    }

    async fn count(&self, _: Partition) -> Result<usize> {
        disk_error()
    }

    async fn keys(&self, _: Partition) -> Result<Vec<String>> {
        disk_error()
    }
}

#[tokio::test]
async fn test_store_failures_never_fail_a_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let cache = Arc::new(ResponseCache::new(CacheSettings::default(), Arc::new(BrokenDisk)));
    let executor = RequestExecutor::with_reqwest().unwrap().with_cache(cache.clone());
    let request = HttpRequest::get(format!("{}/users", server.uri()));

    let first = executor.execute_request(&request, true, None).await.unwrap();
    assert_eq!(first.body, "[]");
    // The memory tier still serves the repeat
    let second = executor.execute_request(&request, true, None).await.unwrap();
    assert_eq!(second, first);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.persistent_entries, 0);
}

#[tokio::test]
async fn test_corrupt_file_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let key = collection_key("c1");
    {
        let cache = cache_in(dir.path());
        cache.set(&key, &json!({"name": "c1"}), Duration::from_secs(60)).await;
    }
    for partition in std::fs::read_dir(dir.path()).unwrap() {
        for file in std::fs::read_dir(partition.unwrap().path()).unwrap() {
            std::fs::write(file.unwrap().path(), "garbage").unwrap();
        }
    }

    let cache = cache_in(dir.path());
    assert_eq!(cache.get::<serde_json::Value>(&key).await, None);
    assert_eq!(cache.stats().await.misses, 1);
}
