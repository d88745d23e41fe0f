use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as Age, Utc};
use locktree::storage::CACHE_KEY;
use locktree::{DecryptionCache, JsonFileStore, KeyValueStore};

const WEEK: Duration = Duration::from_secs(60 * 60 * 24 * 7);

#[tokio::test]
async fn test_stale_entries_are_swept_fresh_ones_survive() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path().join("state.json")).await.unwrap());
    let cache = DecryptionCache::new(store.clone(), WEEK);
    let now = Utc::now();

    // 1. One entry untouched for eight days, one used an hour ago.
    cache.set_at("_old", "stale", now - Age::days(8)).await.unwrap();
    cache.set_at("_new", "fresh", now - Age::hours(1)).await.unwrap();

    // 2. Reads never expire anything.
    assert_eq!(cache.len().await.unwrap(), 2);

    // 3. A sweep drops only the stale one.
    assert_eq!(cache.sweep_at(now).await.unwrap(), 1);
    assert_eq!(cache.get_at("_new", now).await.unwrap().as_deref(), Some("fresh"));
    assert_eq!(cache.get_at("_old", now).await.unwrap(), None);
}

#[tokio::test]
async fn test_cache_survives_reopen_in_wire_format() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
        let cache = DecryptionCache::new(store, WEEK);
        cache.set("_cipher", "plain").await.unwrap();
    }

    // 1. A new process sees the same entry.
    let store = Arc::new(JsonFileStore::open(&path).await.unwrap());
    let cache = DecryptionCache::new(store.clone(), WEEK);
    assert_eq!(cache.get("_cipher").await.unwrap().as_deref(), Some("plain"));

    // 2. The persisted shape is {key: {"val", "lastAccessed"}}.
    let raw = store.get(CACHE_KEY).await.unwrap().unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(parsed["_cipher"]["val"], "plain");
    assert!(parsed["_cipher"]["lastAccessed"].is_i64());
}

#[tokio::test]
async fn test_full_clear_empties_cache() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(JsonFileStore::open(dir.path().join("state.json")).await.unwrap());
    let cache = DecryptionCache::new(store, WEEK);

    cache.set("_a", "1").await.unwrap();
    cache.set("_b", "2").await.unwrap();

    assert_eq!(cache.clear(true).await.unwrap(), 0);
    assert_eq!(cache.clear(false).await.unwrap(), 2);
    assert!(cache.is_empty().await.unwrap());
}
