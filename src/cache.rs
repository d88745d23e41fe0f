//! Persisted ciphertext → plaintext cache.
//!
//! PBKDF2 at 250k iterations makes every decryption expensive, so each
//! envelope is decrypted at most once per retention window. Keys are the full
//! marker-prefixed ciphertext strings. Reads refresh `lastAccessed`; expiry
//! only happens in [`DecryptionCache::sweep_at`], never on read.
//!
//! A hit does not rewrite the persisted map. Access times are held in memory
//! and written back with the next `set`, sweep, or explicit
//! [`flush`](DecryptionCache::flush), so loading a tree costs one write per
//! newly decrypted field rather than one per field displayed. Touches that
//! were never flushed are lost with the process; at worst such an entry is
//! swept one retention window after its last persisted access.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::LockResult;
use crate::storage::{KeyValueStore, CACHE_KEY};

/// One cached decryption.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    #[serde(rename = "val")]
    pub value: String,
    #[serde(rename = "lastAccessed", with = "chrono::serde::ts_milliseconds")]
    pub last_accessed: DateTime<Utc>,
}

type CacheMap = HashMap<String, CacheEntry>;

/// Access times not yet written back, by cache key.
type Touches = HashMap<String, DateTime<Utc>>;

/// Cheap to clone; clones share the backing store and the pending touches.
#[derive(Clone)]
pub struct DecryptionCache {
    store: Arc<dyn KeyValueStore>,
    retention: Duration,
    // Doubles as the write lock for the persisted map.
    touches: Arc<Mutex<Touches>>,
}

impl DecryptionCache {
    pub fn new(store: Arc<dyn KeyValueStore>, retention: Duration) -> Self {
        Self {
            store,
            retention,
            touches: Arc::new(Mutex::new(Touches::new())),
        }
    }

    async fn load(&self) -> LockResult<CacheMap> {
        let Some(raw) = self.store.get(CACHE_KEY).await? else {
            return Ok(CacheMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(error = %e, "discarding unreadable decryption cache");
                Ok(CacheMap::new())
            }
        }
    }

    async fn save(&self, map: &CacheMap) -> LockResult<()> {
        self.store.set(CACHE_KEY, serde_json::to_string(map)?).await
    }

    /// Fold pending touches into `map`. Returns whether any entry changed.
    fn apply_touches(map: &mut CacheMap, touches: &mut Touches) -> bool {
        let mut changed = false;
        for (key, at) in touches.drain() {
            if let Some(entry) = map.get_mut(&key) {
                if at > entry.last_accessed {
                    entry.last_accessed = at;
                    changed = true;
                }
            }
        }
        changed
    }

    /// Look up a ciphertext, refreshing its access time on a hit.
    pub async fn get(&self, key: &str) -> LockResult<Option<String>> {
        self.get_at(key, Utc::now()).await
    }

    /// The refreshed access time is recorded in memory only.
    pub async fn get_at(&self, key: &str, now: DateTime<Utc>) -> LockResult<Option<String>> {
        let mut touches = self.touches.lock().await;
        let map = self.load().await?;
        let Some(entry) = map.get(key) else {
            return Ok(None);
        };
        let touched = touches.entry(key.to_string()).or_insert(now);
        if now > *touched {
            *touched = now;
        }
        Ok(Some(entry.value.clone()))
    }

    /// Write pending access times back to the store.
    pub async fn flush(&self) -> LockResult<usize> {
        let mut touches = self.touches.lock().await;
        let pending = touches.len();
        if pending == 0 {
            return Ok(0);
        }
        let mut map = self.load().await?;
        if Self::apply_touches(&mut map, &mut touches) {
            self.save(&map).await?;
        }
        debug!(pending, "decryption cache access times flushed");
        Ok(pending)
    }

    pub async fn set(&self, key: &str, value: &str) -> LockResult<()> {
        self.set_at(key, value, Utc::now()).await
    }

    pub async fn set_at(&self, key: &str, value: &str, at: DateTime<Utc>) -> LockResult<()> {
        let mut touches = self.touches.lock().await;
        let mut map = self.load().await?;
        Self::apply_touches(&mut map, &mut touches);
        map.insert(
            key.to_string(),
            CacheEntry {
                value: value.to_string(),
                last_accessed: at,
            },
        );
        self.save(&map).await
    }

    /// `light` purges expired entries; otherwise the whole cache is dropped.
    /// Returns the number of entries removed.
    pub async fn clear(&self, light: bool) -> LockResult<usize> {
        if light {
            return self.sweep_at(Utc::now()).await;
        }
        let mut touches = self.touches.lock().await;
        touches.clear();
        let removed = self.load().await?.len();
        self.store.remove(CACHE_KEY).await?;
        debug!(removed, "decryption cache cleared");
        Ok(removed)
    }

    /// Remove every entry last accessed more than the retention window
    /// before `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> LockResult<usize> {
        let mut touches = self.touches.lock().await;
        let mut map = self.load().await?;
        let touched = Self::apply_touches(&mut map, &mut touches);
        let before = map.len();
        let retention = self.retention;
        map.retain(|_, entry| match (now - entry.last_accessed).to_std() {
            Ok(age) => age <= retention,
            // accessed "in the future" (clock skew): keep
            Err(_) => true,
        });
        let removed = before - map.len();
        if removed > 0 || touched {
            self.save(&map).await?;
        }
        debug!(removed, kept = map.len(), "decryption cache swept");
        Ok(removed)
    }

    pub async fn len(&self) -> LockResult<usize> {
        Ok(self.load().await?.len())
    }

    pub async fn is_empty(&self) -> LockResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Run a light clear every `interval` until the handle is aborted.
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.clear(true).await {
                    warn!(error = %e, "cache sweep failed");
                }
            }
        })
    }
}
