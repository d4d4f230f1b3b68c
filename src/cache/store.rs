//! Cache storage implementations.
//!
//! The engine only needs get/set/delete with overwrite semantics; expiry and
//! atomicity are properties of the concrete store.

use std::sync::RwLock;

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use thiserror::Error;

use super::config::CacheConfig;
use super::keys::CacheKey;
use super::lock::{rw_read, rw_write};

const SOURCE: &str = "cache::store";

#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache backend error: {0}")]
    Backend(String),
}

impl CacheStoreError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Process-wide key/value store for rendered HTML.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError>;

    async fn set(&self, key: &CacheKey, html: &str) -> Result<(), CacheStoreError>;

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError>;
}

/// In-memory LRU store.
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<CacheKey, String>>,
}

impl MemoryCacheStore {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(config.memory_limit_non_zero())),
        }
    }

    pub fn len(&self) -> usize {
        rw_read(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the stored keys, most recently used first.
    pub fn keys(&self) -> Vec<CacheKey> {
        rw_read(&self.entries, SOURCE, "keys")
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheStoreError> {
        Ok(rw_write(&self.entries, SOURCE, "get").get(key).cloned())
    }

    async fn set(&self, key: &CacheKey, html: &str) -> Result<(), CacheStoreError> {
        let evicted = rw_write(&self.entries, SOURCE, "set").push(key.clone(), html.to_string());
        if let Some((evicted_key, _)) = evicted
            && evicted_key != *key
        {
            counter!("content_blocks_cache_evict_total").increment(1);
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<(), CacheStoreError> {
        rw_write(&self.entries, SOURCE, "delete").pop(key);
        Ok(())
    }
}
