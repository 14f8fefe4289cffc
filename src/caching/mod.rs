// Cache Collaborator for the Monitoring Core
// Key/value store with TTL used for snapshot mirroring, rule persistence and live probes

use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub mod memory_cache;
pub mod redis_cache;

#[cfg(test)]
mod tests;

pub use memory_cache::MemoryStore;
pub use redis_cache::{RedisStore, RedisStoreConfig};

/// Key/value store with per-entry TTL.
///
/// Values are JSON trees so that metric bundles and alert rules round-trip
/// unchanged through any backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Backend name, used as the tier key in cache metrics
    fn name(&self) -> &str;

    /// Fetch a live (non-expired) value
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    /// Store a value for `ttl`
    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()>;

    /// Remove a value, returning whether it existed
    async fn forget(&self, key: &str) -> Result<bool>;

    /// Backend counters
    async fn stats(&self) -> Result<StoreStats>;
}

/// Counters reported by a cache backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Successful lookups
    pub hits: u64,
    /// Lookups that found nothing
    pub misses: u64,
    /// Entries currently held
    pub keys: u64,
    /// Memory used by the backend in bytes
    pub memory_bytes: u64,
    /// Entries removed to make room
    pub evictions: u64,
    /// Entries removed because their TTL lapsed
    pub expired: u64,
}

impl StoreStats {
    /// Hit ratio as a percentage, `0.0` when nothing was looked up yet
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64 * 10_000.0).round() / 100.0
        }
    }
}
