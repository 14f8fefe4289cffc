// In-Memory Cache Store
// Process-local key/value store with TTL expiry and FIFO eviction

use super::{CacheStore, StoreStats};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// In-process cache store
pub struct MemoryStore {
    /// Store name
    name: String,
    /// Entry storage
    storage: Arc<RwLock<StoreStorage>>,
    /// Maximum number of entries
    max_entries: usize,
}

#[derive(Debug, Default)]
struct StoreStorage {
    entries: HashMap<String, StoredValue>,
    /// Insertion order for FIFO eviction
    insertion_order: VecDeque<String>,
    memory_usage: usize,
    stats: StoreStats,
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: Value,
    expires_at: Instant,
    size: usize,
}

impl StoreStorage {
    fn remove_entry(&mut self, key: &str) -> Option<StoredValue> {
        let removed = self.entries.remove(key)?;
        self.memory_usage = self.memory_usage.saturating_sub(removed.size);
        if let Some(pos) = self.insertion_order.iter().position(|k| k == key) {
            self.insertion_order.remove(pos);
        }
        Some(removed)
    }

    fn purge_expired(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, stored)| stored.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            if self.remove_entry(&key).is_some() {
                self.stats.expired += 1;
            }
        }
    }
}

impl MemoryStore {
    /// Create a new memory store
    pub fn new(name: impl Into<String>, max_entries: usize) -> Self {
        Self {
            name: name.into(),
            storage: Arc::new(RwLock::new(StoreStorage::default())),
            max_entries: max_entries.max(1),
        }
    }

    /// Create with default capacity
    pub fn with_defaults() -> Self {
        Self::new("memory", 10_000)
    }

    /// Number of live entries
    pub async fn len(&self) -> usize {
        let mut storage = self.storage.write().await;
        storage.purge_expired(Instant::now());
        storage.entries.len()
    }

    /// Whether the store holds no live entries
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let now = Instant::now();
        let mut storage = self.storage.write().await;

        let lookup = storage
            .entries
            .get(key)
            .map(|stored| (stored.expires_at > now, stored.value.clone()));

        match lookup {
            Some((true, value)) => {
                storage.stats.hits += 1;
                Ok(Some(value))
            }
            Some((false, _)) => {
                storage.remove_entry(key);
                storage.stats.expired += 1;
                storage.stats.misses += 1;
                Ok(None)
            }
            None => {
                storage.stats.misses += 1;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let size = serde_json::to_vec(value)?.len();
        let mut storage = self.storage.write().await;

        storage.remove_entry(key);
        storage.purge_expired(Instant::now());

        while storage.entries.len() >= self.max_entries {
            let Some(oldest) = storage.insertion_order.front().cloned() else {
                break;
            };
            storage.remove_entry(&oldest);
            storage.stats.evictions += 1;
            debug!("Evicted {} from memory store {}", oldest, self.name);
        }

        storage.entries.insert(
            key.to_string(),
            StoredValue {
                value: value.clone(),
                expires_at: Instant::now() + ttl,
                size,
            },
        );
        storage.insertion_order.push_back(key.to_string());
        storage.memory_usage += size;

        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let mut storage = self.storage.write().await;
        Ok(storage.remove_entry(key).is_some())
    }

    async fn stats(&self) -> Result<StoreStats> {
        let mut storage = self.storage.write().await;
        storage.purge_expired(Instant::now());

        let mut stats = storage.stats.clone();
        stats.keys = storage.entries.len() as u64;
        stats.memory_bytes = storage.memory_usage as u64;
        Ok(stats)
    }
}
