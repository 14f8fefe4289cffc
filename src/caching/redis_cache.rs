// Redis Cache Store
// Shared key/value store backed by a deadpool-redis connection pool

use super::{CacheStore, StoreStats};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Redis-backed cache store
pub struct RedisStore {
    /// Store name
    name: String,
    /// Redis connection pool
    pool: deadpool_redis::Pool,
    /// Store configuration
    config: RedisStoreConfig,
}

/// Redis store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Key prefix for namespacing
    pub key_prefix: String,
    /// Retry attempts for failed operations
    pub retry_attempts: u32,
    /// Retry delay in milliseconds
    pub retry_delay: u64,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "storefront:".to_string(),
            retry_attempts: 2,
            retry_delay: 50,
        }
    }
}

impl RedisStore {
    /// Create the pool and verify the server answers `PING`
    pub async fn connect(name: impl Into<String>, config: RedisStoreConfig) -> Result<Self> {
        let name = name.into();
        info!("Connecting to Redis: {}", config.redis_url);

        let pool = deadpool_redis::Config::from_url(&config.redis_url)
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| MonitorError::cache(format!("Failed to create Redis pool: {}", e)))?;

        let store = Self { name, pool, config };
        store.ping().await?;

        info!("Successfully connected to Redis: {}", store.name);
        Ok(store)
    }

    /// Round-trip `PING`
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    /// Get full key with prefix
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| MonitorError::cache(format!("Failed to get connection: {}", e)))
    }

    /// Run a single command with bounded retries
    async fn execute<T: redis::FromRedisValue + Send>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut last_error: Option<MonitorError> = None;

        for attempt in 0..=self.config.retry_attempts {
            let result = match self.connection().await {
                Ok(mut conn) => cmd.query_async::<_, T>(&mut conn).await.map_err(MonitorError::from),
                Err(e) => Err(e),
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt < self.config.retry_attempts {
                        warn!(
                            "Redis operation failed, retrying (attempt {}/{}): {}",
                            attempt + 1,
                            self.config.retry_attempts,
                            e
                        );
                        tokio::time::sleep(Duration::from_millis(self.config.retry_delay)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| MonitorError::cache("All retry attempts failed")))
    }

    /// Fetch and parse one `INFO` section
    async fn info_section(&self, section: &str) -> Result<HashMap<String, String>> {
        let mut cmd = redis::cmd("INFO");
        cmd.arg(section);
        let raw: String = self.execute(&cmd).await?;
        Ok(parse_info(&raw))
    }
}

/// Parse the `key:value` lines of a Redis `INFO` reply
pub fn parse_info(raw: &str) -> HashMap<String, String> {
    raw.lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.trim().split_once(':'))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

/// Sum the `keys=` counters of every `dbN` line in the keyspace section
pub fn keyspace_keys(info: &HashMap<String, String>) -> u64 {
    info.iter()
        .filter(|(key, _)| key.starts_with("db"))
        .filter_map(|(_, value)| {
            value
                .split(',')
                .find_map(|part| part.strip_prefix("keys="))
                .and_then(|n| n.parse::<u64>().ok())
        })
        .sum()
}

fn info_u64(info: &HashMap<String, String>, key: &str) -> u64 {
    info.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let mut cmd = redis::cmd("GET");
        cmd.arg(self.full_key(key));
        let data: Option<Vec<u8>> = self.execute(&cmd).await?;

        match data {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: &Value, ttl: Duration) -> Result<()> {
        let data = serde_json::to_vec(value)?;
        let mut cmd = redis::cmd("SETEX");
        cmd.arg(self.full_key(key)).arg(ttl.as_secs().max(1)).arg(data);
        let _: () = self.execute(&cmd).await?;

        debug!("Set Redis entry: {} (TTL: {:?})", key, ttl);
        Ok(())
    }

    async fn forget(&self, key: &str) -> Result<bool> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(self.full_key(key));
        let deleted: u32 = self.execute(&cmd).await?;
        Ok(deleted > 0)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let stats = self.info_section("stats").await?;
        let memory = self.info_section("memory").await?;
        let keyspace = self.info_section("keyspace").await?;

        Ok(StoreStats {
            hits: info_u64(&stats, "keyspace_hits"),
            misses: info_u64(&stats, "keyspace_misses"),
            keys: keyspace_keys(&keyspace),
            memory_bytes: info_u64(&memory, "used_memory"),
            evictions: info_u64(&stats, "evicted_keys"),
            expired: info_u64(&stats, "expired_keys"),
        })
    }
}
