// Cache Metrics Collector
// Per-tier hit ratio, memory and eviction counters plus a live set/get/delete benchmark

use super::section;
use crate::caching::CacheStore;
use crate::database::round2;
use crate::monitoring::{MetricBundle, MetricsCollector};
use crate::utils::error::{MonitorError, Result};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Collector over every configured cache tier
pub struct CacheCollector {
    stores: Vec<Arc<dyn CacheStore>>,
    iterations: u32,
    payload_bytes: usize,
    benchmark_timeout: Duration,
}

impl CacheCollector {
    pub fn new(stores: Vec<Arc<dyn CacheStore>>) -> Self {
        Self {
            stores,
            iterations: 10,
            payload_bytes: 1024,
            benchmark_timeout: Duration::from_secs(2),
        }
    }

    pub fn with_benchmark(mut self, iterations: u32, payload_bytes: usize) -> Self {
        self.iterations = iterations;
        self.payload_bytes = payload_bytes;
        self
    }

    pub fn with_benchmark_timeout(mut self, timeout: Duration) -> Self {
        self.benchmark_timeout = timeout;
        self
    }

    async fn tier(&self, store: &Arc<dyn CacheStore>) -> Value {
        let stats = store.stats().await.map(|stats| {
            json!({
                "hits": stats.hits,
                "misses": stats.misses,
                "hit_ratio": stats.hit_ratio(),
                "keys": stats.keys,
                "memory_bytes": stats.memory_bytes,
                "evictions": stats.evictions,
                "expired": stats.expired,
            })
        });
        let mut tier = section("cache", store.name(), stats, json!({"hit_ratio": 0.0}));

        if self.iterations > 0 {
            let benchmark = match tokio::time::timeout(
                self.benchmark_timeout,
                benchmark(store.as_ref(), self.iterations, self.payload_bytes),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(MonitorError::timeout(
                    format!("cache benchmark {}", store.name()),
                    self.benchmark_timeout.as_millis() as u64,
                )),
            };
            tier["benchmark"] = section("cache", "benchmark", benchmark, json!({"iterations": 0}));
        }

        tier
    }
}

#[async_trait::async_trait]
impl MetricsCollector for CacheCollector {
    fn name(&self) -> &str {
        "cache"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        let mut tiers = Map::new();
        for store in &self.stores {
            tiers.insert(store.name().to_string(), self.tier(store).await);
        }

        let mut bundle = Map::new();
        bundle.insert("tier_count".to_string(), json!(tiers.len()));
        bundle.insert("tiers".to_string(), Value::Object(tiers));
        Ok(bundle)
    }
}

/// Average per-operation latency over `iterations` set/get/delete rounds
/// with a fixed-size payload
pub async fn benchmark(store: &dyn CacheStore, iterations: u32, payload_bytes: usize) -> Result<Value> {
    let payload = json!("x".repeat(payload_bytes));
    let prefix = format!("cache_benchmark:{}", uuid::Uuid::new_v4());
    let ttl = Duration::from_secs(60);

    let mut set_time = Duration::ZERO;
    let mut get_time = Duration::ZERO;
    let mut delete_time = Duration::ZERO;
    let mut misses = 0u32;

    let started = Instant::now();
    for i in 0..iterations {
        let key = format!("{}:{}", prefix, i);

        let op = Instant::now();
        store.put(&key, &payload, ttl).await?;
        set_time += op.elapsed();

        let op = Instant::now();
        if store.get(&key).await?.as_ref() != Some(&payload) {
            misses += 1;
        }
        get_time += op.elapsed();

        let op = Instant::now();
        store.forget(&key).await?;
        delete_time += op.elapsed();
    }
    let total = started.elapsed();

    let avg_ms = |d: Duration| round2(d.as_secs_f64() * 1000.0 / f64::from(iterations.max(1)));
    let ops = f64::from(iterations) * 3.0;
    let ops_per_second = if total.as_secs_f64() > 0.0 {
        round2(ops / total.as_secs_f64())
    } else {
        0.0
    };

    Ok(json!({
        "iterations": iterations,
        "payload_bytes": payload_bytes,
        "set_avg_ms": avg_ms(set_time),
        "get_avg_ms": avg_ms(get_time),
        "delete_avg_ms": avg_ms(delete_time),
        "total_ms": round2(total.as_secs_f64() * 1000.0),
        "ops_per_second": ops_per_second,
        "read_misses": misses,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::{MemoryStore, StoreStats};
    use async_trait::async_trait;

    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        fn name(&self) -> &str {
            "redis"
        }

        async fn get(&self, _key: &str) -> Result<Option<Value>> {
            Err(MonitorError::cache("connection refused"))
        }

        async fn put(&self, _key: &str, _value: &Value, _ttl: Duration) -> Result<()> {
            Err(MonitorError::cache("connection refused"))
        }

        async fn forget(&self, _key: &str) -> Result<bool> {
            Err(MonitorError::cache("connection refused"))
        }

        async fn stats(&self) -> Result<StoreStats> {
            Err(MonitorError::cache("connection refused"))
        }
    }

    #[tokio::test]
    async fn test_benchmark_cleans_up_after_itself() {
        let store = MemoryStore::with_defaults();
        let result = benchmark(&store, 5, 256).await.unwrap();

        assert_eq!(result["iterations"], 5);
        assert_eq!(result["read_misses"], 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failing_tier_does_not_hide_healthy_one() {
        let stores: Vec<Arc<dyn CacheStore>> =
            vec![Arc::new(MemoryStore::with_defaults()), Arc::new(DownStore)];
        let bundle = CacheCollector::new(stores)
            .with_benchmark(3, 64)
            .collect()
            .await
            .unwrap();

        assert_eq!(bundle["tier_count"], 2);
        assert!(bundle["tiers"]["memory"].get("error").is_none());
        assert_eq!(bundle["tiers"]["memory"]["benchmark"]["iterations"], 3);
        assert!(bundle["tiers"]["redis"]["error"].is_string());
        assert!(bundle["tiers"]["redis"]["benchmark"]["error"].is_string());
    }
}
