// Cache Store Tests
// In-process store semantics and Redis INFO parsing

use super::redis_cache::{keyspace_keys, parse_info};
use super::{CacheStore, MemoryStore, StoreStats};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_memory_store_round_trip() {
    let store = MemoryStore::with_defaults();
    let value = json!({"x": 1, "nested": {"ok": true}});

    store.put("metrics.system", &value, Duration::from_secs(300)).await.unwrap();
    assert_eq!(store.get("metrics.system").await.unwrap(), Some(value));
    assert!(store.forget("metrics.system").await.unwrap());
    assert!(!store.forget("metrics.system").await.unwrap());
    assert_eq!(store.get("metrics.system").await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_store_expiry() {
    let store = MemoryStore::with_defaults();
    store.put("short", &json!(1), Duration::from_millis(20)).await.unwrap();

    tokio::time::sleep(Duration::from_millis(40)).await;

    assert_eq!(store.get("short").await.unwrap(), None);
    let stats = store.stats().await.unwrap();
    assert_eq!(stats.expired, 1);
    assert_eq!(stats.keys, 0);
}

#[tokio::test]
async fn test_memory_store_fifo_eviction() {
    let store = MemoryStore::new("small", 2);
    let ttl = Duration::from_secs(60);

    store.put("a", &json!("a"), ttl).await.unwrap();
    store.put("b", &json!("b"), ttl).await.unwrap();
    store.put("c", &json!("c"), ttl).await.unwrap();

    assert_eq!(store.get("a").await.unwrap(), None);
    assert_eq!(store.get("c").await.unwrap(), Some(json!("c")));
    assert_eq!(store.stats().await.unwrap().evictions, 1);
    assert_eq!(store.len().await, 2);
}

#[tokio::test]
async fn test_memory_store_hit_ratio() {
    let store = MemoryStore::with_defaults();
    store.put("k", &json!(true), Duration::from_secs(60)).await.unwrap();

    store.get("k").await.unwrap();
    store.get("k").await.unwrap();
    store.get("k").await.unwrap();
    store.get("missing").await.unwrap();

    let stats = store.stats().await.unwrap();
    assert_eq!(stats.hits, 3);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hit_ratio(), 75.0);
    assert!(stats.memory_bytes > 0);
}

#[test]
fn test_hit_ratio_without_traffic() {
    assert_eq!(StoreStats::default().hit_ratio(), 0.0);
}

#[test]
fn test_parse_redis_info() {
    let raw = "# Stats\r\nkeyspace_hits:90\r\nkeyspace_misses:10\r\nevicted_keys:3\r\n";
    let info = parse_info(raw);
    assert_eq!(info.get("keyspace_hits").map(String::as_str), Some("90"));
    assert_eq!(info.get("evicted_keys").map(String::as_str), Some("3"));
    assert!(!info.contains_key("# Stats"));

    let keyspace = parse_info("# Keyspace\r\ndb0:keys=12,expires=4,avg_ttl=0\r\ndb1:keys=3,expires=0\r\n");
    assert_eq!(keyspace_keys(&keyspace), 15);
}
