// Monitoring Manager Tests
// Collection isolation, custom metrics, timers, alert rules and health aggregation

use super::*;
use crate::monitoring::alerts::{AlertSeverity, ComparisonOperator};
use crate::monitoring::health::{CheckResult, HealthState};
use crate::events::BroadcastDispatcher;
use std::sync::Mutex;

struct StaticCollector {
    name: &'static str,
    bundle: Value,
}

#[async_trait::async_trait]
impl MetricsCollector for StaticCollector {
    fn name(&self) -> &str {
        self.name
    }

    async fn collect(&self) -> Result<MetricBundle> {
        Ok(self.bundle.as_object().cloned().unwrap_or_default())
    }
}

struct FailingCollector;

#[async_trait::async_trait]
impl MetricsCollector for FailingCollector {
    fn name(&self) -> &str {
        "failing"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        Err(MonitorError::collector("failing", "upstream unavailable"))
    }
}

struct PanickingCollector;

#[async_trait::async_trait]
impl MetricsCollector for PanickingCollector {
    fn name(&self) -> &str {
        "panicking"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        panic!("collector bug");
    }
}

struct SlowCollector;

#[async_trait::async_trait]
impl MetricsCollector for SlowCollector {
    fn name(&self) -> &str {
        "slow"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(MetricBundle::new())
    }
}

#[derive(Default)]
struct RecordingChannel {
    received: Mutex<Vec<Alert>>,
}

#[async_trait::async_trait]
impl NotificationChannel for RecordingChannel {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        self.received.lock().unwrap().push(alert.clone());
        Ok(())
    }
}

struct StaticCheck {
    name: &'static str,
    state: HealthState,
}

#[async_trait::async_trait]
impl HealthCheck for StaticCheck {
    fn name(&self) -> &str {
        self.name
    }

    async fn check(&self) -> Result<CheckResult> {
        Ok(CheckResult::new(self.state, format!("{} is {}", self.name, self.state)))
    }
}

fn fast_settings() -> MonitoringSettings {
    MonitoringSettings {
        collector_timeout_ms: 200,
        ..MonitoringSettings::default()
    }
}

fn tags(pairs: &[(&str, &str)]) -> Tags {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[tokio::test]
async fn test_collect_isolates_failing_collectors() {
    let manager = MonitoringManager::builder()
        .settings(fast_settings())
        .collector(Arc::new(StaticCollector {
            name: "inventory",
            bundle: json!({"skus": 120, "warehouse": {"open": true}}),
        }))
        .collector(Arc::new(FailingCollector))
        .collector(Arc::new(PanickingCollector))
        .collector(Arc::new(SlowCollector))
        .build();

    let result = manager.collect_metrics().await;

    assert_eq!(result.len(), 1);
    assert_eq!(result["inventory"]["skus"], 120);

    let stats = manager.collection_stats().await;
    assert_eq!(stats.total_passes, 1);
    assert_eq!(stats.successful_collections, 1);
    assert_eq!(stats.failed_collections, 3);
    assert!(stats.last_errors.contains_key("failing"));
    assert!(stats.last_errors["panicking"].contains("panicked"));
    assert!(stats.last_errors.contains_key("slow"));
    assert!(stats.last_collection.is_some());
}

#[tokio::test]
async fn test_collect_replaces_snapshot_and_mirrors_bundles() {
    let cache = Arc::new(MemoryStore::with_defaults());
    let manager = MonitoringManager::builder()
        .cache(cache.clone())
        .collector(Arc::new(StaticCollector {
            name: "inventory",
            bundle: json!({"skus": 120}),
        }))
        .build();

    assert!(manager.snapshot().await.is_empty());
    manager.collect_metrics().await;

    assert_eq!(manager.get_metric("inventory.skus").await, Some(json!(120)));
    let cached = cache.get("metrics.inventory").await.unwrap();
    assert_eq!(cached, Some(json!({"skus": 120})));
}

#[tokio::test]
async fn test_collect_without_collectors() {
    let manager = MonitoringManager::with_defaults();
    assert!(manager.collect_metrics().await.is_empty());

    manager.increment("orders", Tags::new()).await;
    let result = manager.collect_metrics().await;
    assert_eq!(result["custom"]["counters"]["orders"], 1);
}

#[tokio::test]
async fn test_get_metric_round_trip() {
    let manager = MonitoringManager::with_defaults();

    manager.record_metric("checkout.rate", 42.5, Tags::new()).await;
    manager.record_metric("checkout.gateway", "stripe", Tags::new()).await;
    manager.record_metric("checkout.enabled", true, Tags::new()).await;

    assert_eq!(manager.get_metric("custom.checkout.rate").await, Some(json!(42.5)));
    assert_eq!(manager.get_metric("custom.checkout.gateway").await, Some(json!("stripe")));
    assert_eq!(manager.get_metric("custom.checkout.enabled").await, Some(json!(true)));
    assert_eq!(manager.get_metric("custom.checkout.missing").await, None);
    assert_eq!(manager.get_metric("database.connection").await, None);
    assert_eq!(
        manager.get_metric_or("system.cpu.cores", json!(0)).await,
        json!(0)
    );
}

#[tokio::test]
async fn test_increment_preserves_integers() {
    let manager = MonitoringManager::with_defaults();
    for _ in 0..3 {
        manager.increment("page_views", Tags::new()).await;
    }
    manager.increment_by("refunds", -2, Tags::new()).await;

    assert_eq!(manager.get_metric("custom.counters.page_views").await, Some(json!(3)));
    assert_eq!(manager.get_metric("custom.counters.refunds").await, Some(json!(-2)));
}

#[tokio::test]
async fn test_concurrent_increments_are_not_lost() {
    let manager = MonitoringManager::with_defaults();
    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let manager = manager.clone();
            tokio::spawn(async move { manager.increment("hits", Tags::new()).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(manager.get_metric("custom.counters.hits").await, Some(json!(20)));
}

#[tokio::test]
async fn test_histogram_keeps_latest_samples() {
    let manager = MonitoringManager::with_defaults();
    for i in 0..1500 {
        manager.histogram("response_size", f64::from(i), Tags::new()).await;
    }

    assert_eq!(manager.histogram_len("response_size").await, 1000);
    let values = manager.histogram_values("response_size").await;
    assert_eq!(values.first(), Some(&500.0));
    assert_eq!(values.last(), Some(&1499.0));
    assert_eq!(manager.histogram_len("unknown").await, 0);
}

#[tokio::test]
async fn test_custom_metric_mirrored_and_announced() {
    let cache = Arc::new(MemoryStore::with_defaults());
    let events = Arc::new(BroadcastDispatcher::new(16));
    let mut receiver = events.subscribe();
    let manager = MonitoringManager::builder()
        .cache(cache.clone())
        .events(events)
        .build();

    manager
        .gauge("queue_depth", 7.0, tags(&[("queue", "emails")]))
        .await;

    let metric = manager
        .custom_metrics()
        .await
        .into_iter()
        .find(|m| m.name == "gauges.queue_depth")
        .unwrap();
    let cached = cache.get(&metric.cache_key()).await.unwrap().unwrap();
    assert_eq!(cached["value"], 7.0);
    assert_eq!(cached["tags"]["queue"], "emails");

    let event = receiver.recv().await.unwrap();
    assert_eq!(event.name, crate::events::METRIC_RECORDED);
    assert_eq!(event.payload["name"], "gauges.queue_depth");
}

#[tokio::test]
async fn test_timer_stop_records_once() {
    let manager = MonitoringManager::with_defaults();
    let mut timer = manager.start_timer("checkout");
    tokio::time::sleep(Duration::from_millis(5)).await;

    let elapsed = timer.stop().await.unwrap();
    assert!(elapsed >= 5.0);
    assert!(timer.is_stopped());
    assert_eq!(timer.stop().await, None);

    let recorded = manager.get_metric("custom.timings.checkout").await.unwrap();
    assert_eq!(recorded.as_f64(), Some(elapsed));
    drop(timer);
}

#[tokio::test]
async fn test_dropped_timer_records_before_scope_ends() {
    let cache = Arc::new(MemoryStore::with_defaults());
    let manager = MonitoringManager::builder().cache(cache.clone()).build();
    {
        let _timer = manager.start_timer_with_tags("cart_render", tags(&[("theme", "default")]));
    }

    let recorded = manager.get_metric("custom.timings.cart_render").await;
    assert!(recorded.and_then(|v| v.as_f64()).is_some());

    // The cache mirror follows on a spawned task
    tokio::time::sleep(Duration::from_millis(20)).await;
    let metric = manager
        .custom_metrics()
        .await
        .into_iter()
        .find(|m| m.name == "timings.cart_render")
        .unwrap();
    assert!(cache.get(&metric.cache_key()).await.unwrap().is_some());
}

#[test]
fn test_timer_dropped_outside_runtime_still_records() {
    let manager = MonitoringManager::with_defaults();
    let timer = manager.start_timer("cron_job");
    drop(timer);

    let recorded = tokio_test::block_on(manager.get_metric("custom.timings.cron_job"));
    assert!(recorded.and_then(|v| v.as_f64()).is_some());
}

#[tokio::test]
async fn test_conflicting_metric_name_is_refused() {
    let manager = MonitoringManager::with_defaults();
    manager.increment("orders", Tags::new()).await;
    manager.record_metric("counters.orders.placed", 2, Tags::new()).await;

    assert_eq!(manager.get_metric("custom.counters.orders").await, Some(json!(1)));
    manager.increment("orders", Tags::new()).await;
    assert_eq!(manager.get_metric("custom.counters.orders").await, Some(json!(2)));
    assert!(manager
        .custom_metrics()
        .await
        .iter()
        .all(|m| m.name != "counters.orders.placed"));
}

#[tokio::test]
async fn test_matching_rule_fires_alert() {
    let channel = Arc::new(RecordingChannel::default());
    let manager = MonitoringManager::builder().channel(channel.clone()).build();

    manager
        .setup_alerts(vec![AlertRule::new("slow checkout")
            .pattern("timings.checkout*")
            .threshold(ComparisonOperator::GreaterThan, 2000.0)
            .severity(AlertSeverity::Critical)
            .channels(["recording", "log", "pager"])])
        .await
        .unwrap();

    manager.timing("checkout", 1500.0, Tags::new()).await;
    assert!(channel.received.lock().unwrap().is_empty());

    manager.timing("checkout_payment", 2500.0, Tags::new()).await;
    let received = channel.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].name, "slow checkout");
    assert_eq!(received[0].severity, AlertSeverity::Critical);
    assert_eq!(received[0].context["metric"], "timings.checkout_payment");

    let history = manager.recent_alerts(10).await;
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn test_non_numeric_value_never_trips_threshold() {
    let channel = Arc::new(RecordingChannel::default());
    let manager = MonitoringManager::builder().channel(channel.clone()).build();
    manager
        .setup_alerts(vec![AlertRule::new("any")
            .threshold(ComparisonOperator::GreaterThanOrEqual, 0.0)
            .channels(["recording"])])
        .await
        .unwrap();

    manager.record_metric("status", "degraded", Tags::new()).await;
    assert!(channel.received.lock().unwrap().is_empty());

    manager.record_metric("queue", "12", Tags::new()).await;
    assert_eq!(channel.received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_send_alert_counts_deliveries_and_caps_history() {
    let channel = Arc::new(RecordingChannel::default());
    let manager = MonitoringManager::builder()
        .settings(MonitoringSettings {
            alert_history_limit: 2,
            ..MonitoringSettings::default()
        })
        .channel(channel.clone())
        .build();

    let alert = AlertRule::new("manual").alert_for(&metrics::CustomMetric::new(
        "orders.failed",
        json!(3),
        Tags::new(),
    ));
    let names = vec!["log".to_string(), "recording".to_string(), "sms".to_string()];
    for _ in 0..3 {
        assert_eq!(manager.send_alert(&alert, &names).await, 2);
    }

    assert_eq!(channel.received.lock().unwrap().len(), 3);
    assert_eq!(manager.recent_alerts(10).await.len(), 2);
    assert_eq!(manager.recent_alerts(1).await.len(), 1);
}

#[tokio::test]
async fn test_alert_rules_survive_restart_through_file() {
    let dir = tempfile::tempdir().unwrap();
    let settings = MonitoringSettings {
        alert_rules_path: Some(dir.path().join("rules/alerts.json")),
        ..MonitoringSettings::default()
    };

    let rules = vec![
        AlertRule::new("low stock")
            .pattern("gauges.stock.*")
            .threshold(ComparisonOperator::LessThan, 5.0),
        AlertRule::new("errors").pattern("counters.errors"),
    ];

    let first = MonitoringManager::builder().settings(settings.clone()).build();
    first.setup_alerts(rules.clone()).await.unwrap();
    assert_eq!(first.alert_rules().await, rules);

    // Fresh cache: only the file remains
    let second = MonitoringManager::builder().settings(settings).build();
    assert!(second.alert_rules().await.is_empty());
    assert_eq!(second.load_alerts().await, 2);
    assert_eq!(second.alert_rules().await, rules);
}

#[tokio::test]
async fn test_load_alerts_prefers_cache() {
    let cache = Arc::new(MemoryStore::with_defaults());
    let first = MonitoringManager::builder().cache(cache.clone()).build();
    first
        .setup_alerts(vec![AlertRule::new("cached")])
        .await
        .unwrap();

    let second = MonitoringManager::builder().cache(cache).build();
    assert_eq!(second.load_alerts().await, 1);
    assert_eq!(second.alert_rules().await[0].name, "cached");

    let empty = MonitoringManager::with_defaults();
    assert_eq!(empty.load_alerts().await, 0);
}

#[tokio::test]
async fn test_load_alerts_skips_only_invalid_rules() {
    let cache = Arc::new(MemoryStore::with_defaults());
    cache
        .put(
            ALERT_RULES_KEY,
            &json!([
                {"name": "pager", "severity": "high", "channels": ["log"]},
                {"name": "outage", "severity": "critical"},
                {"severity": "critical"},
                {"name": "bad operator", "operator": "~"}
            ]),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

    let manager = MonitoringManager::builder().cache(cache).build();
    assert_eq!(manager.load_alerts().await, 2);

    let rules = manager.alert_rules().await;
    assert_eq!(rules[0].severity, AlertSeverity::Other("high".to_string()));
    assert_eq!(rules[1].severity, AlertSeverity::Critical);
}

#[tokio::test]
async fn test_failed_rules_file_write_keeps_previous_rules() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "file").unwrap();

    let manager = MonitoringManager::builder()
        .settings(MonitoringSettings {
            alert_rules_path: Some(blocker.join("alerts.json")),
            ..MonitoringSettings::default()
        })
        .build();

    assert!(manager.setup_alerts(vec![AlertRule::new("new")]).await.is_err());
    assert!(manager.alert_rules().await.is_empty());
    assert_eq!(manager.load_alerts().await, 0);
}

#[tokio::test]
async fn test_health_aggregation() {
    let manager = MonitoringManager::builder()
        .without_default_health_checks()
        .health_check(Arc::new(StaticCheck { name: "database", state: HealthState::Healthy }))
        .health_check(Arc::new(StaticCheck { name: "cache", state: HealthState::Warning }))
        .build();

    let status = manager.check_health().await;
    assert_eq!(status.overall, HealthState::Warning);
    assert_eq!(status.checks.len(), 2);
    assert!(!status.is_healthy());

    let manager = MonitoringManager::builder()
        .without_default_health_checks()
        .health_check(Arc::new(StaticCheck { name: "database", state: HealthState::Critical }))
        .health_check(Arc::new(StaticCheck { name: "cache", state: HealthState::Warning }))
        .build();
    assert_eq!(manager.check_health().await.overall, HealthState::Critical);
}

#[tokio::test]
async fn test_default_health_checks_are_registered() {
    let manager = MonitoringManager::builder()
        .health_check(Arc::new(StaticCheck { name: "storage", state: HealthState::Healthy }))
        .build();

    let status = manager.check_health().await;
    let names: Vec<&str> = status.checks.keys().map(String::as_str).collect();
    assert_eq!(names, vec!["application", "cache", "database", "memory", "storage"]);
    assert_eq!(status.checks["storage"].status, HealthState::Healthy);
    assert_eq!(status.checks["cache"].status, HealthState::Healthy);
    // No connection configured
    assert_eq!(status.checks["database"].status, HealthState::Warning);
}

#[tokio::test]
async fn test_export_includes_snapshot_and_custom() {
    let manager = MonitoringManager::builder()
        .collector(Arc::new(StaticCollector {
            name: "inventory",
            bundle: json!({"skus": 120, "label": "main", "warehouse": {"open_bays": 4}}),
        }))
        .build();
    manager.collect_metrics().await;
    manager
        .increment("orders", tags(&[("channel", "web")]))
        .await;

    let output = manager.export_prometheus_metrics().await;
    assert!(output.contains("storefront_inventory_skus 120\n"));
    assert!(output.contains("storefront_inventory_warehouse_open_bays 4\n"));
    assert!(output.contains("storefront_counters_orders{channel=\"web\"} 1\n"));
    assert!(!output.contains("label"));
}
