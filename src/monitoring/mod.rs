// Monitoring and Health Aggregation
// Runs the collectors, holds the metric snapshot, records custom metrics, evaluates alerts and checks health

use crate::caching::{CacheStore, MemoryStore};
use crate::config::{HealthConfig, MonitorConfig, MonitoringSettings};
use crate::database::Database;
use crate::events::{self, EventDispatcher, NullDispatcher};
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

pub mod alerts;
pub mod collectors;
pub mod exporters;
pub mod health;
pub mod metrics;
pub mod request;
pub mod timer;

#[cfg(test)]
mod tests;

use alerts::{Alert, AlertRule, LogChannel, NotificationChannel};
use health::{
    ApplicationHealthCheck, CacheHealthCheck, DatabaseHealthCheck, HealthCheck, HealthStatus,
    MemoryHealthCheck, StorageHealthCheck, Thresholds,
};
use metrics::{CustomMetric, CustomMetrics, HistogramSample, Tags};
use timer::TimerContext;

/// Collector output: a JSON object with a collector-specific shape
pub type MetricBundle = Map<String, Value>;

/// Cache key holding the active alert rule set
pub const ALERT_RULES_KEY: &str = "monitoring.alerts";

/// Trait for metrics collectors
#[async_trait::async_trait]
pub trait MetricsCollector: Send + Sync {
    /// Key of this collector's bundle in the snapshot
    fn name(&self) -> &str;

    /// Gather one bundle. Implementations degrade sub-probe failures into an
    /// `"error"` field; an `Err` drops the whole bundle from the pass.
    async fn collect(&self) -> Result<MetricBundle>;
}

/// Counters about collection passes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionStats {
    /// Completed `collect_metrics` passes
    pub total_passes: u64,
    /// Bundles produced across all passes
    pub successful_collections: u64,
    /// Collector failures across all passes
    pub failed_collections: u64,
    /// Duration of the latest pass
    pub last_duration_ms: f64,
    /// End of the latest pass
    pub last_collection: Option<DateTime<Utc>>,
    /// Latest failure per collector, cleared once it succeeds again
    pub last_errors: BTreeMap<String, String>,
}

/// Monitoring manager
pub struct MonitoringManager {
    /// Registered collectors, fixed at construction
    collectors: Arc<Vec<Arc<dyn MetricsCollector>>>,
    /// Live health probes
    health_checks: Arc<Vec<Arc<dyn HealthCheck>>>,
    /// Alert delivery channels
    channels: Arc<Vec<Arc<dyn NotificationChannel>>>,
    /// Cross-process cache collaborator
    cache: Arc<dyn CacheStore>,
    /// Event collaborator
    events: Arc<dyn EventDispatcher>,
    /// Manager settings
    settings: MonitoringSettings,
    /// Deadline for each health probe
    probe_timeout: Duration,
    /// Latest collector bundles
    snapshot: Arc<RwLock<BTreeMap<String, MetricBundle>>>,
    /// Custom metric bucket
    custom: Arc<RwLock<CustomMetrics>>,
    /// Active alert rules
    rules: Arc<RwLock<Vec<AlertRule>>>,
    /// Recently triggered alerts, oldest first
    history: Arc<RwLock<VecDeque<Alert>>>,
    /// Collection statistics
    stats: Arc<RwLock<CollectionStats>>,
}

impl MonitoringManager {
    pub fn builder() -> MonitoringManagerBuilder {
        MonitoringManagerBuilder::new()
    }

    /// Manager with no collectors, an in-memory cache and default settings
    pub fn with_defaults() -> Self {
        Self::builder().build()
    }

    /// Names of the registered collectors, in registration order
    pub fn collector_names(&self) -> Vec<String> {
        self.collectors.iter().map(|c| c.name().to_string()).collect()
    }

    pub fn settings(&self) -> &MonitoringSettings {
        &self.settings
    }

    /// Run every collector and replace the snapshot with the bundles that
    /// came back. A collector that errors, panics or overruns its deadline
    /// is logged once and left out of the result.
    pub async fn collect_metrics(&self) -> BTreeMap<String, MetricBundle> {
        let started = Instant::now();
        let deadline = Duration::from_millis(self.settings.collector_timeout_ms);
        let concurrency = self.settings.max_concurrent_collectors.max(1);

        let outcomes: Vec<(String, Result<MetricBundle>)> =
            stream::iter(self.collectors.iter().cloned())
                .map(|collector| async move {
                    let name = collector.name().to_string();
                    let outcome = run_collector(collector, deadline).await;
                    (name, outcome)
                })
                .buffer_unordered(concurrency)
                .collect()
                .await;

        let mut fresh = BTreeMap::new();
        let mut failures = BTreeMap::new();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(bundle) => {
                    debug!(collector = %name, keys = bundle.len(), "Collected metrics");
                    fresh.insert(name, bundle);
                }
                Err(e) => {
                    error!(collector = %name, error = %e, "Failed to collect metrics from {}", name);
                    failures.insert(name, e.to_string());
                }
            }
        }

        let ttl = Duration::from_secs(self.settings.snapshot_ttl_secs);
        for (name, bundle) in &fresh {
            let key = format!("metrics.{}", name);
            if let Err(e) = self.cache.put(&key, &Value::Object(bundle.clone()), ttl).await {
                warn!(key = %key, error = %e, "Failed to cache metric bundle");
            }
        }

        *self.snapshot.write().await = fresh.clone();

        {
            let mut stats = self.stats.write().await;
            stats.total_passes += 1;
            stats.successful_collections += fresh.len() as u64;
            stats.failed_collections += failures.len() as u64;
            stats.last_duration_ms = started.elapsed().as_secs_f64() * 1000.0;
            stats.last_collection = Some(Utc::now());
            for name in fresh.keys() {
                stats.last_errors.remove(name);
            }
            stats.last_errors.extend(failures);
        }

        let mut result = fresh;
        let custom = self.custom.read().await;
        if !custom.is_empty() {
            result.insert("custom".to_string(), custom.tree().clone());
        }

        info!(
            collectors = result.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Metrics collection finished"
        );
        result
    }

    /// Latest collector bundles plus the custom bucket
    pub async fn snapshot(&self) -> BTreeMap<String, MetricBundle> {
        let mut snapshot = self.snapshot.read().await.clone();
        let custom = self.custom.read().await;
        if !custom.is_empty() {
            snapshot.insert("custom".to_string(), custom.tree().clone());
        }
        snapshot
    }

    /// Dotted-path lookup, e.g. `database.connection.connected` or
    /// `custom.counters.hits`
    pub async fn get_metric(&self, path: &str) -> Option<Value> {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };

        if head == "custom" {
            let custom = self.custom.read().await;
            return match rest {
                Some(rest) => custom.get(rest).cloned(),
                None => Some(Value::Object(custom.tree().clone())),
            };
        }

        let snapshot = self.snapshot.read().await;
        let bundle = snapshot.get(head)?;
        match rest {
            Some(rest) => metrics::get_path(bundle, rest).cloned(),
            None => Some(Value::Object(bundle.clone())),
        }
    }

    /// [`get_metric`](Self::get_metric) with a fallback
    pub async fn get_metric_or(&self, path: &str, default: Value) -> Value {
        self.get_metric(path).await.unwrap_or(default)
    }

    /// Record a custom metric, mirror it to the cache, evaluate alert rules
    /// and announce it
    pub async fn record_metric(&self, name: &str, value: impl Into<Value>, tags: Tags) {
        let metric = CustomMetric::new(name, value.into(), tags);
        let stored = store_custom(&mut *self.custom.write().await, &metric);
        if stored {
            self.publish(metric).await;
        }
    }

    /// Add one to `counters.<name>`
    pub async fn increment(&self, name: &str, tags: Tags) {
        self.increment_by(name, 1, tags).await;
    }

    /// Add `delta` to `counters.<name>`. The read and the write happen under
    /// one lock, so concurrent callers in this process never lose updates.
    pub async fn increment_by(&self, name: &str, delta: i64, tags: Tags) {
        let key = format!("{}.{}", metrics::COUNTERS, name);
        let metric = {
            let mut custom = self.custom.write().await;
            let next = match custom.get(&key) {
                Some(Value::Number(n)) => match n.as_i64() {
                    Some(current) => json!(current.saturating_add(delta)),
                    None => json!(n.as_f64().unwrap_or(0.0) + delta as f64),
                },
                Some(other) => match metrics::numeric(other) {
                    Some(current) => json!(current + delta as f64),
                    None => json!(delta),
                },
                None => json!(delta),
            };
            let metric = CustomMetric::new(key, next, tags);
            store_custom(&mut custom, &metric).then_some(metric)
        };
        if let Some(metric) = metric {
            self.publish(metric).await;
        }
    }

    /// Set `gauges.<name>`
    pub async fn gauge(&self, name: &str, value: f64, tags: Tags) {
        self.record_metric(&format!("{}.{}", metrics::GAUGES, name), value, tags)
            .await;
    }

    /// Set `timings.<name>` in milliseconds
    pub async fn timing(&self, name: &str, duration_ms: f64, tags: Tags) {
        self.record_metric(&format!("{}.{}", metrics::TIMINGS, name), duration_ms, tags)
            .await;
    }

    /// Append a sample to the histogram `name` and record the retained
    /// series under `histograms.<name>`
    pub async fn histogram(&self, name: &str, value: f64, tags: Tags) {
        let metric = {
            let mut custom = self.custom.write().await;
            let series = custom.push_sample(
                name,
                HistogramSample {
                    value,
                    timestamp: metrics::unix_timestamp(),
                    tags: tags.clone(),
                },
            );
            let metric = CustomMetric::new(format!("{}.{}", metrics::HISTOGRAMS, name), series, tags);
            store_custom(&mut custom, &metric).then_some(metric)
        };
        if let Some(metric) = metric {
            self.publish(metric).await;
        }
    }

    /// Number of samples currently retained for a histogram
    pub async fn histogram_len(&self, name: &str) -> usize {
        self.custom
            .read()
            .await
            .histogram(name)
            .map(|h| h.len())
            .unwrap_or(0)
    }

    /// Values currently retained for a histogram, oldest first
    pub async fn histogram_values(&self, name: &str) -> Vec<f64> {
        self.custom
            .read()
            .await
            .histogram(name)
            .map(|h| h.samples().map(|s| s.value).collect())
            .unwrap_or_default()
    }

    /// Start a scoped timer recording into `timings.<name>`
    pub fn start_timer(&self, name: &str) -> TimerContext {
        TimerContext::new(self.clone(), name, Tags::new())
    }

    pub fn start_timer_with_tags(&self, name: &str, tags: Tags) -> TimerContext {
        TimerContext::new(self.clone(), name, tags)
    }

    /// All recorded custom metrics, latest value per name
    pub async fn custom_metrics(&self) -> Vec<CustomMetric> {
        self.custom.read().await.records().cloned().collect()
    }

    /// Cache mirror, alert evaluation and event for a metric already stored
    /// in the custom bucket
    async fn publish(&self, metric: CustomMetric) {
        let ttl = Duration::from_secs(self.settings.custom_metric_ttl_secs);
        match serde_json::to_value(&metric) {
            Ok(value) => {
                if let Err(e) = self.cache.put(&metric.cache_key(), &value, ttl).await {
                    warn!(metric = %metric.name, error = %e, "Failed to mirror custom metric");
                }
            }
            Err(e) => warn!(metric = %metric.name, error = %e, "Failed to serialize custom metric"),
        }

        self.evaluate_alerts(&metric).await;

        self.events.dispatch(
            events::METRIC_RECORDED,
            json!({
                "name": metric.name,
                "value": metric.value,
                "tags": metric.tags,
                "timestamp": metric.timestamp,
            }),
        );
    }

    async fn evaluate_alerts(&self, metric: &CustomMetric) {
        let rules = self.rules.read().await.clone();
        for rule in rules.iter().filter(|r| r.matches(&metric.name, &metric.value)) {
            let alert = rule.alert_for(metric);
            self.send_alert(&alert, &rule.channels).await;
        }
    }

    /// Deliver an alert to the named channels, keep it in the history and
    /// announce it. Returns the number of channels that accepted it.
    pub async fn send_alert(&self, alert: &Alert, channels: &[String]) -> usize {
        let delivered = alerts::deliver(alert, channels, &self.channels).await;

        {
            let limit = self.settings.alert_history_limit.max(1);
            let mut history = self.history.write().await;
            while history.len() >= limit {
                history.pop_front();
            }
            history.push_back(alert.clone());
        }

        self.events.dispatch(
            events::ALERT_TRIGGERED,
            json!({
                "alert": alert,
                "channels": channels,
                "delivered": delivered,
            }),
        );
        delivered
    }

    /// Most recent alerts, newest last
    pub async fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// Replace the active rule set and persist it: to the durable rules file
    /// when one is configured, then to the cache with the configured TTL. A
    /// failed file write leaves the previous rules active.
    pub async fn setup_alerts(&self, rules: Vec<AlertRule>) -> Result<()> {
        let count = rules.len();
        let value = serde_json::to_value(&rules)?;

        if let Some(path) = &self.settings.alert_rules_path {
            write_rules_file(path, &value).await?;
        }

        *self.rules.write().await = rules;

        let ttl = Duration::from_secs(self.settings.alert_rules_ttl_secs);
        if let Err(e) = self.cache.put(ALERT_RULES_KEY, &value, ttl).await {
            warn!(error = %e, "Failed to cache alert rules");
        }

        info!(rules = count, "Alert rules updated");
        Ok(())
    }

    /// Restore the rule set from the cache, falling back to the durable
    /// rules file. Invalid entries are skipped one by one. Returns the number
    /// of rules now active.
    pub async fn load_alerts(&self) -> usize {
        let cached = match self.cache.get(ALERT_RULES_KEY).await {
            Ok(value) => value.and_then(|v| parse_rules(v, "cache")),
            Err(e) => {
                warn!(error = %e, "Failed to read cached alert rules");
                None
            }
        };

        let rules = match cached {
            Some(rules) => Some(rules),
            None => match &self.settings.alert_rules_path {
                Some(path) => match read_rules_file(path).await {
                    Ok(rules) => rules,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Failed to read alert rules file");
                        None
                    }
                },
                None => None,
            },
        };

        match rules {
            Some(rules) => {
                let count = rules.len();
                *self.rules.write().await = rules;
                count
            }
            None => self.rules.read().await.len(),
        }
    }

    pub async fn alert_rules(&self) -> Vec<AlertRule> {
        self.rules.read().await.clone()
    }

    /// Run every health check concurrently, each under the probe deadline
    pub async fn check_health(&self) -> HealthStatus {
        let runs = self
            .health_checks
            .iter()
            .map(|check| health::run_check(Arc::clone(check), self.probe_timeout));
        let checks: BTreeMap<String, _> = futures::future::join_all(runs).await.into_iter().collect();

        let status = HealthStatus::from_checks(checks);
        info!(overall = %status.overall, checks = status.checks.len(), "Health check finished");
        status
    }

    /// Render the snapshot and custom metrics in the text exposition format
    pub async fn export_prometheus_metrics(&self) -> String {
        let exporter = exporters::PrometheusExporter::new(&self.settings.export_prefix);
        let snapshot = self.snapshot.read().await;
        let custom = self.custom.read().await;
        exporter.render(&snapshot, custom.records())
    }

    pub async fn collection_stats(&self) -> CollectionStats {
        self.stats.read().await.clone()
    }
}

impl Clone for MonitoringManager {
    fn clone(&self) -> Self {
        Self {
            collectors: Arc::clone(&self.collectors),
            health_checks: Arc::clone(&self.health_checks),
            channels: Arc::clone(&self.channels),
            cache: Arc::clone(&self.cache),
            events: Arc::clone(&self.events),
            settings: self.settings.clone(),
            probe_timeout: self.probe_timeout,
            snapshot: Arc::clone(&self.snapshot),
            custom: Arc::clone(&self.custom),
            rules: Arc::clone(&self.rules),
            history: Arc::clone(&self.history),
            stats: Arc::clone(&self.stats),
        }
    }
}

/// Store `metric` in the custom bucket, logging a refused path
fn store_custom(custom: &mut CustomMetrics, metric: &CustomMetric) -> bool {
    let stored = custom.record(metric.clone());
    if !stored {
        warn!(
            metric = %metric.name,
            "Metric name collides with an existing metric path; value not recorded"
        );
    }
    stored
}

/// Run one collector on its own task so a panic or overrun stays contained
async fn run_collector(collector: Arc<dyn MetricsCollector>, deadline: Duration) -> Result<MetricBundle> {
    let name = collector.name().to_string();
    let mut handle = tokio::spawn(async move { collector.collect().await });

    match tokio::time::timeout(deadline, &mut handle).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(join_error)) if join_error.is_panic() => {
            Err(MonitorError::collector(name, "collector panicked"))
        }
        Ok(Err(_)) => Err(MonitorError::collector(name, "collector task was cancelled")),
        Err(_) => {
            handle.abort();
            Err(MonitorError::timeout(
                format!("collect {}", name),
                deadline.as_millis() as u64,
            ))
        }
    }
}

async fn write_rules_file(path: &Path, rules: &Value) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, serde_json::to_string_pretty(rules)?).await?;
    Ok(())
}

async fn read_rules_file(path: &Path) -> Result<Option<Vec<AlertRule>>> {
    let content = tokio::fs::read_to_string(path).await?;
    let value: Value = serde_json::from_str(&content)?;
    Ok(parse_rules(value, "file"))
}

/// Decode a stored rule set entry by entry. `None` when the value is not a
/// list at all.
fn parse_rules(value: Value, source: &str) -> Option<Vec<AlertRule>> {
    let Value::Array(entries) = value else {
        warn!(source, "Ignoring stored alert rules that are not a list");
        return None;
    };

    let rules = entries
        .into_iter()
        .enumerate()
        .filter_map(|(index, entry)| match serde_json::from_value::<AlertRule>(entry) {
            Ok(rule) => Some(rule),
            Err(e) => {
                warn!(source, index, error = %e, "Skipping invalid alert rule");
                None
            }
        })
        .collect();
    Some(rules)
}

/// Builder for [`MonitoringManager`]
pub struct MonitoringManagerBuilder {
    settings: MonitoringSettings,
    health: HealthConfig,
    cache: Option<Arc<dyn CacheStore>>,
    events: Option<Arc<dyn EventDispatcher>>,
    database: Option<Arc<dyn Database>>,
    collectors: Vec<Arc<dyn MetricsCollector>>,
    health_checks: Vec<Arc<dyn HealthCheck>>,
    default_health_checks: bool,
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl MonitoringManagerBuilder {
    pub fn new() -> Self {
        Self {
            settings: MonitoringSettings::default(),
            health: HealthConfig::default(),
            cache: None,
            events: None,
            database: None,
            collectors: Vec::new(),
            health_checks: Vec::new(),
            default_health_checks: true,
            channels: Vec::new(),
        }
    }

    /// Take the manager and health sections of a full config
    pub fn config(mut self, config: &MonitorConfig) -> Self {
        self.settings = config.monitoring.clone();
        self.health = config.health.clone();
        self
    }

    pub fn settings(mut self, settings: MonitoringSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn health_config(mut self, health: HealthConfig) -> Self {
        self.health = health;
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventDispatcher>) -> Self {
        self.events = Some(events);
        self
    }

    /// Connection used by the database health check
    pub fn database(mut self, database: Arc<dyn Database>) -> Self {
        self.database = Some(database);
        self
    }

    pub fn collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.collectors.push(collector);
        self
    }

    /// Add a health check; replaces a built-in check of the same name
    pub fn health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_checks.push(check);
        self
    }

    /// Run only the checks added through [`health_check`](Self::health_check)
    pub fn without_default_health_checks(mut self) -> Self {
        self.default_health_checks = false;
        self
    }

    /// Add a delivery channel; replaces an earlier channel of the same name
    pub fn channel(mut self, channel: Arc<dyn NotificationChannel>) -> Self {
        self.channels.retain(|c| c.name() != channel.name());
        self.channels.push(channel);
        self
    }

    pub fn build(self) -> MonitoringManager {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryStore::with_defaults()));
        let events = self.events.unwrap_or_else(|| Arc::new(NullDispatcher));

        let mut channels = self.channels;
        if !channels.iter().any(|c| c.name() == "log") {
            channels.insert(0, Arc::new(LogChannel));
        }

        let collector_names: Vec<String> =
            self.collectors.iter().map(|c| c.name().to_string()).collect();

        let mut health_checks: Vec<Arc<dyn HealthCheck>> = Vec::new();
        if self.default_health_checks {
            let thresholds = Thresholds::from(&self.health);
            let mut services = BTreeMap::new();
            services.insert("database".to_string(), self.database.is_some());
            services.insert("cache".to_string(), true);
            services.insert("events".to_string(), true);

            health_checks.push(Arc::new(DatabaseHealthCheck::new(self.database.clone(), thresholds)));
            health_checks.push(Arc::new(CacheHealthCheck::new(Arc::clone(&cache), thresholds)));
            health_checks.push(Arc::new(StorageHealthCheck::new(
                self.health.storage_path.clone(),
                thresholds,
            )));
            health_checks.push(Arc::new(MemoryHealthCheck::new(
                self.health.memory_limit_bytes,
                thresholds,
            )));
            health_checks.push(Arc::new(ApplicationHealthCheck::new(
                self.health.expected_collectors.clone(),
                collector_names,
                services,
            )));
        }
        for check in self.health_checks {
            health_checks.retain(|c| c.name() != check.name());
            health_checks.push(check);
        }

        MonitoringManager {
            collectors: Arc::new(self.collectors),
            health_checks: Arc::new(health_checks),
            channels: Arc::new(channels),
            cache,
            events,
            custom: Arc::new(RwLock::new(CustomMetrics::new(self.settings.histogram_capacity))),
            probe_timeout: Duration::from_millis(self.health.probe_timeout_ms),
            settings: self.settings,
            snapshot: Arc::new(RwLock::new(BTreeMap::new())),
            rules: Arc::new(RwLock::new(Vec::new())),
            history: Arc::new(RwLock::new(VecDeque::new())),
            stats: Arc::new(RwLock::new(CollectionStats::default())),
        }
    }
}

impl Default for MonitoringManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
