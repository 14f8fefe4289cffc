use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::utils::error::{MonitorError, Result};

/// Main configuration for the monitoring core
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Manager behaviour: TTLs, fan-out, export naming
    pub monitoring: MonitoringSettings,
    /// Live health check thresholds
    pub health: HealthConfig,
    /// Application collector inputs
    pub application: ApplicationConfig,
    /// Cache tiers and micro-benchmark
    pub cache: CacheSettings,
    /// Business collector tuning
    pub business: BusinessConfig,
    /// Alert delivery channels
    pub alerts: AlertChannelConfig,
}

/// Manager-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    /// Prefix prepended to every exported metric name
    pub export_prefix: String,
    /// TTL of the per-collector snapshot mirror (`metrics.<type>`)
    pub snapshot_ttl_secs: u64,
    /// TTL of mirrored custom metrics
    pub custom_metric_ttl_secs: u64,
    /// TTL of the cached alert rule set
    pub alert_rules_ttl_secs: u64,
    /// Samples kept per histogram
    pub histogram_capacity: usize,
    /// Deadline for a single collector's `collect()`
    pub collector_timeout_ms: u64,
    /// Collectors run concurrently during one pass
    pub max_concurrent_collectors: usize,
    /// Alerts retained in the in-memory history
    pub alert_history_limit: usize,
    /// Durable JSON file mirroring the active alert rules
    pub alert_rules_path: Option<PathBuf>,
}

/// Health check settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Deadline applied to each live probe
    pub probe_timeout_ms: u64,
    /// Round-trip latency at which a probe becomes `warning`
    pub latency_warning_ms: u64,
    /// Round-trip latency above which a probe becomes `critical`
    pub latency_critical_ms: u64,
    /// Usage percentage at which storage/memory become `warning`
    pub usage_warning_percent: f64,
    /// Usage percentage above which storage/memory become `critical`
    pub usage_critical_percent: f64,
    /// Directory that must stay writable
    pub storage_path: PathBuf,
    /// Process memory ceiling in bytes (0 = total system memory)
    pub memory_limit_bytes: u64,
    /// Collectors the application check expects to be registered
    pub expected_collectors: Vec<String>,
}

/// Application collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Directory holding one sub-directory per installed plugin
    pub plugins_dir: PathBuf,
    /// File-backed session store
    pub session_dir: PathBuf,
    /// Application error log
    pub error_log_path: PathBuf,
    /// Lines read from the end of the error log
    pub error_log_tail_lines: usize,
    /// Configured memory limit reported as a resource limit
    pub memory_limit_bytes: u64,
    /// Configured request execution limit
    pub max_execution_time_secs: u64,
    /// Configured upload size limit
    pub upload_max_bytes: u64,
}

/// Cache tier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Shared key-value store; in-process store only when unset
    pub redis_url: Option<String>,
    /// Namespace prefix for every key written to Redis
    pub key_prefix: String,
    /// Maximum entries held by the in-process store
    pub memory_max_entries: usize,
    /// Set/get/delete rounds per backend in the micro-benchmark
    pub benchmark_iterations: u32,
    /// Payload size used by the micro-benchmark
    pub benchmark_payload_bytes: usize,
}

/// Business collector settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusinessConfig {
    /// Stock level at or below which a product is flagged
    pub low_stock_threshold: i64,
    /// Rows returned by ranking queries
    pub ranking_limit: u32,
}

/// Alert channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertChannelConfig {
    /// Slack incoming webhook
    pub slack_webhook_url: Option<String>,
    /// Generic JSON webhook
    pub webhook_url: Option<String>,
    /// Recipients of the email channel
    pub email_recipients: Vec<String>,
    /// Outbound request timeout
    pub channel_timeout_secs: u64,
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            export_prefix: "storefront_".to_string(),
            snapshot_ttl_secs: 300,
            custom_metric_ttl_secs: 3600,
            alert_rules_ttl_secs: 3600,
            histogram_capacity: 1000,
            collector_timeout_ms: 10_000,
            max_concurrent_collectors: 4,
            alert_history_limit: 1000,
            alert_rules_path: None,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 2000,
            latency_warning_ms: 1000,
            latency_critical_ms: 5000,
            usage_warning_percent: 80.0,
            usage_critical_percent: 90.0,
            storage_path: PathBuf::from("storage"),
            memory_limit_bytes: 0,
            expected_collectors: vec![
                "system".to_string(),
                "application".to_string(),
                "database".to_string(),
                "cache".to_string(),
                "http".to_string(),
                "business".to_string(),
            ],
        }
    }
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            plugins_dir: PathBuf::from("plugins"),
            session_dir: PathBuf::from("storage/framework/sessions"),
            error_log_path: PathBuf::from("storage/logs/app.log"),
            error_log_tail_lines: 1000,
            memory_limit_bytes: 256 * 1024 * 1024,
            max_execution_time_secs: 30,
            upload_max_bytes: 8 * 1024 * 1024,
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: "storefront:".to_string(),
            memory_max_entries: 10_000,
            benchmark_iterations: 10,
            benchmark_payload_bytes: 1024,
        }
    }
}

impl Default for BusinessConfig {
    fn default() -> Self {
        Self {
            low_stock_threshold: 10,
            ranking_limit: 10,
        }
    }
}

impl Default for AlertChannelConfig {
    fn default() -> Self {
        Self {
            slack_webhook_url: None,
            webhook_url: None,
            email_recipients: Vec::new(),
            channel_timeout_secs: 10,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.into())?;
        let config: MonitorConfig = toml::from_str(&content)
            .map_err(|e| MonitorError::config(format!("Failed to parse config file: {}", e)))?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: Into<PathBuf>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| MonitorError::config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path.into(), content)?;
        Ok(())
    }

    /// Overlay values taken from the process environment
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("STOREFRONT_MONITOR_REDIS_URL") {
            self.cache.redis_url = Some(url);
        }
        if let Ok(url) = std::env::var("STOREFRONT_MONITOR_SLACK_WEBHOOK") {
            self.alerts.slack_webhook_url = Some(url);
        }
        if let Ok(url) = std::env::var("STOREFRONT_MONITOR_WEBHOOK_URL") {
            self.alerts.webhook_url = Some(url);
        }
        if let Ok(prefix) = std::env::var("STOREFRONT_MONITOR_EXPORT_PREFIX") {
            self.monitoring.export_prefix = prefix;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.monitoring.histogram_capacity == 0 {
            return Err(MonitorError::config("histogram_capacity must be greater than 0"));
        }

        if self.monitoring.max_concurrent_collectors == 0 {
            return Err(MonitorError::config(
                "max_concurrent_collectors must be greater than 0",
            ));
        }

        if !self
            .monitoring
            .export_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(MonitorError::config(
                "export_prefix may only contain [a-zA-Z0-9_]",
            ));
        }

        if self.health.latency_warning_ms >= self.health.latency_critical_ms {
            return Err(MonitorError::config(
                "latency_warning_ms must be lower than latency_critical_ms",
            ));
        }

        if self.health.usage_warning_percent >= self.health.usage_critical_percent
            || self.health.usage_critical_percent > 100.0
        {
            return Err(MonitorError::config(
                "usage thresholds must satisfy warning < critical <= 100",
            ));
        }

        for url in self
            .alerts
            .slack_webhook_url
            .iter()
            .chain(self.alerts.webhook_url.iter())
        {
            url::Url::parse(url)
                .map_err(|e| MonitorError::config(format!("Invalid webhook URL {}: {}", url, e)))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.monitoring.snapshot_ttl_secs, 300);
        assert_eq!(config.monitoring.custom_metric_ttl_secs, 3600);
        assert_eq!(config.monitoring.histogram_capacity, 1000);
        assert_eq!(config.health.probe_timeout_ms, 2000);
    }

    #[test]
    fn test_overlapping_latency_bounds_rejected() {
        let mut config = MonitorConfig::default();
        config.health.latency_warning_ms = 5000;
        config.health.latency_critical_ms = 1000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_prefix_and_url_rejected() {
        let mut config = MonitorConfig::default();
        config.monitoring.export_prefix = "store-front".to_string();
        assert!(config.validate().is_err());

        let mut config = MonitorConfig::default();
        config.alerts.webhook_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_with_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("monitor.toml");
        std::fs::write(
            &path,
            "[monitoring]\nexport_prefix = \"shop_\"\n\n[business]\nlow_stock_threshold = 3\n",
        )
        .unwrap();

        let config = MonitorConfig::from_file(&path).unwrap();
        assert_eq!(config.monitoring.export_prefix, "shop_");
        assert_eq!(config.business.low_stock_threshold, 3);
        assert_eq!(config.monitoring.snapshot_ttl_secs, 300);

        let out = dir.path().join("saved.toml");
        config.save_to_file(&out).unwrap();
        let reloaded = MonitorConfig::from_file(&out).unwrap();
        assert_eq!(reloaded.monitoring.export_prefix, "shop_");
    }
}
