// Health Checks
// Live probes of database, cache, storage, memory and application wiring, folded into one verdict

use crate::caching::CacheStore;
use crate::config::HealthConfig;
use crate::database::{self, Database};
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{DiskExt, PidExt, ProcessExt, System, SystemExt};
use tracing::{debug, warn};

/// Verdict of a single check or of the whole system
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Warning,
    Critical,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Healthy => "healthy",
            HealthState::Warning => "warning",
            HealthState::Critical => "critical",
        }
    }
}

impl std::fmt::Display for HealthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one check plus whatever diagnostics the probe gathered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: HealthState,
    pub message: String,
    /// Wall time spent in the probe
    #[serde(default)]
    pub duration_ms: f64,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl CheckResult {
    pub fn new(status: HealthState, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            duration_ms: 0.0,
            details: Map::new(),
        }
    }

    pub fn healthy(message: impl Into<String>) -> Self {
        Self::new(HealthState::Healthy, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(HealthState::Warning, message)
    }

    pub fn critical(message: impl Into<String>) -> Self {
        Self::new(HealthState::Critical, message)
    }

    /// Attach a diagnostic field
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.details.insert(key.to_string(), value.into());
        self
    }
}

/// Aggregate health verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub overall: HealthState,
    pub checks: BTreeMap<String, CheckResult>,
    pub timestamp: DateTime<Utc>,
}

impl HealthStatus {
    pub fn from_checks(checks: BTreeMap<String, CheckResult>) -> Self {
        let overall = overall_state(checks.values().map(|c| c.status));
        Self {
            overall,
            checks,
            timestamp: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.overall == HealthState::Healthy
    }
}

/// Worst state in a single pass: the first critical wins outright, any
/// warning downgrades from healthy.
pub fn overall_state(states: impl IntoIterator<Item = HealthState>) -> HealthState {
    let mut overall = HealthState::Healthy;
    for state in states {
        match state {
            HealthState::Critical => return HealthState::Critical,
            HealthState::Warning => overall = HealthState::Warning,
            HealthState::Healthy => {}
        }
    }
    overall
}

/// Classification bounds shared by the built-in checks
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub latency_warning_ms: f64,
    pub latency_critical_ms: f64,
    pub usage_warning_percent: f64,
    pub usage_critical_percent: f64,
}

impl Thresholds {
    /// `< warning` healthy, `warning..=critical` warning, `> critical` critical
    pub fn classify_latency(&self, millis: f64) -> HealthState {
        classify(millis, self.latency_warning_ms, self.latency_critical_ms)
    }

    /// Same banding as latency, over a usage percentage
    pub fn classify_usage(&self, percent: f64) -> HealthState {
        classify(percent, self.usage_warning_percent, self.usage_critical_percent)
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl From<&HealthConfig> for Thresholds {
    fn from(config: &HealthConfig) -> Self {
        Self {
            latency_warning_ms: config.latency_warning_ms as f64,
            latency_critical_ms: config.latency_critical_ms as f64,
            usage_warning_percent: config.usage_warning_percent,
            usage_critical_percent: config.usage_critical_percent,
        }
    }
}

fn classify(value: f64, warning: f64, critical: f64) -> HealthState {
    if value > critical {
        HealthState::Critical
    } else if value >= warning {
        HealthState::Warning
    } else {
        HealthState::Healthy
    }
}

/// A live probe of one subsystem
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Key under which the result appears in [`HealthStatus::checks`]
    fn name(&self) -> &str;

    /// Run the probe. Errors are reported as `critical` by the caller.
    async fn check(&self) -> Result<CheckResult>;
}

/// Run one check under `deadline`, folding errors and timeouts into a
/// `critical` result and stamping the elapsed time.
pub async fn run_check(check: Arc<dyn HealthCheck>, deadline: Duration) -> (String, CheckResult) {
    let name = check.name().to_string();
    let started = Instant::now();

    let mut result = match tokio::time::timeout(deadline, check.check()).await {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            warn!(check = %name, error = %e, "Health check failed");
            CheckResult::critical(e.to_string())
        }
        Err(_) => {
            let e = MonitorError::timeout(format!("health check {}", name), deadline.as_millis() as u64);
            warn!(check = %name, "Health check timed out");
            CheckResult::critical(e.to_string())
        }
    };

    result.duration_ms = elapsed_ms(started);
    debug!(check = %name, status = %result.status, "Health check finished");
    (name, result)
}

fn elapsed_ms(started: Instant) -> f64 {
    database::round2(started.elapsed().as_secs_f64() * 1000.0)
}

/// `SELECT 1` round trip
pub struct DatabaseHealthCheck {
    database: Option<Arc<dyn Database>>,
    thresholds: Thresholds,
}

impl DatabaseHealthCheck {
    pub fn new(database: Option<Arc<dyn Database>>, thresholds: Thresholds) -> Self {
        Self {
            database,
            thresholds,
        }
    }
}

#[async_trait]
impl HealthCheck for DatabaseHealthCheck {
    fn name(&self) -> &str {
        "database"
    }

    async fn check(&self) -> Result<CheckResult> {
        let Some(db) = &self.database else {
            return Ok(CheckResult::warning("Database connection not configured"));
        };

        let started = Instant::now();
        let rows = db.query("SELECT 1", &[]).await?;
        let latency = elapsed_ms(started);

        let answered = database::first_value(&rows).and_then(database::as_f64) == Some(1.0);
        if !answered {
            return Ok(CheckResult::critical("Database returned an unexpected liveness result")
                .with_detail("response_time_ms", latency));
        }

        let status = self.thresholds.classify_latency(latency);
        let message = match status {
            HealthState::Healthy => "Database connection is healthy".to_string(),
            _ => format!("Database responded slowly ({}ms)", latency),
        };

        Ok(CheckResult::new(status, message)
            .with_detail("driver", db.driver())
            .with_detail("response_time_ms", latency))
    }
}

/// Set/get/delete of a throwaway key
pub struct CacheHealthCheck {
    cache: Arc<dyn CacheStore>,
    thresholds: Thresholds,
}

impl CacheHealthCheck {
    pub fn new(cache: Arc<dyn CacheStore>, thresholds: Thresholds) -> Self {
        Self { cache, thresholds }
    }
}

#[async_trait]
impl HealthCheck for CacheHealthCheck {
    fn name(&self) -> &str {
        "cache"
    }

    async fn check(&self) -> Result<CheckResult> {
        let key = format!("health_check:{}", uuid::Uuid::new_v4());
        let expected = json!({"token": key, "at": Utc::now().timestamp()});

        let started = Instant::now();
        self.cache.put(&key, &expected, Duration::from_secs(60)).await?;
        let read_back = self.cache.get(&key).await?;
        self.cache.forget(&key).await?;
        let latency = elapsed_ms(started);

        if read_back.as_ref() != Some(&expected) {
            return Ok(CheckResult::critical("Cache read-back did not match the written value")
                .with_detail("backend", self.cache.name())
                .with_detail("response_time_ms", latency));
        }

        let status = self.thresholds.classify_latency(latency);
        let message = match status {
            HealthState::Healthy => "Cache is working properly".to_string(),
            _ => format!("Cache responded slowly ({}ms)", latency),
        };

        Ok(CheckResult::new(status, message)
            .with_detail("backend", self.cache.name())
            .with_detail("response_time_ms", latency))
    }
}

/// Disk usage percentage of the filesystem holding a path
pub type DiskUsageProbe = Arc<dyn Fn(&Path) -> Option<f64> + Send + Sync>;

/// Disk usage of the longest mount point containing `path`
pub fn system_disk_usage(path: &Path) -> Option<f64> {
    let target = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let mut system = System::new();
    system.refresh_disks_list();
    system.refresh_disks();

    system
        .disks()
        .iter()
        .filter(|disk| target.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .filter(|disk| disk.total_space() > 0)
        .map(|disk| {
            let used = disk.total_space().saturating_sub(disk.available_space());
            database::round2(used as f64 / disk.total_space() as f64 * 100.0)
        })
}

/// Writability of the storage directory plus disk usage
pub struct StorageHealthCheck {
    path: PathBuf,
    thresholds: Thresholds,
    probe: DiskUsageProbe,
}

impl StorageHealthCheck {
    pub fn new(path: impl Into<PathBuf>, thresholds: Thresholds) -> Self {
        Self::with_probe(path, thresholds, Arc::new(system_disk_usage))
    }

    pub fn with_probe(path: impl Into<PathBuf>, thresholds: Thresholds, probe: DiskUsageProbe) -> Self {
        Self {
            path: path.into(),
            thresholds,
            probe,
        }
    }
}

#[async_trait]
impl HealthCheck for StorageHealthCheck {
    fn name(&self) -> &str {
        "storage"
    }

    async fn check(&self) -> Result<CheckResult> {
        let is_dir = tokio::fs::metadata(&self.path)
            .await
            .map(|meta| meta.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Ok(CheckResult::critical("Storage directory does not exist")
                .with_detail("path", self.path.display().to_string()));
        }

        let marker = self.path.join(format!(".health_check_{}", uuid::Uuid::new_v4()));
        tokio::fs::write(&marker, b"ok").await?;
        tokio::fs::remove_file(&marker).await?;

        let probe = Arc::clone(&self.probe);
        let path = self.path.clone();
        let usage = tokio::task::spawn_blocking(move || probe(&path))
            .await
            .map_err(|e| MonitorError::validation(format!("Disk probe failed: {}", e)))?;

        let Some(percent) = usage else {
            return Ok(CheckResult::warning("Storage is writable but disk usage is unknown")
                .with_detail("path", self.path.display().to_string()));
        };

        let status = self.thresholds.classify_usage(percent);
        let message = match status {
            HealthState::Healthy => "Storage is healthy".to_string(),
            HealthState::Warning => format!("Disk usage is high ({}%)", percent),
            HealthState::Critical => format!("Disk usage is critical ({}%)", percent),
        };

        Ok(CheckResult::new(status, message)
            .with_detail("path", self.path.display().to_string())
            .with_detail("disk_usage_percent", percent))
    }
}

/// Resident memory of this process and the total it is measured against
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryReading {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

pub type MemoryProbe = Arc<dyn Fn() -> Option<MemoryReading> + Send + Sync>;

/// Current process RSS and system memory via sysinfo
pub fn process_memory() -> Option<MemoryReading> {
    let pid = sysinfo::get_current_pid().ok()?;
    let mut system = System::new();
    system.refresh_memory();
    system.refresh_process(pid);

    let process = system.process(pid)?;
    debug!(pid = pid.as_u32(), "Sampled process memory");
    Some(MemoryReading {
        used_bytes: process.memory(),
        total_bytes: system.total_memory(),
    })
}

/// Process memory against the configured limit
pub struct MemoryHealthCheck {
    limit_bytes: u64,
    thresholds: Thresholds,
    probe: MemoryProbe,
}

impl MemoryHealthCheck {
    /// `limit_bytes == 0` measures against total system memory
    pub fn new(limit_bytes: u64, thresholds: Thresholds) -> Self {
        Self::with_probe(limit_bytes, thresholds, Arc::new(process_memory))
    }

    pub fn with_probe(limit_bytes: u64, thresholds: Thresholds, probe: MemoryProbe) -> Self {
        Self {
            limit_bytes,
            thresholds,
            probe,
        }
    }
}

#[async_trait]
impl HealthCheck for MemoryHealthCheck {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check(&self) -> Result<CheckResult> {
        let probe = Arc::clone(&self.probe);
        let reading = tokio::task::spawn_blocking(move || probe())
            .await
            .map_err(|e| MonitorError::validation(format!("Memory probe failed: {}", e)))?
            .ok_or_else(|| MonitorError::validation("Process memory is unavailable"))?;

        let limit = if self.limit_bytes > 0 {
            self.limit_bytes
        } else {
            reading.total_bytes
        };
        if limit == 0 {
            return Ok(CheckResult::warning("Memory limit is unknown")
                .with_detail("usage_bytes", reading.used_bytes));
        }

        let percent = database::round2(reading.used_bytes as f64 / limit as f64 * 100.0);
        let status = self.thresholds.classify_usage(percent);
        let message = match status {
            HealthState::Healthy => "Memory usage is normal".to_string(),
            HealthState::Warning => format!("Memory usage is high ({}%)", percent),
            HealthState::Critical => format!("Memory usage is critical ({}%)", percent),
        };

        Ok(CheckResult::new(status, message)
            .with_detail("usage_bytes", reading.used_bytes)
            .with_detail("limit_bytes", limit)
            .with_detail("usage_percent", percent))
    }
}

/// Expected collectors registered and collaborators wired
pub struct ApplicationHealthCheck {
    expected_collectors: Vec<String>,
    registered_collectors: Vec<String>,
    services: BTreeMap<String, bool>,
}

impl ApplicationHealthCheck {
    pub fn new(
        expected_collectors: Vec<String>,
        registered_collectors: Vec<String>,
        services: BTreeMap<String, bool>,
    ) -> Self {
        Self {
            expected_collectors,
            registered_collectors,
            services,
        }
    }
}

#[async_trait]
impl HealthCheck for ApplicationHealthCheck {
    fn name(&self) -> &str {
        "application"
    }

    async fn check(&self) -> Result<CheckResult> {
        let missing_collectors: Vec<&String> = self
            .expected_collectors
            .iter()
            .filter(|name| !self.registered_collectors.contains(name))
            .collect();
        let missing_services: Vec<&String> = self
            .services
            .iter()
            .filter(|(_, available)| !**available)
            .map(|(name, _)| name)
            .collect();

        let result = if !missing_collectors.is_empty() {
            CheckResult::critical(format!(
                "Missing collectors: {}",
                missing_collectors
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        } else if !missing_services.is_empty() {
            CheckResult::warning(format!(
                "Services not configured: {}",
                missing_services
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ))
        } else {
            CheckResult::healthy("Application is running normally")
        };

        Ok(result
            .with_detail("collectors", json!(self.registered_collectors))
            .with_detail("services", json!(self.services)))
    }
}
