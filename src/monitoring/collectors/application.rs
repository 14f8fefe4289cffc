// Application Metrics Collector
// Runtime facts, configured limits, request identity, plugins, sessions and recent errors

use super::section;
use crate::config::ApplicationConfig;
use crate::monitoring::request::RequestContext;
use crate::monitoring::{MetricBundle, MetricsCollector};
use crate::utils::error::{MonitorError, Result};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;
use walkdir::WalkDir;

lazy_static! {
    static ref LOG_LINE: Regex =
        Regex::new(r"^\[(\d{4}-\d{2}-\d{2}[ T]\d{2}:\d{2}:\d{2})[^\]]*\]\s+[\w-]+\.([A-Z]+):").unwrap();
}

/// Log levels counted as errors
const ERROR_LEVELS: [&str; 4] = ["ERROR", "CRITICAL", "ALERT", "EMERGENCY"];

/// Manifest file expected in each plugin directory
const PLUGIN_MANIFEST: &str = "plugin.json";

#[derive(Debug, Deserialize)]
struct PluginManifest {
    name: Option<String>,
    version: Option<String>,
    #[serde(default = "default_enabled")]
    enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Application-level collector
pub struct ApplicationCollector {
    config: ApplicationConfig,
    request: Option<Arc<RequestContext>>,
}

impl ApplicationCollector {
    pub fn new(config: ApplicationConfig) -> Self {
        Self {
            config,
            request: None,
        }
    }

    /// Report identity fields of this request
    pub fn with_request(mut self, request: Arc<RequestContext>) -> Self {
        self.request = Some(request);
        self
    }

    fn runtime(&self) -> Value {
        json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "pid": std::process::id(),
            "parallelism": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
            "debug_build": cfg!(debug_assertions),
        })
    }

    fn limits(&self) -> Value {
        json!({
            "memory_bytes": self.config.memory_limit_bytes,
            "max_execution_time_secs": self.config.max_execution_time_secs,
            "upload_max_bytes": self.config.upload_max_bytes,
        })
    }

    fn request(&self) -> Value {
        match &self.request {
            Some(request) => json!({
                "interface": "http",
                "method": request.method,
                "uri": request.full_uri(),
                "client_ip": request.client_ip(),
                "user_agent": request.user_agent(),
            }),
            None => json!({ "interface": "cli" }),
        }
    }
}

#[async_trait::async_trait]
impl MetricsCollector for ApplicationCollector {
    fn name(&self) -> &str {
        "application"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        let mut bundle = Map::new();
        bundle.insert("runtime".to_string(), self.runtime());
        bundle.insert("limits".to_string(), self.limits());
        bundle.insert("request".to_string(), self.request());

        let plugins_dir = self.config.plugins_dir.clone();
        let plugins = tokio::task::spawn_blocking(move || plugin_inventory(&plugins_dir))
            .await
            .map_err(|e| MonitorError::collector("application", e.to_string()))
            .and_then(|r| r);
        bundle.insert(
            "plugins".to_string(),
            section("application", "plugins", plugins, json!({"total": 0, "enabled": 0})),
        );

        let session_dir = self.config.session_dir.clone();
        let sessions = tokio::task::spawn_blocking(move || session_stats(&session_dir, SystemTime::now()))
            .await
            .map_err(|e| MonitorError::collector("application", e.to_string()))
            .and_then(|r| r);
        bundle.insert(
            "sessions".to_string(),
            section("application", "sessions", sessions, json!({"count": 0, "size_bytes": 0})),
        );

        let log_path = self.config.error_log_path.clone();
        let tail_lines = self.config.error_log_tail_lines;
        let errors = tokio::task::spawn_blocking(move || read_log_tail(&log_path, tail_lines))
            .await
            .map_err(|e| MonitorError::collector("application", e.to_string()))
            .and_then(|r| r)
            .map(|content| recent_errors(&content, Utc::now(), tail_lines));
        bundle.insert(
            "errors".to_string(),
            section("application", "errors", errors, json!({"recent_count": 0})),
        );

        Ok(bundle)
    }
}

/// Read `plugin.json` from every direct sub-directory of `dir`
pub fn plugin_inventory(dir: &Path) -> Result<Value> {
    if !dir.is_dir() {
        return Err(MonitorError::config(format!(
            "Plugin directory not found: {}",
            dir.display()
        )));
    }

    let mut plugins = Vec::new();
    let mut enabled = 0;
    let mut invalid = 0;

    for entry in WalkDir::new(dir)
        .min_depth(2)
        .max_depth(2)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && e.file_name() == PLUGIN_MANIFEST)
    {
        let folder = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let manifest = std::fs::read_to_string(entry.path())
            .ok()
            .and_then(|content| serde_json::from_str::<PluginManifest>(&content).ok());

        match manifest {
            Some(manifest) => {
                if manifest.enabled {
                    enabled += 1;
                }
                plugins.push(json!({
                    "name": manifest.name.unwrap_or(folder),
                    "version": manifest.version,
                    "enabled": manifest.enabled,
                }));
            }
            None => invalid += 1,
        }
    }

    Ok(json!({
        "total": plugins.len(),
        "enabled": enabled,
        "invalid_manifests": invalid,
        "installed": plugins,
    }))
}

/// Count and size of file-backed sessions, with the age of the oldest
pub fn session_stats(dir: &Path, now: SystemTime) -> Result<Value> {
    if !dir.is_dir() {
        return Err(MonitorError::config(format!(
            "Session directory not found: {}",
            dir.display()
        )));
    }

    let mut count = 0u64;
    let mut size = 0u64;
    let mut oldest_age = 0u64;

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && !e.file_name().to_string_lossy().starts_with('.'))
    {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        count += 1;
        size += metadata.len();
        if let Some(age) = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
        {
            oldest_age = oldest_age.max(age.as_secs());
        }
    }

    Ok(json!({
        "count": count,
        "size_bytes": size,
        "oldest_age_secs": oldest_age,
    }))
}

/// Last `tail_lines` lines of a log, read backwards from the end in blocks.
/// Bytes that are not valid UTF-8 are replaced, not rejected.
pub fn read_log_tail(path: &Path, tail_lines: usize) -> Result<String> {
    const BLOCK: u64 = 8 * 1024;

    let mut file = File::open(path)?;
    let mut pos = file.metadata()?.len();
    let mut tail: Vec<u8> = Vec::new();
    let mut newlines = 0usize;

    // One newline more than needed guarantees the first kept line is whole
    while pos > 0 && newlines <= tail_lines {
        let step = BLOCK.min(pos);
        pos -= step;
        file.seek(SeekFrom::Start(pos))?;

        let mut block = vec![0u8; step as usize];
        file.read_exact(&mut block)?;
        newlines += block.iter().filter(|&&b| b == b'\n').count();
        block.extend_from_slice(&tail);
        tail = block;
    }

    Ok(String::from_utf8_lossy(&tail).into_owned())
}

/// Error-level entries from the last `tail_lines` lines of a log, limited to
/// the 24 hours before `now`
pub fn recent_errors(content: &str, now: DateTime<Utc>, tail_lines: usize) -> Value {
    let cutoff = now - ChronoDuration::hours(24);
    let lines: Vec<&str> = content.lines().collect();
    let start = lines.len().saturating_sub(tail_lines);

    let mut by_level: BTreeMap<String, u64> = BTreeMap::new();
    let mut latest: Option<NaiveDateTime> = None;

    for line in &lines[start..] {
        let Some(captures) = LOG_LINE.captures(line) else {
            continue;
        };
        let level = &captures[2];
        if !ERROR_LEVELS.contains(&level) {
            continue;
        }
        let stamp = captures[1].replace('T', " ");
        let Ok(at) = NaiveDateTime::parse_from_str(&stamp, "%Y-%m-%d %H:%M:%S") else {
            continue;
        };
        if at < cutoff.naive_utc() {
            continue;
        }

        *by_level.entry(level.to_lowercase()).or_insert(0) += 1;
        latest = latest.max(Some(at));
    }

    json!({
        "recent_count": by_level.values().sum::<u64>(),
        "window_hours": 24,
        "by_level": by_level,
        "latest": latest.map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string()),
    })
}
