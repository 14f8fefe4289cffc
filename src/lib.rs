//! # Storefront Monitor
//!
//! Monitoring and health aggregation core for a storefront platform.
//!
//! ## Features
//!
//! - **Pluggable collectors**: system, application, database, cache, HTTP and
//!   business metrics, each isolated so one failing source never hides the rest
//! - **Custom metrics**: counters, gauges, timings and bounded histograms with
//!   dotted-path lookup, mirrored to a shared cache
//! - **Alerting**: glob and threshold rules evaluated on every recorded metric,
//!   delivered to log, email, Slack or webhook channels
//! - **Health checks**: concurrent live probes folded into one
//!   `healthy`/`warning`/`critical` verdict
//! - **Text exposition**: flat `name{labels} value` output for scrapers
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_monitor::monitoring::collectors::SystemCollector;
//! use storefront_monitor::monitoring::metrics::Tags;
//! use storefront_monitor::MonitoringManager;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     storefront_monitor::init()?;
//!
//!     let manager = MonitoringManager::builder()
//!         .collector(Arc::new(SystemCollector::new()))
//!         .build();
//!
//!     manager.increment("orders.placed", Tags::new()).await;
//!     let snapshot = manager.collect_metrics().await;
//!     println!("{}", serde_json::to_string_pretty(&snapshot)?);
//!
//!     let health = manager.check_health().await;
//!     println!("overall: {}", health.overall);
//!     Ok(())
//! }
//! ```

pub mod caching;
pub mod config;
pub mod database;
pub mod events;
pub mod monitoring;
pub mod utils;

// Re-export main types for convenience
pub use config::MonitorConfig;
pub use monitoring::{
    CollectionStats, MetricBundle, MetricsCollector, MonitoringManager, MonitoringManagerBuilder,
};
pub use utils::error::{MonitorError, Result};

// Re-export collaborator traits
pub use caching::CacheStore;
pub use database::Database;
pub use events::EventDispatcher;

// Re-export alerting and health types
pub use monitoring::alerts::{Alert, AlertRule, AlertSeverity, ComparisonOperator, NotificationChannel};
pub use monitoring::health::{CheckResult, HealthCheck, HealthState, HealthStatus};

/// Initialize the monitoring core with default logging
pub fn init() -> Result<()> {
    utils::logging::init_logging()?;
    Ok(())
}

/// Initialize the monitoring core with a specific log level
pub fn init_with_logging(level: tracing::Level) -> Result<()> {
    utils::logging::init_logging_with_level(level)?;
    Ok(())
}
