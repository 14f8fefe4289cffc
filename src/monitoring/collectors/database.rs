// Database Metrics Collector
// Connectivity, server status counters, table and index rankings and replication state

use super::{section, with_error};
use crate::database::{self, round2, status_map, Database, Row};
use crate::monitoring::{MetricBundle, MetricsCollector};
use crate::utils::error::Result;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// SQL engine collector. The connection is injected, never opened here.
pub struct DatabaseCollector {
    database: Arc<dyn Database>,
    ranking_limit: u32,
}

impl DatabaseCollector {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self {
            database,
            ranking_limit: 10,
        }
    }

    pub fn with_ranking_limit(mut self, limit: u32) -> Self {
        self.ranking_limit = limit.max(1);
        self
    }

    async fn connection(&self) -> Result<Value> {
        let started = Instant::now();
        self.database.query("SELECT 1", &[]).await?;
        Ok(json!({
            "connected": true,
            "driver": self.database.driver(),
            "latency_ms": round2(started.elapsed().as_secs_f64() * 1000.0),
        }))
    }

    async fn version(&self) -> Result<Value> {
        let rows = self.database.query("SELECT VERSION() AS version", &[]).await?;
        Ok(database::first_value(&rows).cloned().unwrap_or(Value::Null))
    }

    async fn global_status(&self) -> Result<HashMap<String, f64>> {
        let rows = self.database.query("SHOW GLOBAL STATUS", &[]).await?;
        Ok(status_map(&rows))
    }

    async fn connections(&self, status: &HashMap<String, f64>) -> Result<Value> {
        let rows = self
            .database
            .query("SHOW VARIABLES LIKE 'max_connections'", &[])
            .await?;
        let max = status_map(&rows).get("max_connections").copied().unwrap_or(0.0);
        let active = stat(status, "Threads_connected");

        Ok(json!({
            "active": active,
            "running": stat(status, "Threads_running"),
            "max": max,
            "max_used": stat(status, "Max_used_connections"),
            "usage_percent": ratio_percent(active, max),
            "aborted": stat(status, "Aborted_connects"),
        }))
    }

    async fn tables(&self) -> Result<Value> {
        let rows = self
            .database
            .query(
                "SELECT table_name AS name, table_rows AS row_count, \
                 ROUND((data_length + index_length) / 1024 / 1024, 2) AS size_mb \
                 FROM information_schema.tables WHERE table_schema = DATABASE() \
                 ORDER BY (data_length + index_length) DESC LIMIT ?",
                &[json!(self.ranking_limit)],
            )
            .await?;
        Ok(ranking(&rows))
    }

    async fn indexes(&self) -> Result<Value> {
        let rows = self
            .database
            .query(
                "SELECT table_name AS name, ROUND(index_length / 1024 / 1024, 2) AS index_mb \
                 FROM information_schema.tables WHERE table_schema = DATABASE() \
                 ORDER BY index_length DESC LIMIT ?",
                &[json!(self.ranking_limit)],
            )
            .await?;
        Ok(ranking(&rows))
    }

    async fn replication(&self) -> Result<Value> {
        let rows = self.database.query("SHOW SLAVE STATUS", &[]).await?;
        Ok(replication_state(rows.first()))
    }
}

#[async_trait::async_trait]
impl MetricsCollector for DatabaseCollector {
    fn name(&self) -> &str {
        "database"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        let mut bundle = Map::new();

        bundle.insert(
            "connection".to_string(),
            section(
                "database",
                "connection",
                self.connection().await,
                json!({"connected": false, "driver": self.database.driver()}),
            ),
        );
        bundle.insert(
            "version".to_string(),
            section("database", "version", self.version().await, Value::Null),
        );

        match self.global_status().await {
            Ok(status) => {
                bundle.insert(
                    "connections".to_string(),
                    section(
                        "database",
                        "connections",
                        self.connections(&status).await,
                        json!({"active": 0, "max": 0}),
                    ),
                );
                bundle.insert("performance".to_string(), performance(&status));
                bundle.insert("locks".to_string(), locks(&status));
            }
            Err(e) => {
                warn!(collector = "database", section = "status", error = %e, "Metric probe degraded");
                let message = e.to_string();
                for name in ["connections", "performance", "locks"] {
                    bundle.insert(name.to_string(), with_error(json!({}), message.clone()));
                }
            }
        }

        bundle.insert(
            "tables".to_string(),
            section("database", "tables", self.tables().await, json!({"top": []})),
        );
        bundle.insert(
            "indexes".to_string(),
            section("database", "indexes", self.indexes().await, json!({"top": []})),
        );
        bundle.insert(
            "replication".to_string(),
            section(
                "database",
                "replication",
                self.replication().await,
                json!({"role": "unknown"}),
            ),
        );

        Ok(bundle)
    }
}

fn stat(status: &HashMap<String, f64>, name: &str) -> f64 {
    status.get(name).copied().unwrap_or(0.0)
}

fn ratio_percent(part: f64, whole: f64) -> f64 {
    if whole <= 0.0 {
        0.0
    } else {
        round2(part / whole * 100.0)
    }
}

/// Buffer-pool hit ratio, throughput and transaction counters
pub fn performance(status: &HashMap<String, f64>) -> Value {
    let read_requests = stat(status, "Innodb_buffer_pool_read_requests");
    let disk_reads = stat(status, "Innodb_buffer_pool_reads");
    let hit_ratio = if read_requests > 0.0 {
        round2((1.0 - disk_reads / read_requests) * 100.0)
    } else {
        0.0
    };

    let uptime = stat(status, "Uptime");
    let questions = stat(status, "Questions");
    let queries_per_second = if uptime > 0.0 {
        round2(questions / uptime)
    } else {
        0.0
    };

    json!({
        "buffer_pool_hit_ratio": hit_ratio,
        "queries_per_second": queries_per_second,
        "questions": questions,
        "slow_queries": stat(status, "Slow_queries"),
        "commits": stat(status, "Com_commit"),
        "rollbacks": stat(status, "Com_rollback"),
        "deadlocks": stat(status, "Innodb_deadlocks"),
        "uptime_seconds": uptime,
    })
}

/// Row and table lock contention
pub fn locks(status: &HashMap<String, f64>) -> Value {
    let waited = stat(status, "Table_locks_waited");
    let immediate = stat(status, "Table_locks_immediate");

    json!({
        "row_lock_waits": stat(status, "Innodb_row_lock_waits"),
        "row_lock_time_avg_ms": stat(status, "Innodb_row_lock_time_avg"),
        "row_lock_current_waits": stat(status, "Innodb_row_lock_current_waits"),
        "table_locks_waited": waited,
        "table_locks_immediate": immediate,
        "table_lock_contention_percent": ratio_percent(waited, waited + immediate),
    })
}

fn ranking(rows: &[Row]) -> Value {
    json!({ "top": rows })
}

/// Role and lag from the first `SHOW SLAVE STATUS` row, if any
pub fn replication_state(row: Option<&Row>) -> Value {
    let Some(row) = row else {
        return json!({ "role": "primary" });
    };

    let running = |column: &str| row.get(column).and_then(Value::as_str) == Some("Yes");
    let lag = row
        .get("Seconds_Behind_Master")
        .and_then(database::as_f64);

    json!({
        "role": "replica",
        "io_running": running("Slave_IO_Running"),
        "sql_running": running("Slave_SQL_Running"),
        "lag_seconds": lag,
        "master_host": row.get("Master_Host"),
    })
}
