//! SQL collaborator used by the database and business collectors and the
//! database health probe.
//!
//! The core never owns a driver. The host application hands in a connection
//! or pool that implements [`Database`]; rows come back as JSON objects keyed
//! by column name.

use crate::utils::error::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One result row, keyed by column name
pub type Row = Map<String, Value>;

/// Read-only SQL execution
#[async_trait]
pub trait Database: Send + Sync {
    /// Driver/engine name reported in metrics
    fn driver(&self) -> &str;

    /// Execute a query with positional `?` parameters
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>>;
}

/// Coerce a column value to `f64`. Numeric strings count as numbers since
/// most drivers return DECIMAL and status counters as text.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// First column of the first row
pub fn first_value(rows: &[Row]) -> Option<&Value> {
    rows.first().and_then(|row| row.values().next())
}

/// Named column of the first row as a number, `0.0` when absent
pub fn scalar_f64(rows: &[Row], column: &str) -> f64 {
    rows.first()
        .and_then(|row| row.get(column))
        .and_then(as_f64)
        .unwrap_or(0.0)
}

/// Named column of the first row as an integer, `0` when absent
pub fn scalar_i64(rows: &[Row], column: &str) -> i64 {
    scalar_f64(rows, column).round() as i64
}

/// Fold `SHOW STATUS` / `SHOW VARIABLES` style rows into a name → number map
pub fn status_map(rows: &[Row]) -> HashMap<String, f64> {
    rows.iter()
        .filter_map(|row| {
            let name = row
                .get("Variable_name")
                .or_else(|| row.get("variable_name"))
                .and_then(Value::as_str)?;
            let value = row
                .get("Value")
                .or_else(|| row.get("value"))
                .and_then(as_f64)?;
            Some((name.to_string(), value))
        })
        .collect()
}

/// Round to two decimal places
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_numeric_coercion() {
        assert_eq!(as_f64(&json!(3)), Some(3.0));
        assert_eq!(as_f64(&json!("12.50")), Some(12.5));
        assert_eq!(as_f64(&json!("abc")), None);
        assert_eq!(as_f64(&Value::Null), None);
    }

    #[test]
    fn test_scalars() {
        let rows = vec![row(json!({"total": "1499.995", "orders": 7}))];
        assert_eq!(scalar_f64(&rows, "total"), 1499.995);
        assert_eq!(scalar_i64(&rows, "orders"), 7);
        assert_eq!(scalar_f64(&rows, "missing"), 0.0);
        assert_eq!(scalar_f64(&[], "total"), 0.0);
    }

    #[test]
    fn test_status_map() {
        let rows = vec![
            row(json!({"Variable_name": "Threads_connected", "Value": "12"})),
            row(json!({"Variable_name": "Uptime", "Value": "3600"})),
            row(json!({"Variable_name": "Version_comment", "Value": "MySQL Community"})),
        ];
        let map = status_map(&rows);
        assert_eq!(map.get("Threads_connected"), Some(&12.0));
        assert_eq!(map.get("Uptime"), Some(&3600.0));
        assert!(!map.contains_key("Version_comment"));
    }
}
