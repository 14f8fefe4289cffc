// Metrics Collectors
// One read-only probe per external source, each producing a named bundle

use crate::utils::error::Result;
use serde_json::{Map, Value};
use tracing::warn;

pub mod application;
pub mod business;
pub mod cache;
pub mod database;
pub mod http;
pub mod system;

pub use application::ApplicationCollector;
pub use business::BusinessCollector;
pub use cache::CacheCollector;
pub use database::DatabaseCollector;
pub use http::HttpCollector;
pub use system::SystemCollector;

/// Resolve one sub-probe: its value on success, otherwise `fallback` with
/// the failure text under `"error"`
pub(crate) fn section(collector: &str, name: &str, result: Result<Value>, fallback: Value) -> Value {
    match result {
        Ok(value) => value,
        Err(e) => {
            warn!(collector = %collector, section = %name, error = %e, "Metric probe degraded");
            with_error(fallback, e.to_string())
        }
    }
}

/// Attach an `"error"` field, wrapping non-object values
pub(crate) fn with_error(value: Value, message: String) -> Value {
    let mut map = match value {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    };
    map.insert("error".to_string(), Value::String(message));
    Value::Object(map)
}
