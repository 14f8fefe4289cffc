// Text Exposition Exporter
// Flattens the metric snapshot and custom metrics into `name{labels} value` lines

use super::metrics::{numeric, CustomMetric};
use super::MetricBundle;
use serde_json::{Number, Value};
use std::collections::{BTreeMap, HashMap};

/// One exposition line
#[derive(Debug, Clone, PartialEq)]
pub struct ExposedSample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: String,
}

impl ExposedSample {
    fn render(&self) -> String {
        if self.labels.is_empty() {
            return format!("{} {}", self.name, self.value);
        }

        let labels: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}=\"{}\"", k, escape_label_value(v)))
            .collect();
        format!("{}{{{}}} {}", self.name, labels.join(","), self.value)
    }
}

/// Renders metrics in the flat text exposition format
#[derive(Debug, Clone)]
pub struct PrometheusExporter {
    prefix: String,
}

impl PrometheusExporter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: sanitize_name(&prefix.into()),
        }
    }

    /// Collect every numeric leaf as a sample. Snapshot bundles are flattened
    /// with `_` between path segments; custom metrics keep their tags as labels.
    pub fn samples<'a>(
        &self,
        snapshot: &BTreeMap<String, MetricBundle>,
        custom: impl IntoIterator<Item = &'a CustomMetric>,
    ) -> Vec<ExposedSample> {
        let mut samples = Vec::new();

        for (collector, bundle) in snapshot {
            let base = format!("{}{}", self.prefix, sanitize_name(collector));
            flatten_into(&base, bundle, &mut samples);
        }

        for metric in custom {
            let Some(value) = format_value(&metric.value) else {
                continue;
            };
            let labels = metric
                .tags
                .iter()
                .map(|(k, v)| (sanitize_name(k), v.clone()))
                .collect();
            samples.push(ExposedSample {
                name: format!("{}{}", self.prefix, sanitize_name(&metric.name)),
                labels,
                value,
            });
        }

        samples
    }

    pub fn render<'a>(
        &self,
        snapshot: &BTreeMap<String, MetricBundle>,
        custom: impl IntoIterator<Item = &'a CustomMetric>,
    ) -> String {
        let mut output = String::new();
        for sample in self.samples(snapshot, custom) {
            output.push_str(&sample.render());
            output.push('\n');
        }
        output
    }
}

fn flatten_into(base: &str, bundle: &MetricBundle, samples: &mut Vec<ExposedSample>) {
    for (key, value) in bundle {
        let name = format!("{}_{}", base, sanitize_name(key));
        match value {
            Value::Object(nested) => flatten_into(&name, nested, samples),
            other => {
                if let Some(value) = format_value(other) {
                    samples.push(ExposedSample {
                        name,
                        labels: Vec::new(),
                        value,
                    });
                }
            }
        }
    }
}

/// Exposition text for a numeric value; `None` for anything non-numeric
fn format_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => format_number(n),
        Value::String(_) => numeric(value).map(|v| v.to_string()),
        _ => None,
    }
}

fn format_number(n: &Number) -> Option<String> {
    if let Some(i) = n.as_i64() {
        return Some(i.to_string());
    }
    if let Some(u) = n.as_u64() {
        return Some(u.to_string());
    }
    n.as_f64().filter(|v| v.is_finite()).map(|v| v.to_string())
}

/// Restrict a name to `[a-zA-Z0-9_]`, mapping `.` and everything else to `_`
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Sample values keyed by full name (labels ignored); handy for assertions
/// and quick lookups by scrapers embedded in the host application.
pub fn index_by_name(samples: &[ExposedSample]) -> HashMap<&str, &str> {
    samples
        .iter()
        .map(|s| (s.name.as_str(), s.value.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::Tags;
    use serde_json::json;

    fn bundle(value: Value) -> MetricBundle {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_custom_metric_with_labels() {
        let mut tags = Tags::new();
        tags.insert("region".to_string(), "us".to_string());
        let metric = CustomMetric::new("checkout.rate", json!(42), tags);

        let text = PrometheusExporter::new("storefront_").render(&BTreeMap::new(), [&metric]);
        assert!(text.contains("checkout_rate{region=\"us\"} 42"));
        assert_eq!(text, "storefront_checkout_rate{region=\"us\"} 42\n");
    }

    #[test]
    fn test_non_numeric_values_are_skipped() {
        let mut snapshot = BTreeMap::new();
        snapshot.insert(
            "database".to_string(),
            bundle(json!({
                "version": "8.0.36",
                "connection": {"connected": true, "latency_ms": 1.25},
                "threads": "12",
                "tables": [1, 2]
            })),
        );
        let label = CustomMetric::new("deploy.tag", json!("blue"), Tags::new());

        let exporter = PrometheusExporter::new("storefront_");
        let samples = exporter.samples(&snapshot, [&label]);
        let index = index_by_name(&samples);

        assert_eq!(index.len(), 2);
        assert_eq!(index.get("storefront_database_connection_latency_ms"), Some(&"1.25"));
        assert_eq!(index.get("storefront_database_threads"), Some(&"12"));
    }

    #[test]
    fn test_names_are_sanitized() {
        assert_eq!(sanitize_name("cache.hit-ratio %"), "cache_hit_ratio__");
        assert_eq!(sanitize_name("ok_name9"), "ok_name9");
    }

    #[test]
    fn test_label_values_are_escaped() {
        let mut tags = Tags::new();
        tags.insert("path".to_string(), "a\"b\\c".to_string());
        let metric = CustomMetric::new("gauges.depth", json!(1.5), tags);

        let text = PrometheusExporter::new("x_").render(&BTreeMap::new(), [&metric]);
        assert_eq!(text, "x_gauges_depth{path=\"a\\\"b\\\\c\"} 1.5\n");
    }
}
