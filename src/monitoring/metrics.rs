// Custom Metrics Storage
// Counters, gauges, timings and bounded histograms recorded ad hoc by application code

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// Tag set attached to a custom metric; ordered so label output is stable
pub type Tags = BTreeMap<String, String>;

/// Namespace prefixes layered onto custom metric names
pub const COUNTERS: &str = "counters";
pub const GAUGES: &str = "gauges";
pub const TIMINGS: &str = "timings";
pub const HISTOGRAMS: &str = "histograms";

/// A recorded custom metric. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomMetric {
    pub name: String,
    pub value: Value,
    pub tags: Tags,
    /// Unix seconds with fractional part
    pub timestamp: f64,
}

impl CustomMetric {
    pub fn new(name: impl Into<String>, value: Value, tags: Tags) -> Self {
        Self {
            name: name.into(),
            value,
            tags,
            timestamp: unix_timestamp(),
        }
    }

    /// Numeric view of the value, if it has one
    pub fn numeric_value(&self) -> Option<f64> {
        numeric(&self.value)
    }

    /// Cache key that identifies this metric name + tag set across processes
    pub fn cache_key(&self) -> String {
        let tags = serde_json::to_string(&self.tags).unwrap_or_default();
        let digest = md5::compute(format!("{}{}", self.name, tags).as_bytes());
        format!("metrics.custom.{:x}", digest)
    }
}

/// One histogram observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSample {
    pub value: f64,
    pub timestamp: f64,
    pub tags: Tags,
}

/// Fixed-capacity FIFO of histogram samples
#[derive(Debug, Clone)]
pub struct Histogram {
    samples: VecDeque<HistogramSample>,
    capacity: usize,
}

impl Histogram {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
        }
    }

    /// Append a sample, evicting the oldest once full
    pub fn push(&mut self, sample: HistogramSample) {
        while self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &HistogramSample> {
        self.samples.iter()
    }

    pub fn to_value(&self) -> Value {
        Value::Array(
            self.samples
                .iter()
                .map(|s| serde_json::to_value(s).unwrap_or(Value::Null))
                .collect(),
        )
    }
}

/// In-process custom metric state: the nested value tree read by dotted
/// lookups, the latest record per name for export, and histogram buffers.
#[derive(Debug, Clone)]
pub struct CustomMetrics {
    tree: Map<String, Value>,
    records: BTreeMap<String, CustomMetric>,
    histograms: HashMap<String, Histogram>,
    histogram_capacity: usize,
}

impl CustomMetrics {
    pub fn new(histogram_capacity: usize) -> Self {
        Self {
            tree: Map::new(),
            records: BTreeMap::new(),
            histograms: HashMap::new(),
            histogram_capacity,
        }
    }

    /// Store a metric, overwriting any earlier value under the same name.
    /// A name that collides with an existing metric's path (`orders` already
    /// holding a value when `orders.placed` arrives, or the reverse) is
    /// refused and `false` is returned.
    #[must_use]
    pub fn record(&mut self, metric: CustomMetric) -> bool {
        if !set_path(&mut self.tree, &metric.name, metric.value.clone()) {
            return false;
        }
        self.records.insert(metric.name.clone(), metric);
        true
    }

    /// Append a histogram sample and return the retained series
    pub fn push_sample(&mut self, name: &str, sample: HistogramSample) -> Value {
        let capacity = self.histogram_capacity;
        let histogram = self
            .histograms
            .entry(name.to_string())
            .or_insert_with(|| Histogram::new(capacity));
        histogram.push(sample);
        histogram.to_value()
    }

    pub fn histogram(&self, name: &str) -> Option<&Histogram> {
        self.histograms.get(name)
    }

    /// Dotted lookup relative to the custom bucket
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_path(&self.tree, path)
    }

    pub fn records(&self) -> impl Iterator<Item = &CustomMetric> {
        self.records.values()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The custom bucket as it appears in the snapshot
    pub fn tree(&self) -> &Map<String, Value> {
        &self.tree
    }
}

/// Current time as fractional unix seconds
pub fn unix_timestamp() -> f64 {
    let now = chrono::Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1_000_000.0
}

/// Numeric view of a JSON value; numeric strings count, booleans do not
pub fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
        _ => None,
    }
}

/// Walk a dotted path through nested objects
pub fn get_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    let mut current = root.get(first)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Set a value at a dotted path, creating missing intermediate objects.
/// Returns `false` and leaves the tree untouched when the path would cut
/// through an existing scalar, or would overwrite a subtree with a
/// non-object value.
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> bool {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return false;
    };

    // Check before creating anything so a rejected path leaves no empty nodes
    let mut probe = Some(&*root);
    for segment in &segments {
        probe = match probe.and_then(|node| node.get(*segment)) {
            Some(Value::Object(map)) => Some(map),
            Some(_) => return false,
            None => None,
        };
    }
    if let Some(Value::Object(_)) = probe.and_then(|node| node.get(leaf)) {
        if !value.is_object() {
            return false;
        }
    }

    let mut current = root;
    for segment in segments {
        let entry = current
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        current = match entry.as_object_mut() {
            Some(map) => map,
            None => return false,
        };
    }
    current.insert(leaf.to_string(), value);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample(value: f64) -> HistogramSample {
        HistogramSample {
            value,
            timestamp: unix_timestamp(),
            tags: Tags::new(),
        }
    }

    #[test]
    fn test_histogram_keeps_most_recent() {
        let mut histogram = Histogram::new(1000);
        for i in 0..1500 {
            histogram.push(sample(i as f64));
        }
        assert_eq!(histogram.len(), 1000);
        let values: Vec<f64> = histogram.samples().map(|s| s.value).collect();
        assert_eq!(values.first(), Some(&500.0));
        assert_eq!(values.last(), Some(&1499.0));
    }

    #[test]
    fn test_set_and_get_path() {
        let mut root = Map::new();
        set_path(&mut root, "counters.hits", json!(3));
        set_path(&mut root, "counters.misses", json!(1));
        set_path(&mut root, "checkout.rate", json!(42));

        assert_eq!(get_path(&root, "counters.hits"), Some(&json!(3)));
        assert_eq!(get_path(&root, "counters"), Some(&json!({"hits": 3, "misses": 1})));
        assert_eq!(get_path(&root, "counters.hits.deeper"), None);
        assert_eq!(get_path(&root, "absent"), None);
    }

    #[test]
    fn test_set_path_refuses_conflicting_paths() {
        let mut root = Map::new();
        assert!(set_path(&mut root, "counters.orders", json!(4)));
        assert!(!set_path(&mut root, "counters.orders.placed", json!(2)));
        assert_eq!(get_path(&root, "counters.orders"), Some(&json!(4)));

        assert!(set_path(&mut root, "counters.refunds.card", json!(1)));
        assert!(!set_path(&mut root, "counters.refunds", json!(9)));
        assert_eq!(get_path(&root, "counters.refunds.card"), Some(&json!(1)));

        assert!(set_path(&mut root, "counters.orders", json!(5)));
        assert_eq!(get_path(&root, "counters.orders"), Some(&json!(5)));
    }

    #[test]
    fn test_rejected_record_keeps_tree_and_records_in_step() {
        let mut custom = CustomMetrics::new(10);
        assert!(custom.record(CustomMetric::new("counters.orders", json!(3), Tags::new())));
        assert!(!custom.record(CustomMetric::new("counters.orders.placed", json!(1), Tags::new())));

        let names: Vec<&str> = custom.records().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["counters.orders"]);
        assert_eq!(custom.get("counters.orders"), Some(&json!(3)));
    }

    #[test]
    fn test_cache_key_depends_on_tags() {
        let mut tags = Tags::new();
        let plain = CustomMetric::new("orders.count", json!(1), tags.clone());
        tags.insert("region".to_string(), "us".to_string());
        let tagged = CustomMetric::new("orders.count", json!(1), tags);

        assert!(plain.cache_key().starts_with("metrics.custom."));
        assert_ne!(plain.cache_key(), tagged.cache_key());
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(numeric(&json!(42)), Some(42.0));
        assert_eq!(numeric(&json!("1.5")), Some(1.5));
        assert_eq!(numeric(&json!("fast")), None);
        assert_eq!(numeric(&json!(true)), None);
        assert_eq!(numeric(&json!([1, 2])), None);
    }
}
