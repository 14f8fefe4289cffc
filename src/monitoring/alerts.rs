// Alert Rules and Notification Channels
// Glob + threshold rules evaluated per recorded metric, delivered through named channels

use super::metrics::{numeric, CustomMetric};
use crate::config::AlertChannelConfig;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Alert severity levels. Names outside the known three are kept as given
/// and treated like `warning` when choosing a log level or colour.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AlertSeverity {
    Info,
    #[default]
    Warning,
    Critical,
    Other(String),
}

impl AlertSeverity {
    pub fn as_str(&self) -> &str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Other(name) => name,
        }
    }
}

impl From<String> for AlertSeverity {
    fn from(name: String) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "info" => AlertSeverity::Info,
            "warning" => AlertSeverity::Warning,
            "critical" => AlertSeverity::Critical,
            _ => AlertSeverity::Other(name),
        }
    }
}

impl From<&str> for AlertSeverity {
    fn from(name: &str) -> Self {
        AlertSeverity::from(name.to_string())
    }
}

impl From<AlertSeverity> for String {
    fn from(severity: AlertSeverity) -> Self {
        match severity {
            AlertSeverity::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

/// Comparison operators for alert rules
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[default]
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::GreaterThanOrEqual => value >= threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::LessThanOrEqual => value <= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterThanOrEqual => ">=",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessThanOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
        }
    }
}

/// Alert rule configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Rule name
    pub name: String,
    /// Glob matched against the metric name; absent matches every metric
    #[serde(default)]
    pub metric_pattern: Option<String>,
    /// Threshold value; absent matches every value
    #[serde(default)]
    pub threshold: Option<f64>,
    /// Comparison operator
    #[serde(default)]
    pub operator: ComparisonOperator,
    /// Alert severity
    #[serde(default)]
    pub severity: AlertSeverity,
    /// Channel names the alert is delivered to, in order
    #[serde(default)]
    pub channels: Vec<String>,
}

impl AlertRule {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric_pattern: None,
            threshold: None,
            operator: ComparisonOperator::default(),
            severity: AlertSeverity::default(),
            channels: vec!["log".to_string()],
        }
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.metric_pattern = Some(pattern.into());
        self
    }

    pub fn threshold(mut self, operator: ComparisonOperator, threshold: f64) -> Self {
        self.operator = operator;
        self.threshold = Some(threshold);
        self
    }

    pub fn severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn channels<I, S>(mut self, channels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.channels = channels.into_iter().map(Into::into).collect();
        self
    }

    /// Whether a recorded metric triggers this rule
    pub fn matches(&self, name: &str, value: &Value) -> bool {
        if let Some(pattern) = &self.metric_pattern {
            let matched = glob::Pattern::new(pattern)
                .map(|p| p.matches(name))
                .unwrap_or_else(|_| pattern == name);
            if !matched {
                return false;
            }
        }

        match self.threshold {
            None => true,
            Some(threshold) => match numeric(value) {
                Some(v) => self.operator.compare(v, threshold),
                None => false,
            },
        }
    }

    /// Build the alert raised when `metric` matched this rule
    pub fn alert_for(&self, metric: &CustomMetric) -> Alert {
        let message = match self.threshold {
            Some(threshold) => format!(
                "Metric {} is {} ({} {})",
                metric.name,
                metric.value,
                self.operator.symbol(),
                threshold
            ),
            None => format!("Metric {} recorded with value {}", metric.name, metric.value),
        };

        let mut context = Map::new();
        context.insert("metric".to_string(), json!(metric.name));
        context.insert("value".to_string(), metric.value.clone());
        context.insert("tags".to_string(), json!(metric.tags));
        context.insert("rule".to_string(), json!(self));

        Alert {
            name: self.name.clone(),
            severity: self.severity.clone(),
            message,
            context,
            timestamp: Utc::now(),
        }
    }
}

/// An alert raised by a rule. Transient: delivered and kept in history only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub name: String,
    pub severity: AlertSeverity,
    pub message: String,
    pub context: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

/// Trait for notification channels
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Channel name referenced by `AlertRule::channels`
    fn name(&self) -> &str;

    /// Send alert notification
    async fn send_alert(&self, alert: &Alert) -> Result<()>;
}

/// Deliver `alert` to each named channel in order. A failing or unknown
/// channel is logged and does not stop delivery to the rest. Returns the
/// number of successful deliveries.
pub async fn deliver(
    alert: &Alert,
    channel_names: &[String],
    channels: &[Arc<dyn NotificationChannel>],
) -> usize {
    let mut delivered = 0;

    for channel_name in channel_names {
        let Some(channel) = channels.iter().find(|c| c.name() == channel_name) else {
            warn!(channel = %channel_name, alert = %alert.name, "Alert channel not registered");
            continue;
        };

        match channel.send_alert(alert).await {
            Ok(()) => delivered += 1,
            Err(e) => {
                error!(channel = %channel_name, alert = %alert.name, "Failed to send alert: {}", e);
            }
        }
    }

    delivered
}

/// Writes alerts to the log at a level matching their severity
#[derive(Debug, Default)]
pub struct LogChannel;

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        let context = Value::Object(alert.context.clone());
        match alert.severity {
            AlertSeverity::Critical => {
                error!(alert = %alert.name, context = %context, "{}", alert.message)
            }
            AlertSeverity::Warning | AlertSeverity::Other(_) => {
                warn!(alert = %alert.name, context = %context, "{}", alert.message)
            }
            AlertSeverity::Info => {
                info!(alert = %alert.name, context = %context, "{}", alert.message)
            }
        }
        Ok(())
    }
}

/// Outbound mail collaborator used by [`EmailChannel`]
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<()>;
}

/// Emails every configured recipient
pub struct EmailChannel {
    recipients: Vec<String>,
    mailer: Arc<dyn Mailer>,
}

impl EmailChannel {
    pub fn new(recipients: Vec<String>, mailer: Arc<dyn Mailer>) -> Self {
        Self { recipients, mailer }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &str {
        "email"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(MonitorError::channel("email", "no recipients configured"));
        }

        let subject = format!("[{}] {}", alert.severity.as_str().to_uppercase(), alert.name);
        let body = format!(
            "{}\n\nTriggered at {}\n\n{}",
            alert.message,
            alert.timestamp.to_rfc3339(),
            serde_json::to_string_pretty(&alert.context)?
        );

        let mut failures = Vec::new();
        for recipient in &self.recipients {
            if let Err(e) = self.mailer.send(recipient, &subject, &body).await {
                failures.push(format!("{}: {}", recipient, e));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(MonitorError::channel("email", failures.join("; ")))
        }
    }
}

/// Posts to a Slack incoming webhook
pub struct SlackChannel {
    webhook_url: String,
    client: reqwest::Client,
}

impl SlackChannel {
    pub fn new(webhook_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            webhook_url: webhook_url.into(),
            client,
        })
    }

    fn payload(alert: &Alert) -> Value {
        let color = match alert.severity {
            AlertSeverity::Critical => "danger",
            AlertSeverity::Warning | AlertSeverity::Other(_) => "warning",
            AlertSeverity::Info => "good",
        };

        let fields: Vec<Value> = alert
            .context
            .iter()
            .filter(|(key, _)| key.as_str() != "rule")
            .map(|(key, value)| json!({"title": key, "value": value.to_string(), "short": true}))
            .collect();

        json!({
            "text": format!("Alert: {}", alert.name),
            "attachments": [{
                "color": color,
                "text": alert.message,
                "fields": fields,
                "ts": alert.timestamp.timestamp(),
            }],
        })
    }
}

#[async_trait]
impl NotificationChannel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(alert))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::channel(
                "slack",
                format!("webhook returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Posts the alert as JSON to an arbitrary endpoint
pub struct WebhookChannel {
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn send_alert(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(&json!({
                "alert": alert.name,
                "severity": alert.severity,
                "message": alert.message,
                "context": alert.context,
                "timestamp": alert.timestamp.to_rfc3339(),
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MonitorError::channel(
                "webhook",
                format!("endpoint returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Build the HTTP channels named in the config. Email needs a host-supplied
/// [`Mailer`], so it is only added when one is passed in.
pub fn channels_from_config(
    config: &AlertChannelConfig,
    mailer: Option<Arc<dyn Mailer>>,
) -> Result<Vec<Arc<dyn NotificationChannel>>> {
    let timeout = Duration::from_secs(config.channel_timeout_secs.max(1));
    let mut channels: Vec<Arc<dyn NotificationChannel>> = Vec::new();

    if let Some(url) = &config.slack_webhook_url {
        validate_endpoint("slack", url)?;
        channels.push(Arc::new(SlackChannel::new(url.clone(), timeout)?));
    }
    if let Some(url) = &config.webhook_url {
        validate_endpoint("webhook", url)?;
        channels.push(Arc::new(WebhookChannel::new(url.clone(), timeout)?));
    }

    match mailer {
        Some(mailer) if !config.email_recipients.is_empty() => {
            channels.push(Arc::new(EmailChannel::new(config.email_recipients.clone(), mailer)));
        }
        None if !config.email_recipients.is_empty() => {
            warn!(
                recipients = config.email_recipients.len(),
                "Email recipients configured without a mailer; email channel disabled"
            );
        }
        _ => {}
    }

    info!(channels = channels.len(), "Alert channels configured");
    Ok(channels)
}

fn validate_endpoint(channel: &str, raw: &str) -> Result<()> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| MonitorError::config(format!("Invalid {} URL: {}", channel, e)))?;
    match parsed.scheme() {
        "http" | "https" => Ok(()),
        scheme => Err(MonitorError::config(format!(
            "Unsupported {} URL scheme: {}",
            channel, scheme
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::metrics::Tags;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn orders_rule() -> AlertRule {
        AlertRule::new("orders_spike")
            .pattern("orders.*")
            .threshold(ComparisonOperator::GreaterThan, 100.0)
    }

    #[test]
    fn test_rule_matches_pattern_and_threshold() {
        let rule = orders_rule();
        assert!(rule.matches("orders.count", &json!(150)));
        assert!(!rule.matches("orders.count", &json!(50)));
        assert!(!rule.matches("users.count", &json!(150)));
    }

    #[test]
    fn test_rule_without_pattern_or_threshold() {
        let any = AlertRule::new("everything");
        assert!(any.matches("anything.at.all", &json!("text")));

        let threshold_only =
            AlertRule::new("low").threshold(ComparisonOperator::LessThanOrEqual, 5.0);
        assert!(threshold_only.matches("stock.widget", &json!(5)));
        assert!(!threshold_only.matches("stock.widget", &json!(6)));
        assert!(!threshold_only.matches("stock.widget", &json!("n/a")));
    }

    #[test]
    fn test_operators() {
        assert!(ComparisonOperator::GreaterThanOrEqual.compare(1.0, 1.0));
        assert!(ComparisonOperator::LessThan.compare(0.5, 1.0));
        assert!(ComparisonOperator::Equal.compare(2.0, 2.0));
        assert!(ComparisonOperator::NotEqual.compare(2.0, 3.0));
        assert!(!ComparisonOperator::NotEqual.compare(3.0, 3.0));
    }

    #[test]
    fn test_rule_json_schema() {
        let rule: AlertRule = serde_json::from_value(json!({
            "name": "slow_checkout",
            "metric_pattern": "timings.checkout*",
            "threshold": 2000,
            "operator": ">=",
            "severity": "critical",
            "channels": ["log", "slack"]
        }))
        .unwrap();

        assert_eq!(rule.operator, ComparisonOperator::GreaterThanOrEqual);
        assert_eq!(rule.severity, AlertSeverity::Critical);
        assert_eq!(rule.channels, vec!["log", "slack"]);
        assert_eq!(serde_json::to_value(&rule).unwrap()["operator"], ">=");

        let custom: AlertRule =
            serde_json::from_value(json!({"name": "pager", "severity": "high"})).unwrap();
        assert_eq!(custom.severity, AlertSeverity::Other("high".to_string()));
        assert_eq!(serde_json::to_value(&custom).unwrap()["severity"], "high");
        assert_eq!(custom.severity.as_str(), "high");

        let minimal: AlertRule = serde_json::from_value(json!({"name": "any"})).unwrap();
        assert_eq!(minimal.operator, ComparisonOperator::GreaterThan);
        assert!(minimal.channels.is_empty());
    }

    #[test]
    fn test_alert_context() {
        let metric = CustomMetric::new("orders.count", json!(150), Tags::new());
        let alert = orders_rule().alert_for(&metric);
        assert_eq!(alert.name, "orders_spike");
        assert_eq!(alert.context["value"], json!(150));
        assert!(alert.message.contains("orders.count"));
    }

    struct FailingChannel;

    #[async_trait]
    impl NotificationChannel for FailingChannel {
        fn name(&self) -> &str {
            "slack"
        }

        async fn send_alert(&self, _alert: &Alert) -> Result<()> {
            Err(MonitorError::channel("slack", "unreachable"))
        }
    }

    struct CountingChannel(Arc<AtomicUsize>);

    #[async_trait]
    impl NotificationChannel for CountingChannel {
        fn name(&self) -> &str {
            "webhook"
        }

        async fn send_alert(&self, _alert: &Alert) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_channel_failure_does_not_stop_delivery() {
        let count = Arc::new(AtomicUsize::new(0));
        let channels: Vec<Arc<dyn NotificationChannel>> = vec![
            Arc::new(FailingChannel),
            Arc::new(CountingChannel(count.clone())),
            Arc::new(LogChannel),
        ];

        let metric = CustomMetric::new("orders.count", json!(150), Tags::new());
        let alert = orders_rule().alert_for(&metric);
        let names: Vec<String> = ["slack", "missing", "webhook", "log"]
            .iter()
            .map(|s| s.to_string())
            .collect();

        let delivered = deliver(&alert, &names, &channels).await;
        assert_eq!(delivered, 2);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slack_payload_shape() {
        let metric = CustomMetric::new("orders.count", json!(150), Tags::new());
        let alert = orders_rule()
            .severity(AlertSeverity::Critical)
            .alert_for(&metric);
        let payload = SlackChannel::payload(&alert);
        assert_eq!(payload["attachments"][0]["color"], "danger");
        assert_eq!(payload["text"], "Alert: orders_spike");
    }

    #[test]
    fn test_channels_from_config() {
        let config = AlertChannelConfig {
            slack_webhook_url: Some("https://hooks.slack.com/services/T000/B000/XXX".to_string()),
            webhook_url: Some("http://alerts.internal:8080/notify".to_string()),
            email_recipients: vec!["ops@example.com".to_string()],
            channel_timeout_secs: 5,
        };
        let channels = channels_from_config(&config, None).unwrap();
        let names: Vec<&str> = channels.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["slack", "webhook"]);

        let bad = AlertChannelConfig {
            webhook_url: Some("ftp://alerts.internal/notify".to_string()),
            ..AlertChannelConfig::default()
        };
        assert!(channels_from_config(&bad, None).is_err());
    }
}
