// HTTP Metrics Collector
// Request/response metadata, timing, suspicious-pattern flags and per-request counters

use crate::monitoring::request::RequestContext;
use crate::monitoring::{MetricBundle, MetricsCollector};
use crate::utils::error::Result;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map};
use std::collections::BTreeMap;
use std::sync::Arc;

lazy_static! {
    static ref SQL_INJECTION: Regex = Regex::new(
        r"(?i)(union(\s+all)?\s+select|select\s.+\sfrom\s|insert\s+into\s|drop\s+(table|database)\s|delete\s+from\s|update\s+\w+\s+set\s|'\s*or\s+'?\d+'?\s*=\s*'?\d+|\bor\s+1\s*=\s*1\b|'\s*--|;\s*(shutdown|exec)\b|\bsleep\s*\(|\bbenchmark\s*\()"
    )
    .unwrap();
    static ref SCRIPT_INJECTION: Regex = Regex::new(
        r"(?i)(<\s*script|</\s*script|javascript\s*:|vbscript\s*:|\bon(load|error|click|mouseover|focus)\s*=|<\s*iframe|<\s*svg[^>]*on\w+\s*=|document\.cookie|\beval\s*\()"
    )
    .unwrap();
    static ref PATH_TRAVERSAL: Regex =
        Regex::new(r"(?i)(\.\./|\.\.\\|%2e%2e(%2f|/|%5c)|\.\.%2f|%252e%252e|/etc/passwd|\\windows\\win\.ini)").unwrap();
    static ref BOT_AGENT: Regex =
        Regex::new(r"(?i)(bot|crawl|spider|scrap|curl|wget|python-requests|httpclient|libwww|go-http-client|headless)").unwrap();
    static ref GOOD_CRAWLER: Regex =
        Regex::new(r"(?i)(googlebot|bingbot|duckduckbot|yandexbot|baiduspider|applebot|slurp|facebookexternalhit)").unwrap();
}

/// Request headers never echoed into metrics
const REDACTED_HEADERS: [&str; 4] = ["authorization", "cookie", "set-cookie", "x-api-key"];

/// Signatures matched against the current request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityFlags {
    pub sql_injection: bool,
    pub script_injection: bool,
    pub path_traversal: bool,
    pub bot: bool,
}

impl SecurityFlags {
    pub fn suspicious(&self) -> bool {
        self.sql_injection || self.script_injection || self.path_traversal || self.bot
    }

    pub fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.sql_injection {
            labels.push("sql_injection");
        }
        if self.script_injection {
            labels.push("script_injection");
        }
        if self.path_traversal {
            labels.push("path_traversal");
        }
        if self.bot {
            labels.push("bot");
        }
        labels
    }
}

/// Match the URI, the decoded query and the user agent against the fixed
/// signature set. Known search engine crawlers are not flagged as bots.
pub fn inspect(uri: &str, query: &str, user_agent: Option<&str>) -> SecurityFlags {
    let decoded: Vec<String> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    let haystacks: Vec<&str> = std::iter::once(uri)
        .chain(std::iter::once(query))
        .chain(decoded.iter().map(String::as_str))
        .collect();

    let any = |re: &Regex| haystacks.iter().any(|h| re.is_match(h));
    let bot = user_agent
        .map(|ua| BOT_AGENT.is_match(ua) && !GOOD_CRAWLER.is_match(ua))
        .unwrap_or(false);

    SecurityFlags {
        sql_injection: any(&*SQL_INJECTION),
        script_injection: any(&*SCRIPT_INJECTION),
        path_traversal: any(&*PATH_TRAVERSAL),
        bot,
    }
}

/// Collector over the in-flight request
pub struct HttpCollector {
    request: Option<Arc<RequestContext>>,
}

impl HttpCollector {
    pub fn new(request: Option<Arc<RequestContext>>) -> Self {
        Self { request }
    }
}

#[async_trait::async_trait]
impl MetricsCollector for HttpCollector {
    fn name(&self) -> &str {
        "http"
    }

    async fn collect(&self) -> Result<MetricBundle> {
        let mut bundle = Map::new();
        let Some(request) = &self.request else {
            bundle.insert("active".to_string(), json!(false));
            return Ok(bundle);
        };

        let headers: BTreeMap<&str, &str> = request
            .headers
            .iter()
            .map(|(name, value)| {
                let value = if REDACTED_HEADERS.contains(&name.as_str()) {
                    "[redacted]"
                } else {
                    value.as_str()
                };
                (name.as_str(), value)
            })
            .collect();

        let content_length = request
            .header_value("content-length")
            .and_then(|v| v.trim().parse::<u64>().ok());

        bundle.insert("active".to_string(), json!(true));
        bundle.insert(
            "request".to_string(),
            json!({
                "method": request.method,
                "uri": request.uri,
                "query_string": request.query_string,
                "protocol": request.protocol,
                "client_ip": request.client_ip(),
                "user_agent": request.user_agent(),
                "content_length": content_length,
                "header_count": request.headers.len(),
                "headers": headers,
            }),
        );

        let response = match &request.response {
            Some(response) => json!({
                "status": response.status,
                "size_bytes": response.size_bytes,
                "header_count": response.headers.len(),
                "content_type": response.headers.get("content-type"),
                "success": (200..400).contains(&response.status),
            }),
            None => json!({ "sent": false }),
        };
        bundle.insert("response".to_string(), response);

        bundle.insert(
            "timing".to_string(),
            json!({
                "started_at": request.started_at.to_rfc3339(),
                "duration_ms": request.elapsed_ms(),
            }),
        );

        let flags = inspect(&request.uri, &request.query_string, request.user_agent());
        bundle.insert(
            "security".to_string(),
            json!({
                "suspicious": flags.suspicious(),
                "flags": flags.labels(),
                "sql_injection": flags.sql_injection,
                "script_injection": flags.script_injection,
                "path_traversal": flags.path_traversal,
                "bot": flags.bot,
            }),
        );

        let counters = request.counters.to_value();
        bundle.insert("database".to_string(), counters["database"].clone());
        bundle.insert("cache".to_string(), counters["cache"].clone());

        Ok(bundle)
    }
}
