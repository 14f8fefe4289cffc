// Request Context
// Immutable view of the in-flight request handed to the HTTP and application collectors

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Headers consulted for the client address, most trusted first
const CLIENT_IP_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "client-ip"];

/// Response metadata, present once the host application has produced one
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInfo {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub size_bytes: Option<u64>,
}

/// Per-request database and cache activity, updated by the host application
/// while the request runs
#[derive(Debug, Default)]
pub struct RequestCounters {
    db_queries: AtomicU64,
    db_time_us: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl RequestCounters {
    pub fn record_query(&self, elapsed: Duration) {
        self.db_queries.fetch_add(1, Ordering::Relaxed);
        self.db_time_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn to_value(&self) -> Value {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        let hit_ratio = if lookups == 0 {
            0.0
        } else {
            crate::database::round2(hits as f64 / lookups as f64 * 100.0)
        };

        json!({
            "database": {
                "queries": self.db_queries.load(Ordering::Relaxed),
                "time_ms": self.db_time_us.load(Ordering::Relaxed) as f64 / 1000.0,
            },
            "cache": {
                "hits": hits,
                "misses": misses,
                "hit_ratio": hit_ratio,
            },
        })
    }
}

/// The current request as seen by collectors
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: String,
    pub uri: String,
    pub query_string: String,
    /// Header names are stored lowercased
    pub headers: BTreeMap<String, String>,
    pub remote_addr: Option<String>,
    pub protocol: String,
    pub started_at: DateTime<Utc>,
    pub response: Option<ResponseInfo>,
    pub counters: Arc<RequestCounters>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, uri: impl Into<String>) -> Self {
        let uri = uri.into();
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path.to_string(), query.to_string()),
            None => (uri, String::new()),
        };

        Self {
            method: method.into().to_uppercase(),
            uri: path,
            query_string: query,
            headers: BTreeMap::new(),
            remote_addr: None,
            protocol: "HTTP/1.1".to_string(),
            started_at: Utc::now(),
            response: None,
            counters: Arc::new(RequestCounters::default()),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn remote_addr(mut self, addr: impl Into<String>) -> Self {
        self.remote_addr = Some(addr.into());
        self
    }

    pub fn protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn response(mut self, response: ResponseInfo) -> Self {
        self.response = Some(response);
        self
    }

    pub fn counters(mut self, counters: Arc<RequestCounters>) -> Self {
        self.counters = counters;
        self
    }

    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn user_agent(&self) -> Option<&str> {
        self.header_value("user-agent")
    }

    /// Path plus query string as the client sent it
    pub fn full_uri(&self) -> String {
        if self.query_string.is_empty() {
            self.uri.clone()
        } else {
            format!("{}?{}", self.uri, self.query_string)
        }
    }

    /// Milliseconds since the request started
    pub fn elapsed_ms(&self) -> f64 {
        let elapsed = Utc::now() - self.started_at;
        elapsed.num_microseconds().unwrap_or(0).max(0) as f64 / 1000.0
    }

    /// The first public address from the forwarding headers, falling back
    /// to the socket peer address as given
    pub fn client_ip(&self) -> Option<String> {
        for header in CLIENT_IP_HEADERS {
            let Some(raw) = self.header_value(header) else {
                continue;
            };
            for candidate in raw.split(',').map(str::trim) {
                if let Ok(ip) = candidate.parse::<IpAddr>() {
                    if is_public_ip(&ip) {
                        return Some(ip.to_string());
                    }
                }
            }
        }
        self.remote_addr.clone()
    }
}

/// Routable address: not private, loopback, link-local, documentation,
/// shared, multicast or otherwise reserved
pub fn is_public_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_public_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_public_v4(&v4),
            None => is_public_v6(v6),
        },
    }
}

fn is_public_v4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    !(ip.is_private()
        || ip.is_loopback()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip.is_broadcast()
        || ip.is_documentation()
        || ip.is_multicast()
        || octets[0] == 0
        || octets[0] >= 240
        || (octets[0] == 100 && (64..128).contains(&octets[1]))
        || (octets[0] == 198 && (18..20).contains(&octets[1])))
}

fn is_public_v6(ip: &Ipv6Addr) -> bool {
    let segments = ip.segments();
    !(ip.is_loopback()
        || ip.is_unspecified()
        || ip.is_multicast()
        || (segments[0] & 0xfe00) == 0xfc00
        || (segments[0] & 0xffc0) == 0xfe80
        || (segments[0] == 0x2001 && segments[1] == 0x0db8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_prefers_first_public() {
        let request = RequestContext::new("get", "/checkout")
            .header("X-Forwarded-For", "10.0.0.5, 203.0.113.9, 8.8.8.8")
            .remote_addr("127.0.0.1");
        assert_eq!(request.client_ip().as_deref(), Some("8.8.8.8"));
    }

    #[test]
    fn test_header_chain_order() {
        let request = RequestContext::new("GET", "/")
            .header("X-Real-IP", "1.1.1.1")
            .header("Client-IP", "9.9.9.9");
        assert_eq!(request.client_ip().as_deref(), Some("1.1.1.1"));

        let request = RequestContext::new("GET", "/")
            .header("X-Forwarded-For", "192.168.1.10")
            .header("Client-IP", "9.9.9.9");
        assert_eq!(request.client_ip().as_deref(), Some("9.9.9.9"));
    }

    #[test]
    fn test_falls_back_to_remote_addr_unvalidated() {
        let request = RequestContext::new("GET", "/")
            .header("X-Forwarded-For", "not-an-ip, 172.16.0.1")
            .remote_addr("10.1.2.3");
        assert_eq!(request.client_ip().as_deref(), Some("10.1.2.3"));
        assert_eq!(RequestContext::new("GET", "/").client_ip(), None);
    }

    #[test]
    fn test_reserved_ranges() {
        for ip in ["100.64.0.1", "240.0.0.1", "::1", "fd00::1", "fe80::1", "2001:db8::1"] {
            assert!(!is_public_ip(&ip.parse().unwrap()), "{} should be reserved", ip);
        }
        for ip in ["8.8.4.4", "2606:4700:4700::1111", "::ffff:1.1.1.1"] {
            assert!(is_public_ip(&ip.parse().unwrap()), "{} should be public", ip);
        }
    }

    #[test]
    fn test_uri_split_and_counters() {
        let request = RequestContext::new("post", "/search?q=shoes&page=2");
        assert_eq!(request.method, "POST");
        assert_eq!(request.uri, "/search");
        assert_eq!(request.query_string, "q=shoes&page=2");
        assert_eq!(request.full_uri(), "/search?q=shoes&page=2");

        request.counters.record_query(Duration::from_millis(3));
        request.counters.record_cache_hit();
        request.counters.record_cache_hit();
        request.counters.record_cache_miss();
        request.counters.record_cache_hit();

        let counters = request.counters.to_value();
        assert_eq!(counters["database"]["queries"], 1);
        assert_eq!(counters["cache"]["hit_ratio"], 75.0);
    }
}
