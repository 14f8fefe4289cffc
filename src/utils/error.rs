use thiserror::Error;

/// Result type alias for the monitoring core
pub type Result<T> = std::result::Result<T, MonitorError>;

/// Error types surfaced by collaborators and probes
#[derive(Error, Debug)]
pub enum MonitorError {
    /// HTTP request errors (alert delivery)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File system errors
    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    /// Redis command errors
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Cache backend errors
    #[error("Cache error: {message}")]
    Cache { message: String },

    /// Database errors
    #[error("Database error: {message}")]
    Database { message: String },

    /// A collector failed to produce its bundle
    #[error("Collector error: {collector}: {message}")]
    Collector { collector: String, message: String },

    /// An alert delivery channel failed
    #[error("Channel error: {channel}: {message}")]
    Channel { channel: String, message: String },

    /// A probe or collector exceeded its deadline
    #[error("Timed out after {millis}ms: {operation}")]
    Timeout { operation: String, millis: u64 },

    /// Validation errors
    #[error("Validation error: {message}")]
    Validation { message: String },
}

impl MonitorError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new cache error
    pub fn cache<S: Into<String>>(message: S) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    /// Create a new database error
    pub fn database<S: Into<String>>(message: S) -> Self {
        Self::Database {
            message: message.into(),
        }
    }

    /// Create a new collector error
    pub fn collector<S: Into<String>, M: Into<String>>(collector: S, message: M) -> Self {
        Self::Collector {
            collector: collector.into(),
            message: message.into(),
        }
    }

    /// Create a new channel error
    pub fn channel<S: Into<String>, M: Into<String>>(channel: S, message: M) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(operation: S, millis: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            millis,
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MonitorError::Http(_) | MonitorError::Redis(_) | MonitorError::Timeout { .. }
        )
    }

    /// Check if this error came from a deadline expiring
    pub fn is_timeout(&self) -> bool {
        matches!(self, MonitorError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = MonitorError::collector("database", "connection refused");
        assert_eq!(err.to_string(), "Collector error: database: connection refused");

        let err = MonitorError::timeout("health.database", 2000);
        assert_eq!(err.to_string(), "Timed out after 2000ms: health.database");
        assert!(err.is_timeout());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_non_retryable_errors() {
        assert!(!MonitorError::config("bad").is_retryable());
        assert!(!MonitorError::validation("bad").is_retryable());
        assert!(!MonitorError::channel("slack", "500").is_retryable());
    }
}
