//! Fire-and-forget notifications emitted by the monitoring core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

/// Emitted after every custom metric write
pub const METRIC_RECORDED: &str = "monitoring.metric_recorded";

/// Emitted after an alert was delivered to its channels
pub const ALERT_TRIGGERED: &str = "monitoring.alert_triggered";

/// Event sink. Dispatch never fails and its outcome is never consumed.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, event: &str, payload: Value);
}

/// Dispatcher that drops every event
#[derive(Debug, Default, Clone)]
pub struct NullDispatcher;

impl EventDispatcher for NullDispatcher {
    fn dispatch(&self, event: &str, _payload: Value) {
        trace!("Dropping event {}", event);
    }
}

/// An event as seen by broadcast subscribers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorEvent {
    pub name: String,
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

/// Fan-out dispatcher backed by a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastDispatcher {
    sender: broadcast::Sender<MonitorEvent>,
}

impl BroadcastDispatcher {
    /// Create a dispatcher whose subscribers lag after `capacity` unread events
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Receive every event dispatched from now on
    pub fn subscribe(&self) -> broadcast::Receiver<MonitorEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastDispatcher {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventDispatcher for BroadcastDispatcher {
    fn dispatch(&self, event: &str, payload: Value) {
        let event = MonitorEvent {
            name: event.to_string(),
            payload,
            timestamp: Utc::now(),
        };
        // No subscribers is not an error for a notification.
        let _ = self.sender.send(event);
    }
}
