// Scoped Timer
// Records a timing metric exactly once, on stop() or when the guard goes out of scope

use super::metrics::{CustomMetric, Tags, TIMINGS};
use super::{store_custom, MonitoringManager};
use serde_json::json;
use std::time::Instant;
use tokio::runtime::Handle;
use tracing::debug;

/// Returned by [`MonitoringManager::start_timer`]. The clock starts on
/// creation; the duration lands under `timings.<name>`.
#[must_use = "a dropped timer records immediately"]
pub struct TimerContext {
    manager: MonitoringManager,
    name: String,
    tags: Tags,
    started: Instant,
    stopped: bool,
}

impl TimerContext {
    pub(crate) fn new(manager: MonitoringManager, name: impl Into<String>, tags: Tags) -> Self {
        Self {
            manager,
            name: name.into(),
            tags,
            started: Instant::now(),
            stopped: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Record the elapsed time. Only the first call records; later calls
    /// return `None`.
    pub async fn stop(&mut self) -> Option<f64> {
        if self.stopped {
            return None;
        }
        self.stopped = true;

        let elapsed = self.elapsed_ms();
        self.manager
            .timing(&self.name, elapsed, self.tags.clone())
            .await;
        Some(elapsed)
    }
}

impl Drop for TimerContext {
    /// The duration is written to the custom bucket before `drop` returns.
    /// Cache mirroring, alert evaluation and the event follow on a spawned
    /// task when a runtime is available.
    fn drop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let elapsed = self.elapsed_ms();
        let metric = CustomMetric::new(
            format!("{}.{}", TIMINGS, self.name),
            json!(elapsed),
            std::mem::take(&mut self.tags),
        );

        let Ok(handle) = Handle::try_current() else {
            let stored = store_custom(&mut *self.manager.custom.blocking_write(), &metric);
            if stored {
                debug!(timer = %self.name, elapsed_ms = elapsed, "Timer dropped outside a runtime; recorded without cache mirror");
            }
            return;
        };

        let manager = self.manager.clone();
        let stored = match self.manager.custom.try_write() {
            Ok(mut custom) => Some(store_custom(&mut custom, &metric)),
            // Held by another task; record from the runtime instead
            Err(_) => None,
        };

        match stored {
            Some(true) => {
                handle.spawn(async move { manager.publish(metric).await });
            }
            Some(false) => {}
            None => {
                handle.spawn(async move {
                    let stored = store_custom(&mut *manager.custom.write().await, &metric);
                    if stored {
                        manager.publish(metric).await;
                    }
                });
            }
        }
    }
}
