use crate::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// Event emitted when a task is accepted into the queue.
pub const TASK_QUEUED: &str = "task.queued";
/// Event emitted for each task transitioned by the timeout sweep.
pub const TASK_TIMEOUT: &str = "task.timeout";
/// Event emitted when a task reaches `completed`.
pub const TASK_COMPLETED: &str = "task.completed";
/// Event emitted when a task reaches terminal `failed`.
pub const TASK_FAILED: &str = "task.failed";
/// Event emitted on agent lifecycle transitions.
pub const AGENT_STATE_CHANGED: &str = "agent.state_changed";
/// Event emitted when a service descriptor is (re)registered.
pub const SERVICE_REGISTERED: &str = "service.registered";

/// A named event with an opaque JSON payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: serde_json::Value,
    pub timestamp_ms: i64,
}

type Handler = Arc<dyn Fn(&Event) -> Result<()> + Send + Sync>;

/// Synchronous in-process event bus.
///
/// Subscribers for a given event name are invoked in registration order.
/// A subscriber that returns an error or panics is logged and skipped; it
/// never prevents delivery to the remaining subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<String, Vec<Handler>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for the given event name.
    pub fn subscribe<F>(&self, event_name: &str, handler: F)
    where
        F: Fn(&Event) -> Result<()> + Send + Sync + 'static,
    {
        let mut subs = self.subscribers.write().unwrap_or_else(|e| e.into_inner());
        subs.entry(event_name.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Publish an event to all subscribers of `name`, synchronously and in
    /// registration order. Returns the number of subscribers reached.
    pub fn publish(&self, name: &str, payload: serde_json::Value) -> usize {
        let event = Event {
            name: name.to_string(),
            payload,
            timestamp_ms: Utc::now().timestamp_millis(),
        };

        let handlers: Vec<Handler> = {
            let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
            subs.get(name).cloned().unwrap_or_default()
        };

        if handlers.is_empty() {
            debug!(event = %name, "No subscribers for event");
            return 0;
        }

        let mut delivered = 0;
        for handler in &handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    warn!(event = %name, error = %e, "Event subscriber failed");
                }
                Err(_) => {
                    warn!(event = %name, "Event subscriber panicked");
                }
            }
        }
        delivered
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        let subs = self.subscribers.read().unwrap_or_else(|e| e.into_inner());
        subs.get(name).map(|v| v.len()).unwrap_or(0)
    }
}
