//! In-process event bus for runtime observability.
//!
//! Handlers run synchronously on the emitting thread, in subscription order.
//! A panicking handler is logged and skipped; it never aborts the emitting
//! operation. A disabled bus drops events silently.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle event types (closed set).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerEventType {
    WorkflowStart,
    WorkflowStep,
    WorkflowComplete,
    WorkflowError,
    AgentStart,
    AgentResponse,
    AgentRunStart,
    AgentRunComplete,
    ToolCallStart,
    ToolCallComplete,
    ToolCallError,
}

/// A typed lifecycle event delivered over the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEvent {
    #[serde(rename = "type")]
    pub event_type: WorkerEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
}

impl WorkerEvent {
    pub fn new(event_type: WorkerEventType, data: HashMap<String, Value>) -> Self {
        Self {
            event_type,
            timestamp: Utc::now(),
            data,
            metadata: HashMap::new(),
        }
    }
}

/// Handler callback type.
pub type EventHandler = Arc<dyn Fn(&WorkerEvent) + Send + Sync>;

/// What a subscription listens to.
#[derive(Clone)]
enum Selector {
    All,
    Types(Vec<WorkerEventType>),
}

impl Selector {
    fn matches(&self, event_type: WorkerEventType) -> bool {
        match self {
            Selector::All => true,
            Selector::Types(types) => types.contains(&event_type),
        }
    }
}

struct Subscription {
    id: String,
    selector: Selector,
    handler: EventHandler,
}

/// Synchronous pub/sub bus.
///
/// Subscriptions are kept in insertion order; a wildcard handler receives
/// every event exactly once per emission.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
    enabled: AtomicBool,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Subscribe a handler to a set of event types.
    pub fn subscribe(
        &self,
        types: impl IntoIterator<Item = WorkerEventType>,
        handler: EventHandler,
    ) -> String {
        self.add_subscription(Selector::Types(types.into_iter().collect()), handler)
    }

    /// Subscribe a handler to every event type.
    pub fn subscribe_all(&self, handler: EventHandler) -> String {
        self.add_subscription(Selector::All, handler)
    }

    fn add_subscription(&self, selector: Selector, handler: EventHandler) -> String {
        let id = uuid::Uuid::new_v4().to_string()[..8].to_string();
        self.subscriptions.write().push(Subscription {
            id: id.clone(),
            selector,
            handler,
        });
        tracing::debug!(subscription = %id, "Event handler subscribed");
        id
    }

    /// Cancel a subscription. Returns true when found and removed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        let mut subs = self.subscriptions.write();
        let before = subs.len();
        subs.retain(|s| s.id != subscription_id);
        let removed = subs.len() != before;
        if removed {
            tracing::debug!(subscription = %subscription_id, "Event handler unsubscribed");
        }
        removed
    }

    /// Emit an event to all matching handlers, in subscription order.
    pub fn emit(&self, event: &WorkerEvent) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }

        let subs = self.subscriptions.read();
        for sub in subs.iter() {
            if !sub.selector.matches(event.event_type) {
                continue;
            }
            let handler = Arc::clone(&sub.handler);
            if catch_unwind(AssertUnwindSafe(|| (*handler)(event))).is_err() {
                tracing::error!(
                    subscription = %sub.id,
                    event_type = ?event.event_type,
                    "Event handler panicked; skipping"
                );
            }
        }
    }

    /// Build and emit an event in one call.
    pub fn emit_simple(
        &self,
        event_type: WorkerEventType,
        data: HashMap<String, Value>,
    ) -> WorkerEvent {
        let event = WorkerEvent::new(event_type, data);
        self.emit(&event);
        event
    }

    /// Emit with extra metadata attached.
    pub fn emit_with_metadata(
        &self,
        event_type: WorkerEventType,
        data: HashMap<String, Value>,
        metadata: HashMap<String, Value>,
    ) -> WorkerEvent {
        let mut event = WorkerEvent::new(event_type, data);
        event.metadata = metadata;
        self.emit(&event);
        event
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Remove all subscriptions.
    pub fn clear(&self) {
        self.subscriptions.write().clear();
    }

    pub fn handler_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience for building event data maps.
#[macro_export]
macro_rules! event_data {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(map.insert($key.to_string(), serde_json::json!($value));)*
        map
    }};
}
