//! In-process typed publish/subscribe.
//!
//! Events are a tagged sum; handlers register against the tag returned by
//! [`MonitorEvent::kind`]. Publishing never blocks the publisher: each
//! handler runs in its own task, and a panicking handler is caught and
//! logged without affecting its siblings.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::Serialize;
use tracing::error;

use crate::{ProbeStatus, ServiceId};

/// Event tag for [`StatusChangeEvent`].
pub const STATUS_CHANGE: &str = "StatusChange";

/// A service's UP/DOWN classification flipped.
///
/// Serde renames pin the wire format broadcast to subscribers:
/// `{"ServiceID":1,"OldStatus":"UP","NewStatus":"DOWN","Timestamp":"..."}`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChangeEvent {
    #[serde(rename = "ServiceID")]
    pub service_id: ServiceId,
    #[serde(rename = "OldStatus")]
    pub old_status: ProbeStatus,
    #[serde(rename = "NewStatus")]
    pub new_status: ProbeStatus,
    #[serde(rename = "Timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// All events carried by the bus.
#[derive(Debug, Clone)]
pub enum MonitorEvent {
    StatusChange(StatusChangeEvent),
}

impl MonitorEvent {
    /// Discriminator used for handler-table lookup.
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorEvent::StatusChange(_) => STATUS_CHANGE,
        }
    }

    pub fn at(&self) -> DateTime<Utc> {
        match self {
            MonitorEvent::StatusChange(event) => event.timestamp,
        }
    }
}

/// Boxed async event handler.
pub type EventHandler = Arc<dyn Fn(MonitorEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Publish/subscribe seam. Tests substitute recording implementations.
pub trait EventBus: Send + Sync {
    /// Append a handler for an event kind. There is no unsubscribe.
    fn subscribe(&self, kind: &'static str, handler: EventHandler);

    /// Dispatch to every handler registered for the event's kind. Handlers
    /// run asynchronously and independently of the publisher and each other.
    fn publish(&self, event: MonitorEvent);
}

/// Process-local bus backed by a reader-writer locked handler table.
#[derive(Default)]
pub struct InMemoryEventBus {
    subscribers: RwLock<HashMap<&'static str, Vec<EventHandler>>>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventBus for InMemoryEventBus {
    fn subscribe(&self, kind: &'static str, handler: EventHandler) {
        let mut subscribers = self.subscribers.write().expect("event bus lock poisoned");
        subscribers.entry(kind).or_default().push(handler);
    }

    fn publish(&self, event: MonitorEvent) {
        // Clone the handler list under the read lock, release before dispatch.
        let handlers = {
            let subscribers = self.subscribers.read().expect("event bus lock poisoned");
            match subscribers.get(event.kind()) {
                Some(handlers) => handlers.clone(),
                None => return,
            }
        };

        for handler in handlers {
            let event = event.clone();
            let kind = event.kind();
            tokio::spawn(async move {
                if let Err(panic) = std::panic::AssertUnwindSafe(handler(event))
                    .catch_unwind()
                    .await
                {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    error!(event_kind = kind, "panic recovered in event handler: {detail}");
                }
            });
        }
    }
}
