//! Events recorded against primary objects.

use std::sync::Mutex;

use keel_core::ObjectKey;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Normal,
    Warning,
}

/// A user-visible event on an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub key: ObjectKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
}

impl Event {
    pub fn normal(key: ObjectKey, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key,
            event_type: EventType::Normal,
            reason: reason.into(),
            message: message.into(),
        }
    }

    pub fn warning(key: ObjectKey, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            key,
            event_type: EventType::Warning,
            reason: reason.into(),
            message: message.into(),
        }
    }
}

/// Sink for events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Writes events to the tracing subscriber.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl EventRecorder for TracingRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                object = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
            EventType::Warning => warn!(
                object = %event.key,
                reason = %event.reason,
                "{}",
                event.message
            ),
        }
    }
}

/// Keeps events in memory for assertions.
#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventRecorder for InMemoryRecorder {
    fn record(&self, event: Event) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
