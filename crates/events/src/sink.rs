//! Sink abstraction for outbound channel notifications.
//!
//! The session core emits through this trait and never learns which
//! transport carries the payload, so it runs the same under tests, the
//! simulator and a real host binding.

use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EmitError {
    /// Nobody is attached to the channel.
    #[error("no listener attached")]
    NoListener,

    #[error("channel rejected notification: {0}")]
    Rejected(String),
}

/// Outbound channel accepting method-style notifications.
pub trait EventSink: Send + Sync {
    /// Deliver `payload` under `method` (e.g. "onDetectedId").
    ///
    /// Called on the session controller task, so it must hand off and
    /// return without blocking. Failures are logged and otherwise ignored.
    fn emit(&self, method: &str, payload: serde_json::Value) -> Result<(), EmitError>;
}

/// Type alias for shared sink reference.
pub type EventSinkRef = Arc<dyn EventSink>;

/// A captured notification from `InMemoryEventSink`.
#[derive(Debug, Clone)]
pub struct EmittedEvent {
    pub method: String,
    pub payload: serde_json::Value,
}

/// In-memory sink for testing.
///
/// Captures all emitted notifications for later inspection.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: Mutex<Vec<EmittedEvent>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EmittedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Payloads emitted under a specific method.
    pub fn payloads_for(&self, method: &str) -> Vec<serde_json::Value> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|e| e.method == method)
                    .map(|e| e.payload.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for InMemoryEventSink {
    fn emit(&self, method: &str, payload: serde_json::Value) -> Result<(), EmitError> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| EmitError::Rejected("sink poisoned".into()))?;
        events.push(EmittedEvent {
            method: method.to_string(),
            payload,
        });
        Ok(())
    }
}

/// Sink with no listener; every emit reports `NoListener`.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn emit(&self, _method: &str, _payload: serde_json::Value) -> Result<(), EmitError> {
        Err(EmitError::NoListener)
    }
}
