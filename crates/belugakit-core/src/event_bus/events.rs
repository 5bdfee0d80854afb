//! Event type definitions for the event bus.
//!
//! Controller events are named messages carrying a JSON payload. Connection
//! lifecycle changes travel on the same bus under reserved names so that
//! dependents observe them with the same subscription mechanism.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Reserved lifecycle event names published by the channel client
pub mod lifecycle {
    /// Handshake with the controller completed.
    pub const CONNECT: &str = "connect";
    /// The connection dropped or was closed locally.
    pub const DISCONNECT: &str = "disconnect";
    /// Every reconnect attempt failed; the channel stays down.
    pub const RECONNECT_FAILED: &str = "reconnect_failed";

    /// Check whether an event name is reserved for lifecycle notifications
    pub fn is_lifecycle(name: &str) -> bool {
        matches!(name, CONNECT | DISCONNECT | RECONNECT_FAILED)
    }
}

/// A named event received from (or about) the controller channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelEvent {
    /// Event name, e.g. `uv_complete`.
    pub name: String,
    /// Structured payload; `Value::Null` when the event carried none.
    pub payload: Value,
}

impl ChannelEvent {
    /// Create a new event
    pub fn new(name: impl Into<String>, payload: Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// Create a lifecycle event with a `reason` payload
    pub fn lifecycle(name: &'static str, reason: impl Into<String>) -> Self {
        Self::new(name, serde_json::json!({ "reason": reason.into() }))
    }

    /// Read a string field from an object payload
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(Value::as_str)
    }

    /// Get a short description of this event for logging
    pub fn description(&self) -> String {
        match &self.payload {
            Value::Null => self.name.clone(),
            payload => format!("{} {}", self.name, payload),
        }
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
