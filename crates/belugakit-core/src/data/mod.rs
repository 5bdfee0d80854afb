//! Data models shared across the console
//!
//! This module provides the connection state of the controller channel.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state of the controller channel
///
/// Owned by the channel client; every other component only reads it to fail
/// fast while the channel is down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Connection not established or closed
    #[default]
    Disconnected,
    /// Attempting to establish (or re-establish) the connection
    Connecting,
    /// Handshake complete, events can be exchanged
    Connected,
}

impl ConnectionState {
    /// Check if a transition from this state to `target` is valid.
    ///
    /// Returns `true` for valid transitions:
    /// - Disconnected → Connecting
    /// - Connecting → Connected, Disconnected
    /// - Connected → Disconnected, Connecting
    pub fn can_transition_to(&self, target: ConnectionState) -> bool {
        use ConnectionState::*;
        if *self == target {
            return true;
        }
        matches!(
            (self, target),
            (Disconnected, Connecting)
                | (Connecting, Connected | Disconnected)
                | (Connected, Disconnected | Connecting)
        )
    }

    /// Whether commands may be sent in this state
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_state_transitions() {
        use ConnectionState::*;
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(Connected.can_transition_to(Connected));
    }

    #[test]
    fn test_default_is_disconnected() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert!(!ConnectionState::default().is_connected());
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
    }
}
