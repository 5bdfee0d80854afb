//! Error handling for BelugaKit
//!
//! Provides error types for all layers of the console:
//! - Command errors (outcome of one correlated command or scan session)
//! - Connection errors (transport and handshake)
//! - Protocol errors (frame encoding/decoding)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Command error type
///
/// The rejection reason of one correlated command, acknowledgement, or scan
/// session. Every failure reaches the immediate caller as one of these; events
/// that match no pending call are dropped and never become an error value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// The channel was not connected when the command was issued
    #[error("Controller not connected")]
    NotConnected,

    /// No matching reply arrived within the command's budget
    #[error("{command} timed out after {timeout_ms}ms")]
    Timeout {
        /// The command event name.
        command: String,
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The controller explicitly reported a failure
    #[error("{command} failed: {message}")]
    RemoteError {
        /// The command event name.
        command: String,
        /// The failure message reported by the controller.
        message: String,
    },

    /// A single-flight operation is already in progress
    #[error("{operation} already in progress")]
    AlreadyInProgress {
        /// The operation that is already running.
        operation: String,
    },

    /// The channel dropped while the operation was in flight
    #[error("Channel disconnected during {operation}")]
    Disconnected {
        /// The operation that was interrupted.
        operation: String,
    },

    /// The reply arrived but its payload could not be decoded
    #[error("Invalid response to {command}: {reason}")]
    InvalidResponse {
        /// The command event name.
        command: String,
        /// The reason the payload was rejected.
        reason: String,
    },
}

impl CommandError {
    /// Check if this error is a timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, CommandError::Timeout { .. })
    }
}

/// Connection error type
///
/// Represents errors related to the duplex event connection to the hardware
/// controller, including URL handling, WebSocket, and handshake issues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// The controller URL could not be used
    #[error("Invalid controller URL {url}: {reason}")]
    InvalidUrl {
        /// The rejected URL.
        url: String,
        /// The reason the URL is invalid.
        reason: String,
    },

    /// The controller refused or could not be reached
    #[error("Connection to {url} refused: {reason}")]
    ConnectionRefused {
        /// The URL that was dialled.
        url: String,
        /// The reason the connection failed.
        reason: String,
    },

    /// Connection timeout
    #[error("Connection timeout after {timeout_ms}ms")]
    ConnectionTimeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// Connection lost
    #[error("Connection lost: {reason}")]
    ConnectionLost {
        /// The reason the connection was lost.
        reason: String,
    },

    /// The controller did not complete the session handshake
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// The reason the handshake failed.
        reason: String,
    },

    /// WebSocket error
    #[error("WebSocket error: {reason}")]
    WebSocketError {
        /// The reason for the WebSocket error.
        reason: String,
    },
}

/// Protocol error type
///
/// Represents errors decoding or encoding the text frames exchanged with the
/// controller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// An empty frame was received
    #[error("Empty frame")]
    EmptyFrame,

    /// The frame starts with an unknown packet type
    #[error("Unknown {layer} packet type '{kind}'")]
    UnknownPacketType {
        /// Which framing layer rejected the packet.
        layer: &'static str,
        /// The offending type character.
        kind: char,
    },

    /// An acknowledgement id could not be parsed
    #[error("Invalid acknowledgement id: {raw}")]
    InvalidAckId {
        /// The raw id text.
        raw: String,
    },

    /// The packet data is not the expected JSON shape
    #[error("Malformed packet payload: {reason}")]
    MalformedPayload {
        /// The reason the payload was rejected.
        reason: String,
    },
}

/// Main error type for BelugaKit
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs outside of command
/// futures, which reject with [`CommandError`] directly.
#[derive(Error, Debug)]
pub enum Error {
    /// Command error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// JSON encoding or decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Command(CommandError::Timeout { .. })
                | Error::Connection(ConnectionError::ConnectionTimeout { .. })
        )
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Error::Connection(_)
                | Error::Command(CommandError::NotConnected)
                | Error::Command(CommandError::Disconnected { .. })
        )
    }

    /// Check if this is a command error
    pub fn is_command_error(&self) -> bool {
        matches!(self, Error::Command(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

/// Result type for a single command or scan session
pub type CommandResult<T> = std::result::Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_error_display() {
        let err = CommandError::Timeout {
            command: "turn_on_uv_hardware".to_string(),
            timeout_ms: 10_000,
        };
        assert_eq!(err.to_string(), "turn_on_uv_hardware timed out after 10000ms");

        let err = CommandError::RemoteError {
            command: "connect_wifi".to_string(),
            message: "bad password".to_string(),
        };
        assert_eq!(err.to_string(), "connect_wifi failed: bad password");

        let err = CommandError::AlreadyInProgress {
            operation: "barcode scan".to_string(),
        };
        assert_eq!(err.to_string(), "barcode scan already in progress");
    }

    #[test]
    fn test_error_classification() {
        let err: Error = CommandError::Timeout {
            command: "scan_wifi_networks".to_string(),
            timeout_ms: 30_000,
        }
        .into();
        assert!(err.is_timeout());
        assert!(err.is_command_error());
        assert!(!err.is_connection_error());

        let err: Error = CommandError::NotConnected.into();
        assert!(err.is_connection_error());

        let err: Error = ConnectionError::ConnectionTimeout { timeout_ms: 20_000 }.into();
        assert!(err.is_timeout());
        assert!(err.is_connection_error());
        assert!(!err.is_command_error());
    }

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::UnknownPacketType {
            layer: "engine.io",
            kind: '9',
        };
        assert_eq!(err.to_string(), "Unknown engine.io packet type '9'");
    }
}
