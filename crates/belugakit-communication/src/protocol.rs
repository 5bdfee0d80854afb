//! Wire protocol for the controller channel
//!
//! The controller is a Socket.IO v5 server reached over the Engine.IO v4
//! WebSocket transport. Every WebSocket text frame is one Engine.IO packet;
//! Engine.IO `message` packets carry one Socket.IO packet.
//!
//! Engine.IO packets: `0` open, `1` close, `2` ping, `3` pong, `4` message, `6` noop.
//!
//! Socket.IO packets: `0` connect, `1` disconnect, `2` event, `3` ack,
//! `4` connect error. Event and ack packets may carry a numeric ack id before
//! the JSON data. Only the default namespace is used; a namespace prefix on
//! incoming packets is skipped.
//!
//! Binary packets are not supported.

use belugakit_core::ProtocolError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Engine.IO handshake sent by the server when the transport opens
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    /// Engine.IO session id
    pub sid: String,
    /// Transport upgrades offered by the server
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Interval between server pings in milliseconds
    pub ping_interval: u64,
    /// How long the server waits for a pong in milliseconds
    pub ping_timeout: u64,
    /// Maximum payload size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// Longest silence tolerated before the connection is considered dead
    pub fn heartbeat_window(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.ping_interval.saturating_add(self.ping_timeout))
    }
}

/// Socket.IO packet carried inside an Engine.IO message
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Namespace connect request (client) or confirmation (server)
    Connect(Option<Value>),
    /// Namespace disconnect
    Disconnect,
    /// Named event with its data, optionally requesting an acknowledgement
    Event {
        /// Event name
        name: String,
        /// Event data; `Null` for no argument, an array for several
        data: Value,
        /// Acknowledgement id requested by the sender
        ack_id: Option<u64>,
    },
    /// Acknowledgement of an earlier event
    Ack {
        /// The acknowledged id
        ack_id: u64,
        /// Acknowledgement data; `Null` for no argument, an array for several
        data: Value,
    },
    /// The server refused the namespace connection
    ConnectError(Value),
}

/// Engine.IO packet, one per WebSocket text frame
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    /// Session opened
    Open(OpenHandshake),
    /// Transport closing
    Close,
    /// Heartbeat from the server
    Ping,
    /// Heartbeat reply
    Pong,
    /// Socket.IO payload
    Message(SocketPacket),
    /// No operation
    Noop,
}

impl EnginePacket {
    /// Convenience constructor for an event message
    pub fn event(name: impl Into<String>, data: Value, ack_id: Option<u64>) -> Self {
        EnginePacket::Message(SocketPacket::Event {
            name: name.into(),
            data,
            ack_id,
        })
    }
}

/// Encode a packet into the text of one WebSocket frame
pub fn encode_frame(packet: &EnginePacket) -> String {
    match packet {
        EnginePacket::Open(handshake) => {
            format!("0{}", serde_json::to_string(handshake).unwrap_or_default())
        }
        EnginePacket::Close => "1".to_string(),
        EnginePacket::Ping => "2".to_string(),
        EnginePacket::Pong => "3".to_string(),
        EnginePacket::Message(packet) => format!("4{}", encode_socket_packet(packet)),
        EnginePacket::Noop => "6".to_string(),
    }
}

fn encode_socket_packet(packet: &SocketPacket) -> String {
    match packet {
        SocketPacket::Connect(None) => "0".to_string(),
        SocketPacket::Connect(Some(auth)) => format!("0{}", auth),
        SocketPacket::Disconnect => "1".to_string(),
        SocketPacket::Event { name, data, ack_id } => {
            let mut args = vec![Value::String(name.clone())];
            args.extend(data_to_args(data));
            let id = ack_id.map(|id| id.to_string()).unwrap_or_default();
            format!("2{}{}", id, Value::Array(args))
        }
        SocketPacket::Ack { ack_id, data } => {
            format!("3{}{}", ack_id, Value::Array(data_to_args(data)))
        }
        SocketPacket::ConnectError(data) => format!("4{}", data),
    }
}

/// Spread event data into Socket.IO arguments
fn data_to_args(data: &Value) -> Vec<Value> {
    match data {
        Value::Null => Vec::new(),
        other => vec![other.clone()],
    }
}

/// Collapse Socket.IO arguments into a single value
fn args_to_data(mut args: Vec<Value>) -> Value {
    match args.len() {
        0 => Value::Null,
        1 => args.remove(0),
        _ => Value::Array(args),
    }
}

/// Decode the text of one WebSocket frame
pub fn decode_frame(frame: &str) -> Result<EnginePacket, ProtocolError> {
    let mut chars = frame.chars();
    let kind = chars.next().ok_or(ProtocolError::EmptyFrame)?;
    let rest = chars.as_str();

    match kind {
        '0' => serde_json::from_str(rest)
            .map(EnginePacket::Open)
            .map_err(|e| ProtocolError::MalformedPayload {
                reason: format!("open handshake: {}", e),
            }),
        '1' => Ok(EnginePacket::Close),
        '2' => Ok(EnginePacket::Ping),
        '3' => Ok(EnginePacket::Pong),
        '4' => decode_socket_packet(rest).map(EnginePacket::Message),
        '6' => Ok(EnginePacket::Noop),
        other => Err(ProtocolError::UnknownPacketType {
            layer: "engine.io",
            kind: other,
        }),
    }
}

fn decode_socket_packet(text: &str) -> Result<SocketPacket, ProtocolError> {
    let mut chars = text.chars();
    let kind = chars.next().ok_or(ProtocolError::EmptyFrame)?;
    let body = skip_namespace(chars.as_str());

    match kind {
        '0' => Ok(SocketPacket::Connect(parse_optional_json(body)?)),
        '1' => Ok(SocketPacket::Disconnect),
        '2' => {
            let (ack_id, json) = split_ack_id(body)?;
            let args = parse_args(json)?;
            let mut args = args.into_iter();
            let name = match args.next() {
                Some(Value::String(name)) => name,
                _ => {
                    return Err(ProtocolError::MalformedPayload {
                        reason: "event without a name".to_string(),
                    })
                }
            };
            Ok(SocketPacket::Event {
                name,
                data: args_to_data(args.collect()),
                ack_id,
            })
        }
        '3' => {
            let (ack_id, json) = split_ack_id(body)?;
            let ack_id = ack_id.ok_or_else(|| ProtocolError::InvalidAckId {
                raw: body.to_string(),
            })?;
            Ok(SocketPacket::Ack {
                ack_id,
                data: args_to_data(parse_args(json)?),
            })
        }
        '4' => Ok(SocketPacket::ConnectError(
            parse_optional_json(body)?.unwrap_or(Value::Null),
        )),
        other => Err(ProtocolError::UnknownPacketType {
            layer: "socket.io",
            kind: other,
        }),
    }
}

/// Skip a `/namespace,` prefix if present
fn skip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(pos) => &body[pos + 1..],
            None => "",
        }
    } else {
        body
    }
}

/// Split the leading decimal ack id from the JSON body
fn split_ack_id(body: &str) -> Result<(Option<u64>, &str), ProtocolError> {
    let digits = body.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return Ok((None, body));
    }
    let (raw, json) = body.split_at(digits);
    let id = raw.parse::<u64>().map_err(|_| ProtocolError::InvalidAckId {
        raw: raw.to_string(),
    })?;
    Ok((Some(id), json))
}

fn parse_optional_json(body: &str) -> Result<Option<Value>, ProtocolError> {
    if body.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| ProtocolError::MalformedPayload {
            reason: e.to_string(),
        })
}

fn parse_args(json: &str) -> Result<Vec<Value>, ProtocolError> {
    match parse_optional_json(json)? {
        None => Ok(Vec::new()),
        Some(Value::Array(args)) => Ok(args),
        Some(_) => Err(ProtocolError::MalformedPayload {
            reason: "packet data is not an array".to_string(),
        }),
    }
}
