//! In-process loopback transport
//!
//! [`loopback`] returns a connected transport/controller pair. The controller
//! half plays the role of the hardware controller: it accepts links, runs the
//! session handshake, reads commands and emits events. It speaks the same
//! frames as a real controller, so the channel client cannot tell the
//! difference.

use async_trait::async_trait;
use belugakit_core::ConnectionError;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

use super::{Transport, TransportLink};
use crate::protocol::{decode_frame, encode_frame, EnginePacket, OpenHandshake, SocketPacket};

/// Create a loopback transport and the controller end it connects to
pub fn loopback() -> (LoopbackTransport, LoopbackController) {
    let (accept_tx, accept_rx) = mpsc::unbounded_channel();
    let refusing = Arc::new(AtomicBool::new(false));
    (
        LoopbackTransport {
            accept_tx,
            refusing: refusing.clone(),
        },
        LoopbackController {
            accept_rx,
            refusing,
        },
    )
}

/// Client half of the loopback pair
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    accept_tx: mpsc::UnboundedSender<ControllerLink>,
    refusing: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, ConnectionError> {
        let refused = |reason: &str| ConnectionError::ConnectionRefused {
            url: endpoint.to_string(),
            reason: reason.to_string(),
        };

        if self.refusing.load(Ordering::SeqCst) {
            return Err(refused("controller is refusing connections"));
        }

        let (to_controller, from_client) = mpsc::unbounded_channel();
        let (to_client, from_controller) = mpsc::unbounded_channel();

        self.accept_tx
            .send(ControllerLink {
                to_client,
                from_client,
            })
            .map_err(|_| refused("controller is gone"))?;

        Ok(TransportLink {
            outbound: to_controller,
            inbound: from_controller,
        })
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

/// Controller half of the loopback pair
#[derive(Debug)]
pub struct LoopbackController {
    accept_rx: mpsc::UnboundedReceiver<ControllerLink>,
    refusing: Arc<AtomicBool>,
}

impl LoopbackController {
    /// Wait for the client to open a link
    pub async fn accept(&mut self) -> Option<ControllerLink> {
        self.accept_rx.recv().await
    }

    /// Accept a link and complete the session handshake on it
    pub async fn accept_session(&mut self) -> Option<ControllerLink> {
        let mut link = self.accept().await?;
        link.handshake().await.ok()?;
        Some(link)
    }

    /// Make subsequent open attempts fail (or succeed again)
    pub fn refuse_connections(&self, refuse: bool) {
        self.refusing.store(refuse, Ordering::SeqCst);
    }
}

/// A command event received by the loopback controller
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingCommand {
    /// Command event name
    pub name: String,
    /// Command payload
    pub data: Value,
    /// Acknowledgement id, when the client asked for one
    pub ack_id: Option<u64>,
}

impl IncomingCommand {
    /// Read a string field from the payload
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.data.get(field).and_then(Value::as_str)
    }
}

/// One accepted link, seen from the controller side
#[derive(Debug)]
pub struct ControllerLink {
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl ControllerLink {
    /// Handshake advertised by the loopback controller; it never pings
    pub fn default_handshake() -> OpenHandshake {
        OpenHandshake {
            sid: "loopback".to_string(),
            upgrades: Vec::new(),
            ping_interval: 3_600_000,
            ping_timeout: 60_000,
            max_payload: None,
        }
    }

    /// Run the server side of the session handshake
    pub async fn handshake(&mut self) -> Result<(), ConnectionError> {
        self.handshake_with(Self::default_handshake()).await
    }

    /// Run the handshake advertising a custom heartbeat
    pub async fn handshake_with(&mut self, open: OpenHandshake) -> Result<(), ConnectionError> {
        let sid = open.sid.clone();
        self.send_packet(&EnginePacket::Open(open));

        loop {
            match self.recv_packet().await {
                Some(EnginePacket::Message(SocketPacket::Connect(_))) => break,
                Some(_) => continue,
                None => {
                    return Err(ConnectionError::HandshakeFailed {
                        reason: "client went away".to_string(),
                    })
                }
            }
        }

        self.send_packet(&EnginePacket::Message(SocketPacket::Connect(Some(
            serde_json::json!({ "sid": sid }),
        ))));
        Ok(())
    }

    /// Send a raw packet; returns false once the client is gone
    pub fn send_packet(&self, packet: &EnginePacket) -> bool {
        self.to_client.send(encode_frame(packet)).is_ok()
    }

    /// Send a raw text frame
    pub fn send_raw(&self, frame: impl Into<String>) -> bool {
        self.to_client.send(frame.into()).is_ok()
    }

    /// Emit a named event to the client
    pub fn emit(&self, name: &str, data: Value) -> bool {
        self.send_packet(&EnginePacket::event(name, data, None))
    }

    /// Acknowledge a command that requested an acknowledgement
    pub fn ack(&self, ack_id: u64, data: Value) -> bool {
        self.send_packet(&EnginePacket::Message(SocketPacket::Ack { ack_id, data }))
    }

    /// Send a heartbeat ping
    pub fn ping(&self) -> bool {
        self.send_packet(&EnginePacket::Ping)
    }

    /// Receive the next decodable packet from the client
    pub async fn recv_packet(&mut self) -> Option<EnginePacket> {
        loop {
            let frame = self.from_client.recv().await?;
            match decode_frame(&frame) {
                Ok(packet) => return Some(packet),
                Err(e) => tracing::warn!("Loopback controller dropped frame: {}", e),
            }
        }
    }

    /// Receive the next command event, skipping heartbeats
    pub async fn next_command(&mut self) -> Option<IncomingCommand> {
        loop {
            if let EnginePacket::Message(SocketPacket::Event { name, data, ack_id }) =
                self.recv_packet().await?
            {
                return Some(IncomingCommand { name, data, ack_id });
            }
        }
    }

    /// Take a command event that has already arrived, without waiting
    pub fn try_next_command(&mut self) -> Option<IncomingCommand> {
        while let Ok(frame) = self.from_client.try_recv() {
            if let Ok(EnginePacket::Message(SocketPacket::Event { name, data, ack_id })) =
                decode_frame(&frame)
            {
                return Some(IncomingCommand { name, data, ack_id });
            }
        }
        None
    }

    /// Close the transport from the controller side
    pub fn close(self) {
        let _ = self.to_client.send(encode_frame(&EnginePacket::Close));
    }
}
