//! Connection supervisor
//!
//! Background task that dials the controller, runs the session handshake,
//! pumps incoming frames onto the bus, and reconnects after failures.

use belugakit_core::{lifecycle, ChannelEvent, ConnectionError, ConnectionState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

use super::ChannelInner;
use crate::protocol::{decode_frame, encode_frame, EnginePacket, SocketPacket};

/// An established session
struct Session {
    sid: String,
    outbound: mpsc::UnboundedSender<String>,
    inbound: mpsc::UnboundedReceiver<String>,
    heartbeat: Duration,
}

pub(super) async fn run(inner: Arc<ChannelInner>, endpoint: Url) {
    let attempts = inner.config.reconnect_attempts;
    let delay = inner.config.reconnect_delay;
    let mut retries: u32 = 0;

    loop {
        inner.set_state(ConnectionState::Connecting);

        match establish(&inner, &endpoint).await {
            Ok(session) => {
                retries = 0;
                inner.attach(session.outbound);
                tracing::info!("Connected to controller at {} (sid {})", endpoint, session.sid);
                inner.bus.publish(ChannelEvent::new(
                    lifecycle::CONNECT,
                    json!({ "sid": session.sid }),
                ));

                let reason = pump(&inner, session.inbound, session.heartbeat).await;

                inner.detach();
                tracing::warn!("Controller connection lost: {}", reason);
                inner
                    .bus
                    .publish(ChannelEvent::lifecycle(lifecycle::DISCONNECT, reason));
            }
            Err(e) => {
                inner.set_state(ConnectionState::Disconnected);
                tracing::warn!("Connection attempt to {} failed: {}", endpoint, e);
            }
        }

        retries += 1;
        if retries > attempts {
            tracing::error!(
                "Giving up on controller at {} after {} reconnect attempts",
                endpoint,
                attempts
            );
            inner.bus.publish(ChannelEvent::lifecycle(
                lifecycle::RECONNECT_FAILED,
                format!("no connection after {} attempts", attempts),
            ));
            return;
        }

        tracing::info!(
            "Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            retries,
            attempts
        );
        tokio::time::sleep(delay).await;
    }
}

/// Open the transport and run the handshake within the connect budget
async fn establish(inner: &ChannelInner, endpoint: &Url) -> Result<Session, ConnectionError> {
    let budget = inner.config.connect_timeout;
    match tokio::time::timeout(budget, handshake(inner, endpoint)).await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::ConnectionTimeout {
            timeout_ms: budget.as_millis() as u64,
        }),
    }
}

async fn handshake(inner: &ChannelInner, endpoint: &Url) -> Result<Session, ConnectionError> {
    let link = inner.transport.open(endpoint).await?;
    let outbound = link.outbound;
    let mut inbound = link.inbound;

    let closed = || ConnectionError::ConnectionLost {
        reason: "transport closed during handshake".to_string(),
    };
    let send = |packet: EnginePacket| {
        outbound
            .send(encode_frame(&packet))
            .map_err(|_| closed())
    };

    let open = loop {
        let frame = inbound.recv().await.ok_or_else(closed)?;
        match decode_frame(&frame) {
            Ok(EnginePacket::Open(open)) => break open,
            Ok(EnginePacket::Noop) => continue,
            Ok(other) => {
                return Err(ConnectionError::HandshakeFailed {
                    reason: format!("expected open packet, got {:?}", other),
                })
            }
            Err(e) => {
                return Err(ConnectionError::HandshakeFailed {
                    reason: e.to_string(),
                })
            }
        }
    };

    send(EnginePacket::Message(SocketPacket::Connect(None)))?;

    loop {
        let frame = inbound.recv().await.ok_or_else(closed)?;
        match decode_frame(&frame) {
            Ok(EnginePacket::Message(SocketPacket::Connect(_))) => break,
            Ok(EnginePacket::Message(SocketPacket::ConnectError(data))) => {
                return Err(ConnectionError::HandshakeFailed {
                    reason: format!("controller refused session: {}", data),
                })
            }
            Ok(EnginePacket::Ping) => send(EnginePacket::Pong)?,
            Ok(EnginePacket::Close) => return Err(closed()),
            Ok(_) => continue,
            Err(e) => tracing::debug!("Ignoring frame during handshake: {}", e),
        }
    }

    Ok(Session {
        sid: open.sid.clone(),
        heartbeat: open.heartbeat_window(),
        outbound,
        inbound,
    })
}

/// Pump frames until the link ends; returns why it ended
async fn pump(
    inner: &ChannelInner,
    mut inbound: mpsc::UnboundedReceiver<String>,
    heartbeat: Duration,
) -> String {
    loop {
        let frame = match tokio::time::timeout(heartbeat, inbound.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return "transport closed".to_string(),
            Err(_) => return format!("no heartbeat for {}ms", heartbeat.as_millis()),
        };

        let packet = match decode_frame(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                tracing::debug!("Dropping undecodable frame: {}", e);
                continue;
            }
        };

        match packet {
            EnginePacket::Ping => {
                inner.write_frame(&EnginePacket::Pong);
            }
            EnginePacket::Pong | EnginePacket::Noop | EnginePacket::Open(_) => {}
            EnginePacket::Close => return "controller closed the transport".to_string(),
            EnginePacket::Message(packet) => {
                if let Some(reason) = dispatch(inner, packet) {
                    return reason;
                }
            }
        }
    }
}

/// Route one Socket.IO packet; returns a reason if the session ended
fn dispatch(inner: &ChannelInner, packet: SocketPacket) -> Option<String> {
    match packet {
        SocketPacket::Event { name, data, ack_id } => {
            if lifecycle::is_lifecycle(&name) {
                tracing::warn!("Controller sent reserved event name {}; dropped", name);
                return None;
            }
            if let Some(id) = ack_id {
                tracing::debug!("Controller requested ack {} for {}; not supported", id, name);
            }
            let event = ChannelEvent::new(name.clone(), data);
            tracing::trace!("Received {}", event);
            if inner.bus.publish(event) == 0 {
                tracing::debug!("Unroutable event {}: no handler registered", name);
            }
            None
        }
        SocketPacket::Ack { ack_id, data } => {
            inner.resolve_ack(ack_id, data);
            None
        }
        SocketPacket::Connect(_) => None,
        SocketPacket::Disconnect => Some("controller ended the session".to_string()),
        SocketPacket::ConnectError(data) => Some(format!("controller rejected session: {}", data)),
    }
}
