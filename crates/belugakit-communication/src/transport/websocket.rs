//! WebSocket transport
//!
//! Bridges a tokio-tungstenite stream onto the channel pair of a
//! [`TransportLink`] with one writer task and one reader task.

use async_trait::async_trait;
use belugakit_core::ConnectionError;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use super::{Transport, TransportLink};

/// Transport that dials the controller over WebSocket
#[derive(Debug, Clone, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    /// Create a new WebSocket transport
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, ConnectionError> {
        let (stream, _response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(|e| ConnectionError::ConnectionRefused {
                url: endpoint.to_string(),
                reason: e.to_string(),
            })?;
        tracing::debug!("WebSocket open to {}", endpoint);

        let (mut write, mut read) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<String>();

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = write.send(Message::Text(frame)).await {
                    tracing::warn!("WebSocket send failed: {}", e);
                    break;
                }
            }
            let _ = write.close().await;
        });

        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::debug!("WebSocket closed by peer: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("WebSocket receive failed: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(TransportLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}
