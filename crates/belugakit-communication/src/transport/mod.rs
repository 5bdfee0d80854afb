//! Transports for the controller channel
//!
//! A transport opens one duplex link of text frames to the controller. The
//! channel client owns framing, handshake, and reconnection; the transport
//! only moves frames.
//!
//! - [`WebSocketTransport`] dials the controller over WebSocket
//! - [`LoopbackTransport`] connects to an in-process [`LoopbackController`],
//!   used by tests and demos

mod loopback;
mod websocket;

pub use loopback::{loopback, ControllerLink, IncomingCommand, LoopbackController, LoopbackTransport};
pub use websocket::WebSocketTransport;

use async_trait::async_trait;
use belugakit_core::ConnectionError;
use tokio::sync::mpsc;
use url::Url;

/// Path the controller serves its event endpoint on
pub const ENDPOINT_PATH: &str = "/socket.io/";

/// One open link to the controller
///
/// Dropping `outbound` closes the link. `inbound` yields `None` once the
/// controller side has gone away.
#[derive(Debug)]
pub struct TransportLink {
    /// Frames to the controller
    pub outbound: mpsc::UnboundedSender<String>,
    /// Frames from the controller
    pub inbound: mpsc::UnboundedReceiver<String>,
}

/// Transport trait
///
/// Implementations dial the controller and hand back a [`TransportLink`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a new link to `endpoint`
    async fn open(&self, endpoint: &Url) -> Result<TransportLink, ConnectionError>;

    /// Transport name for logging
    fn name(&self) -> &'static str;
}

/// Build the event endpoint URL from the controller's base URL
///
/// `http` and `https` map to `ws` and `wss`. A bare host gets the default
/// endpoint path; an explicit path is kept.
pub fn endpoint_url(base_url: &str) -> Result<Url, ConnectionError> {
    let invalid = |reason: &str| ConnectionError::InvalidUrl {
        url: base_url.to_string(),
        reason: reason.to_string(),
    };

    let mut url = Url::parse(base_url).map_err(|e| invalid(&e.to_string()))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        _ => return Err(invalid("expected an http, https, ws or wss URL")),
    };
    url.set_scheme(scheme)
        .map_err(|_| invalid("scheme could not be changed"))?;

    if url.host_str().is_none() {
        return Err(invalid("missing host"));
    }

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(ENDPOINT_PATH);
    }
    url.set_query(Some("EIO=4&transport=websocket"));
    url.set_fragment(None);

    Ok(url)
}
