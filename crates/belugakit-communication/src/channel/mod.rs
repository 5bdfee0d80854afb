//! Controller channel client
//!
//! Owns the single duplex connection to the hardware controller:
//!
//! - Connects in the background and reconnects with a fixed delay, up to a
//!   bounded number of attempts
//! - Publishes every incoming event on the [`EventBus`] by name
//! - Publishes `connect`, `disconnect` and `reconnect_failed` lifecycle events
//!   on the same bus
//! - Sends named command events, optionally requesting an acknowledgement
//!
//! Sending never queues while the channel is down; it fails with
//! [`CommandError::NotConnected`] instead.

mod supervisor;

use belugakit_core::{
    thread_safe_map, ChannelEvent, CommandError, CommandResult, ConnectionError, ConnectionState,
    EventBus, EventFilter, Result, SubscriptionId, ThreadSafeMap,
};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::protocol::{encode_frame, EnginePacket};
use crate::transport::{endpoint_url, Transport, WebSocketTransport};

/// Default controller address
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Connection settings for the channel client
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Base URL of the controller, e.g. `http://localhost:8000`
    pub base_url: String,
    /// Reconnect attempts after the first failure before giving up
    pub reconnect_attempts: u32,
    /// Fixed delay between reconnect attempts
    pub reconnect_delay: Duration,
    /// Budget for opening the transport and completing the handshake
    pub connect_timeout: Duration,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(1000),
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

impl ChannelConfig {
    /// Create a configuration for `base_url` with default timings
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// Set the reconnect policy
    pub fn with_reconnect(mut self, attempts: u32, delay: Duration) -> Self {
        self.reconnect_attempts = attempts;
        self.reconnect_delay = delay;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

pub(crate) struct ChannelInner {
    config: ChannelConfig,
    transport: Arc<dyn Transport>,
    bus: EventBus,
    state: watch::Sender<ConnectionState>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    acks: ThreadSafeMap<u64, oneshot::Sender<Value>>,
    next_ack: AtomicU64,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ChannelInner {
    fn set_state(&self, next: ConnectionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            if !previous.can_transition_to(next) {
                tracing::warn!("Unexpected connection transition {} -> {}", previous, next);
            }
            tracing::debug!("Connection state {} -> {}", previous, next);
        }
    }

    fn attach(&self, outbound: mpsc::UnboundedSender<String>) {
        *self.outbound.lock() = Some(outbound);
        self.set_state(ConnectionState::Connected);
    }

    /// Drop the link and fail every pending acknowledgement
    fn detach(&self) {
        self.outbound.lock().take();
        self.set_state(ConnectionState::Disconnected);
        let dropped = {
            let mut acks = self.acks.lock();
            let count = acks.len();
            acks.clear();
            count
        };
        if dropped > 0 {
            tracing::debug!("Abandoned {} pending acknowledgements", dropped);
        }
    }

    fn write_frame(&self, packet: &EnginePacket) -> bool {
        match self.outbound.lock().as_ref() {
            Some(tx) => tx.send(encode_frame(packet)).is_ok(),
            None => false,
        }
    }

    fn resolve_ack(&self, ack_id: u64, data: Value) {
        let pending = self.acks.lock().remove(&ack_id);
        match pending {
            Some(tx) => {
                let _ = tx.send(data);
            }
            None => tracing::debug!("Dropping acknowledgement {} with no pending call", ack_id),
        }
    }
}

/// Client for the controller channel
///
/// Cloning is cheap; clones share one connection.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ChannelInner>,
}

impl ChannelClient {
    /// Create a client on its own event bus
    pub fn new(config: ChannelConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_bus(config, transport, EventBus::new())
    }

    /// Create a client that dials the controller over WebSocket
    pub fn websocket(config: ChannelConfig) -> Self {
        Self::new(config, Arc::new(WebSocketTransport::new()))
    }

    /// Create a client publishing onto an existing bus
    pub fn with_bus(config: ChannelConfig, transport: Arc<dyn Transport>, bus: EventBus) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ChannelInner {
                config,
                transport,
                bus,
                state,
                outbound: Mutex::new(None),
                acks: thread_safe_map(),
                next_ack: AtomicU64::new(0),
                supervisor: Mutex::new(None),
            }),
        }
    }

    /// Start connecting in the background
    ///
    /// Returns immediately. Calling it while a connection (or reconnect
    /// cycle) is running does nothing. Only an unusable base URL fails here;
    /// connection failures surface as lifecycle events.
    pub fn connect(&self) -> Result<()> {
        let mut supervisor = self.inner.supervisor.lock();
        if let Some(handle) = supervisor.as_ref() {
            if !handle.is_finished() {
                tracing::debug!("Connect requested while already running");
                return Ok(());
            }
        }

        let endpoint = endpoint_url(&self.inner.config.base_url)?;
        tracing::info!(
            "Connecting to controller at {} via {}",
            endpoint,
            self.inner.transport.name()
        );
        *supervisor = Some(tokio::spawn(supervisor::run(self.inner.clone(), endpoint)));
        Ok(())
    }

    /// Wait until the channel reports connected
    pub async fn wait_connected(&self, timeout: Duration) -> std::result::Result<(), ConnectionError> {
        let mut state = self.inner.state.subscribe();
        let outcome = tokio::time::timeout(timeout, state.wait_for(|s| s.is_connected()))
            .await
            .map(|reached| reached.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ConnectionError::ConnectionLost {
                reason: "channel closed".to_string(),
            }),
            Err(_) => Err(ConnectionError::ConnectionTimeout {
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    /// Close the connection and stop reconnecting
    pub fn disconnect(&self) {
        if let Some(handle) = self.inner.supervisor.lock().take() {
            handle.abort();
        }

        let was_up = *self.inner.state.borrow() != ConnectionState::Disconnected;
        self.inner.detach();
        if was_up {
            tracing::info!("Disconnected from controller");
            self.inner.bus.publish(ChannelEvent::lifecycle(
                belugakit_core::lifecycle::DISCONNECT,
                "client disconnect",
            ));
        }
    }

    /// Send a named event without waiting for any reply
    pub fn send(&self, event: &str, payload: Value) -> CommandResult<()> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }
        if self
            .inner
            .write_frame(&EnginePacket::event(event, payload, None))
        {
            tracing::trace!("Sent {}", event);
            Ok(())
        } else {
            Err(CommandError::NotConnected)
        }
    }

    /// Send a named event requesting an acknowledgement from the controller
    ///
    /// The returned [`PendingAck`] resolves with the acknowledgement data.
    /// Dropping it forgets the acknowledgement.
    pub fn send_with_ack(&self, event: &str, payload: Value) -> CommandResult<PendingAck> {
        if !self.is_connected() {
            return Err(CommandError::NotConnected);
        }

        let ack_id = self.inner.next_ack.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.acks.lock().insert(ack_id, tx);
        let pending = PendingAck {
            ack_id,
            rx,
            acks: self.inner.acks.clone(),
        };

        if self
            .inner
            .write_frame(&EnginePacket::event(event, payload, Some(ack_id)))
        {
            tracing::trace!("Sent {} awaiting ack {}", event, ack_id);
            Ok(pending)
        } else {
            Err(CommandError::NotConnected)
        }
    }

    /// Register a handler for a named event
    pub fn on<F>(&self, event: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(EventFilter::event(event), handler)
    }

    /// Remove exactly the handler registered under `id`
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.inner.bus.unsubscribe(id)
    }

    /// Whether the channel is currently connected
    pub fn is_connected(&self) -> bool {
        self.inner.state.borrow().is_connected()
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Watch connection state changes
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Receive every published event asynchronously
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.bus.receiver()
    }

    /// The bus events are published on
    pub fn bus(&self) -> &EventBus {
        &self.inner.bus
    }

    /// Connection settings
    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Number of acknowledgements still awaited
    pub fn pending_acks(&self) -> usize {
        self.inner.acks.lock().len()
    }
}

impl std::fmt::Debug for ChannelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelClient")
            .field("base_url", &self.inner.config.base_url)
            .field("state", &self.state())
            .finish()
    }
}

/// An acknowledgement awaited from the controller
#[derive(Debug)]
pub struct PendingAck {
    ack_id: u64,
    rx: oneshot::Receiver<Value>,
    acks: ThreadSafeMap<u64, oneshot::Sender<Value>>,
}

impl PendingAck {
    /// Acknowledgement id sent with the command
    pub fn id(&self) -> u64 {
        self.ack_id
    }

    /// Wait for the acknowledgement
    ///
    /// Returns `None` if the connection dropped first.
    pub async fn wait(mut self) -> Option<Value> {
        (&mut self.rx).await.ok()
    }
}

impl Drop for PendingAck {
    fn drop(&mut self) {
        self.acks.lock().remove(&self.ack_id);
    }
}
