//! # BelugaKit Communication
//!
//! The console's side of the controller channel.
//! Provides the wire codec and transports, the channel client, command
//! correlation, the device control facade, and the streaming scan session.

pub mod channel;
pub mod correlator;
pub mod device;
pub mod protocol;
pub mod scan;
pub mod transport;

pub use channel::{ChannelClient, ChannelConfig, PendingAck, DEFAULT_BASE_URL};
pub use correlator::{CommandSpec, CorrelationId, Correlator, IdField};
pub use device::{
    CommandTimeouts, DeviceController, RunRequest, RunStarted, ToggleDevice, WifiNetwork,
    WifiStatus,
};
pub use scan::{
    ScanCompletion, ScanCounts, ScanProgress, ScanResult, ScanSession, SlotReading,
    DEFAULT_SCAN_TIMEOUT,
};
pub use transport::{
    endpoint_url, loopback, ControllerLink, IncomingCommand, LoopbackController,
    LoopbackTransport, Transport, TransportLink, WebSocketTransport,
};
