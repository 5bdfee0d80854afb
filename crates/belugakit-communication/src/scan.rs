//! Streaming barcode scan session
//!
//! A scan is a long-running controller operation: one start command, any
//! number of progress events, then exactly one terminal event. Only one scan
//! may be pending per session object. The pending scan lives in a single
//! `Option` slot; a second `start` while the slot is occupied fails before
//! anything is sent.

use belugakit_core::{
    lifecycle, thread_safe_none, ChannelEvent, CommandError, CommandResult, DataCallback,
    EventFilter, SharedCallback, SubscriptionGuard, ThreadSafeOption,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::channel::ChannelClient;
use crate::correlator::{remote_message, with_field, CorrelationId};

/// Scan event and command names
pub mod events {
    /// Start scanning the rack
    pub const START: &str = "start_barcode_scan";
    /// Stop the scan in progress
    pub const STOP: &str = "stop_barcode_scan";
    /// Forget the current rack contents
    pub const RESET_RACK: &str = "reset_rack";
    /// Ask for a progress report
    pub const GET_PROGRESS: &str = "get_progress";

    /// Scan accepted; earlier slot readings are stale
    pub const STARTED: &str = "scan_started";
    /// Progress counters
    pub const PROGRESS: &str = "progress";
    /// A batch of slot readings
    pub const BATCH_UPDATE: &str = "batch_update";
    /// Scan finished
    pub const COMPLETE: &str = "scan_complete";
    /// Scan stopped on request
    pub const STOPPED: &str = "scan_stopped";
    /// Controller gave up waiting for the scanner
    pub const TIMEOUT: &str = "scan_timeout";
    /// Scan failed
    pub const ERROR: &str = "scan_error";
}

/// Payload field carrying the session id
pub const SCAN_ID_FIELD: &str = "scan_id";

/// Default client-side budget for a whole scan
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(600);

const OPERATION: &str = "barcode scan";

/// Progress counters reported during a scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanCounts {
    /// Slots scanned so far
    #[serde(default)]
    pub mapped_slots: u32,
    /// Slots holding a sample
    #[serde(default)]
    pub sample_count: u32,
    /// Slots found empty
    #[serde(default)]
    pub empty_count: u32,
    /// Slots still to scan
    #[serde(default)]
    pub remaining: u32,
}

/// One rack slot as read by the scanner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotReading {
    /// Slot number
    pub slot: u32,
    /// Barcode, if a tube was found
    #[serde(default)]
    pub barcode: Option<String>,
    /// Any further fields the controller reports
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

/// A progress notification
#[derive(Debug, Clone, PartialEq)]
pub enum ScanProgress {
    /// Counter update
    Counts(ScanCounts),
    /// New slot readings
    Slots(Vec<SlotReading>),
}

/// How a successful scan ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanCompletion {
    /// Every slot was scanned
    Completed,
    /// Stopped on request
    Stopped,
    /// The controller timed out; slots hold partial results
    ControllerTimeout,
}

/// Outcome of a scan
#[derive(Debug, Clone, PartialEq)]
pub struct ScanResult {
    /// How the scan ended
    pub completion: ScanCompletion,
    /// Slot readings in slot order
    pub slots: Vec<SlotReading>,
    /// Payload of the terminal event
    pub summary: Value,
}

struct PendingScan {
    session_id: CorrelationId,
    resolver: Option<oneshot::Sender<CommandResult<ScanResult>>>,
    on_progress: Option<SharedCallback<ScanProgress>>,
    slots: BTreeMap<u32, SlotReading>,
}

type ScanSlot = ThreadSafeOption<PendingScan>;

/// Whether an event belongs to `session_id`
///
/// Events without a scan id are accepted.
fn belongs_to(event: &ChannelEvent, session_id: &CorrelationId) -> bool {
    match event.str_field(SCAN_ID_FIELD) {
        Some(id) => id == session_id.as_str(),
        None => true,
    }
}

/// Parse slot readings from an array payload or an object with `slots`
fn parse_slots(payload: &Value) -> Vec<SlotReading> {
    let items = match payload {
        Value::Array(items) => items.as_slice(),
        Value::Object(object) => match object.get("slots") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => std::slice::from_ref(payload),
        },
        _ => &[],
    };
    items
        .iter()
        .filter_map(|item| match serde_json::from_value(item.clone()) {
            Ok(reading) => Some(reading),
            Err(e) => {
                tracing::debug!("Skipping unreadable slot entry: {}", e);
                None
            }
        })
        .collect()
}

/// Progress callback of the live session, if the event belongs to it
fn live_callback(slot: &ScanSlot, event: &ChannelEvent) -> Option<SharedCallback<ScanProgress>> {
    let pending = slot.lock();
    let pending = pending.as_ref()?;
    if pending.resolver.is_none() || !belongs_to(event, &pending.session_id) {
        return None;
    }
    pending.on_progress.clone()
}

/// Settle the live session once
fn settle<F>(slot: &ScanSlot, event: &ChannelEvent, outcome: F)
where
    F: FnOnce(&mut PendingScan) -> CommandResult<ScanResult>,
{
    let mut guard = slot.lock();
    let Some(pending) = guard.as_mut() else {
        tracing::debug!("{} with no scan pending", event.name);
        return;
    };
    if !belongs_to(event, &pending.session_id) {
        tracing::debug!("{} for another scan", event.name);
        return;
    }
    let Some(tx) = pending.resolver.take() else {
        return;
    };
    let _ = tx.send(outcome(pending));
}

fn finished(pending: &mut PendingScan, completion: ScanCompletion, summary: &Value) -> ScanResult {
    let slots = std::mem::take(&mut pending.slots).into_values().collect();
    ScanResult {
        completion,
        slots,
        summary: summary.clone(),
    }
}

/// Removes the session's handlers and frees the slot on every exit path
struct SessionCleanup {
    slot: ScanSlot,
    session_id: CorrelationId,
    handlers: SubscriptionGuard,
}

impl Drop for SessionCleanup {
    fn drop(&mut self) {
        self.handlers.release();
        let mut slot = self.slot.lock();
        if slot
            .as_ref()
            .is_some_and(|pending| pending.session_id == self.session_id)
        {
            *slot = None;
        }
    }
}

/// Single-flight streaming scan session
#[derive(Clone)]
pub struct ScanSession {
    channel: ChannelClient,
    slot: ScanSlot,
    timeout: Duration,
}

impl ScanSession {
    /// Create a session with the default ten minute budget
    pub fn new(channel: ChannelClient) -> Self {
        Self::with_timeout(channel, DEFAULT_SCAN_TIMEOUT)
    }

    /// Create a session with a custom client-side budget
    pub fn with_timeout(channel: ChannelClient, timeout: Duration) -> Self {
        Self {
            channel,
            slot: thread_safe_none(),
            timeout,
        }
    }

    /// Whether a scan is pending
    pub fn is_active(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Start a scan and wait for it to end
    ///
    /// `on_progress` receives every progress notification until the scan
    /// settles. Fails with [`CommandError::AlreadyInProgress`] if a scan is
    /// pending and with [`CommandError::NotConnected`] if the channel is down;
    /// in both cases nothing is sent.
    pub async fn start(
        &self,
        payload: Value,
        on_progress: Option<DataCallback<ScanProgress>>,
    ) -> CommandResult<ScanResult> {
        let session_id = CorrelationId::generate("scan");
        let (tx, rx) = oneshot::channel();

        {
            let mut slot = self.slot.lock();
            if slot.is_some() {
                tracing::warn!("Scan requested while another is in progress");
                return Err(CommandError::AlreadyInProgress {
                    operation: OPERATION.to_string(),
                });
            }
            if !self.channel.is_connected() {
                return Err(CommandError::NotConnected);
            }
            *slot = Some(PendingScan {
                session_id: session_id.clone(),
                resolver: Some(tx),
                on_progress: on_progress.map(Arc::from),
                slots: BTreeMap::new(),
            });
        }

        let mut cleanup = SessionCleanup {
            slot: self.slot.clone(),
            session_id: session_id.clone(),
            handlers: SubscriptionGuard::new(self.channel.bus()),
        };
        self.register_handlers(&mut cleanup.handlers);

        let payload = with_field(payload, SCAN_ID_FIELD, session_id.as_str());
        self.channel.send(events::START, payload)?;
        tracing::info!("Barcode scan {} started", session_id);

        let outcome = match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CommandError::Disconnected {
                operation: OPERATION.to_string(),
            }),
            Err(_) => {
                tracing::warn!(
                    "Barcode scan {} timed out after {}ms",
                    session_id,
                    self.timeout.as_millis()
                );
                Err(CommandError::Timeout {
                    command: events::START.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        };

        drop(cleanup);
        match &outcome {
            Ok(result) => tracing::info!(
                "Barcode scan {} ended ({:?}, {} slots)",
                session_id,
                result.completion,
                result.slots.len()
            ),
            Err(e) => tracing::warn!("Barcode scan {} failed: {}", session_id, e),
        }
        outcome
    }

    fn register_handlers(&self, handlers: &mut SubscriptionGuard) {
        let slot = self.slot.clone();
        handlers.subscribe(EventFilter::event(events::PROGRESS), move |event| {
            let Some(callback) = live_callback(&slot, event) else {
                return;
            };
            match serde_json::from_value::<ScanCounts>(event.payload.clone()) {
                Ok(counts) => callback(ScanProgress::Counts(counts)),
                Err(e) => tracing::debug!("Unreadable progress payload: {}", e),
            }
        });

        let slot = self.slot.clone();
        handlers.subscribe(EventFilter::event(events::BATCH_UPDATE), move |event| {
            let readings = parse_slots(&event.payload);
            let callback = {
                let mut guard = slot.lock();
                let Some(pending) = guard.as_mut() else {
                    return;
                };
                if pending.resolver.is_none() || !belongs_to(event, &pending.session_id) {
                    return;
                }
                for reading in &readings {
                    pending.slots.insert(reading.slot, reading.clone());
                }
                pending.on_progress.clone()
            };
            if let Some(callback) = callback {
                callback(ScanProgress::Slots(readings));
            }
        });

        let slot = self.slot.clone();
        handlers.subscribe(EventFilter::event(events::STARTED), move |event| {
            if let Some(pending) = slot.lock().as_mut() {
                if belongs_to(event, &pending.session_id) {
                    pending.slots.clear();
                }
            }
        });

        let terminal = [
            (events::COMPLETE, ScanCompletion::Completed),
            (events::STOPPED, ScanCompletion::Stopped),
            (events::TIMEOUT, ScanCompletion::ControllerTimeout),
        ];
        for (name, completion) in terminal {
            let slot = self.slot.clone();
            handlers.subscribe(EventFilter::event(name), move |event| {
                settle(&slot, event, |pending| {
                    Ok(finished(pending, completion, &event.payload))
                });
            });
        }

        let slot = self.slot.clone();
        handlers.subscribe(EventFilter::event(events::ERROR), move |event| {
            settle(&slot, event, |_| {
                Err(CommandError::RemoteError {
                    command: events::START.to_string(),
                    message: remote_message(&event.payload, "Barcode scan failed"),
                })
            });
        });

        let slot = self.slot.clone();
        handlers.subscribe(EventFilter::event(lifecycle::DISCONNECT), move |event| {
            settle(&slot, event, |_| {
                Err(CommandError::Disconnected {
                    operation: OPERATION.to_string(),
                })
            });
        });
    }

    /// Ask the controller to stop the scan; the pending scan ends with its reply
    pub fn request_stop(&self) -> CommandResult<()> {
        self.channel.send(events::STOP, Value::Null)
    }

    /// Ask the controller to forget the rack contents
    pub fn reset_rack(&self) -> CommandResult<()> {
        self.channel.send(events::RESET_RACK, Value::Null)
    }

    /// Ask the controller for a progress report
    pub fn request_progress(&self) -> CommandResult<()> {
        self.channel.send(events::GET_PROGRESS, Value::Null)
    }
}

impl std::fmt::Debug for ScanSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanSession")
            .field("active", &self.is_active())
            .field("timeout", &self.timeout)
            .finish()
    }
}
