//! Command correlation
//!
//! Turns a fire-and-forget command event into a call that completes once,
//! with the matching success event, the matching error event, or a timeout.
//!
//! Each call tags its payload with a fresh [`CorrelationId`] under the
//! command's id field (`control_id` or `request_id`). Replies are matched by
//! that id, so concurrent calls with the same reply event name never resolve
//! each other. Handlers belong to the call and are removed on every exit path,
//! including when the caller drops the future.

use belugakit_core::{
    ChannelEvent, CommandError, CommandResult, EventFilter, SubscriptionGuard, ThreadSafeOption,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::channel::ChannelClient;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier attached to one command invocation
///
/// Formatted `<prefix>_<unix millis>_<sequence>`. The sequence keeps ids
/// unique within a process even when two calls land in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Generate a fresh id with the given prefix
    pub fn generate(prefix: &str) -> Self {
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self(format!(
            "{}_{}_{}",
            prefix,
            Utc::now().timestamp_millis(),
            sequence
        ))
    }

    /// The id as sent on the wire
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `event` carries this id under `field`
    pub fn matches(&self, event: &ChannelEvent, field: IdField) -> bool {
        event.str_field(field.as_str()) == Some(self.as_str())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload field a command family carries its correlation id in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdField {
    /// Hardware control commands
    ControlId,
    /// Network management commands
    RequestId,
}

impl IdField {
    /// Field name on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            IdField::ControlId => "control_id",
            IdField::RequestId => "request_id",
        }
    }
}

/// Description of one request/reply command
#[derive(Debug, Clone, PartialEq)]
pub struct CommandSpec {
    /// Command event sent to the controller
    pub command: String,
    /// Event that completes the call
    pub success_event: String,
    /// Event that fails the call, if the command has one
    pub error_event: Option<String>,
    /// How long to wait for either
    pub timeout: Duration,
    /// Field carrying the correlation id
    pub id_field: IdField,
    /// Prefix of generated correlation ids
    pub id_prefix: String,
    /// Failure message used when the error event carries none
    pub failure_message: String,
}

impl CommandSpec {
    /// Describe `command` with a 10 second timeout keyed by `control_id`
    pub fn new(command: impl Into<String>, success_event: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            id_prefix: command.clone(),
            failure_message: format!("{} failed", command),
            command,
            success_event: success_event.into(),
            error_event: None,
            timeout: Duration::from_secs(10),
            id_field: IdField::ControlId,
        }
    }

    /// Set the error event
    pub fn with_error_event(mut self, event: impl Into<String>) -> Self {
        self.error_event = Some(event.into());
        self
    }

    /// Set the timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the id field and prefix
    pub fn with_id(mut self, field: IdField, prefix: impl Into<String>) -> Self {
        self.id_field = field;
        self.id_prefix = prefix.into();
        self
    }

    /// Set the fallback failure message
    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = message.into();
        self
    }
}

type Resolver = ThreadSafeOption<oneshot::Sender<CommandResult<Value>>>;

/// Settle a pending call once; later triggers find the slot empty
fn settle(resolver: &Resolver, outcome: CommandResult<Value>) -> bool {
    match resolver.lock().take() {
        Some(tx) => {
            let _ = tx.send(outcome);
            true
        }
        None => false,
    }
}

/// Failure message carried by an error event
pub(crate) fn remote_message(payload: &Value, fallback: &str) -> String {
    payload
        .get("error")
        .or_else(|| payload.get("message"))
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}

/// Insert `field: value` into an object payload
///
/// `Null` becomes an empty object first; any other non-object payload is
/// wrapped under `value`.
pub(crate) fn with_field(payload: Value, field: &str, value: &str) -> Value {
    let mut object = match payload {
        Value::Object(object) => object,
        Value::Null => Map::new(),
        other => {
            let mut object = Map::new();
            object.insert("value".to_string(), other);
            object
        }
    };
    object.insert(field.to_string(), Value::String(value.to_string()));
    Value::Object(object)
}

/// Correlates commands with their replies over a [`ChannelClient`]
#[derive(Debug, Clone)]
pub struct Correlator {
    channel: ChannelClient,
}

impl Correlator {
    /// Create a correlator on `channel`
    pub fn new(channel: ChannelClient) -> Self {
        Self { channel }
    }

    /// The underlying channel
    pub fn channel(&self) -> &ChannelClient {
        &self.channel
    }

    /// Send a command and wait for its correlated reply
    ///
    /// Resolves with the success event's payload. Fails with
    /// [`CommandError::NotConnected`] before anything is registered or sent
    /// when the channel is down, with [`CommandError::RemoteError`] when the
    /// error event matches, and with [`CommandError::Timeout`] when neither
    /// arrives in time.
    pub async fn invoke(&self, spec: &CommandSpec, payload: Value) -> CommandResult<Value> {
        if !self.channel.is_connected() {
            return Err(CommandError::NotConnected);
        }

        let id = CorrelationId::generate(&spec.id_prefix);
        let (tx, rx) = oneshot::channel();
        let resolver: Resolver = Arc::new(Mutex::new(Some(tx)));
        let mut handlers = SubscriptionGuard::new(self.channel.bus());

        {
            let resolver = resolver.clone();
            let id = id.clone();
            let field = spec.id_field;
            handlers.subscribe(EventFilter::event(&spec.success_event), move |event| {
                if id.matches(event, field) {
                    settle(&resolver, Ok(event.payload.clone()));
                } else {
                    tracing::trace!("{} for another call", event.name);
                }
            });
        }

        if let Some(error_event) = &spec.error_event {
            let resolver = resolver.clone();
            let id = id.clone();
            let field = spec.id_field;
            let command = spec.command.clone();
            let fallback = spec.failure_message.clone();
            handlers.subscribe(EventFilter::event(error_event), move |event| {
                if id.matches(event, field) {
                    settle(
                        &resolver,
                        Err(CommandError::RemoteError {
                            command: command.clone(),
                            message: remote_message(&event.payload, &fallback),
                        }),
                    );
                } else {
                    tracing::trace!("{} for another call", event.name);
                }
            });
        }

        let payload = with_field(payload, spec.id_field.as_str(), id.as_str());
        self.channel.send(&spec.command, payload)?;
        tracing::debug!("Sent {} ({})", spec.command, id);

        let outcome = match tokio::time::timeout(spec.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(CommandError::Disconnected {
                operation: spec.command.clone(),
            }),
            Err(_) => {
                resolver.lock().take();
                tracing::warn!(
                    "{} ({}) timed out after {}ms",
                    spec.command,
                    id,
                    spec.timeout.as_millis()
                );
                Err(CommandError::Timeout {
                    command: spec.command.clone(),
                    timeout_ms: spec.timeout.as_millis() as u64,
                })
            }
        };

        handlers.release();
        outcome
    }

    /// Send a command that the controller answers with an acknowledgement
    ///
    /// Resolves with the acknowledgement data.
    pub async fn invoke_ack(
        &self,
        command: &str,
        payload: Value,
        timeout: Duration,
    ) -> CommandResult<Value> {
        let pending = self.channel.send_with_ack(command, payload)?;
        tracing::debug!("Sent {} awaiting ack {}", command, pending.id());

        match tokio::time::timeout(timeout, pending.wait()).await {
            Ok(Some(data)) => Ok(data),
            Ok(None) => Err(CommandError::Disconnected {
                operation: command.to_string(),
            }),
            Err(_) => {
                tracing::warn!("{} acknowledgement timed out after {}ms", command, timeout.as_millis());
                Err(CommandError::Timeout {
                    command: command.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                })
            }
        }
    }
}
