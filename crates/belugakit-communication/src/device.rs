//! Device control facade
//!
//! One method per operator action. Each method is a single correlated call
//! (or, for starting a run, a single acknowledged call) with the event names
//! and timeout for that action. Nothing here retries or mirrors device state.

use belugakit_core::{CommandError, CommandResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use std::time::Duration;

use crate::channel::ChannelClient;
use crate::correlator::{CommandSpec, Correlator, IdField};

/// Reply timeouts per command class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandTimeouts {
    /// Device toggles and quick queries
    pub device: Duration,
    /// Network operations, hardware initialization and run start
    pub network: Duration,
}

impl Default for CommandTimeouts {
    fn default() -> Self {
        Self {
            device: Duration::from_secs(10),
            network: Duration::from_secs(30),
        }
    }
}

/// Switchable hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleDevice {
    /// UV sterilization lamp
    UvLight,
    /// Cabinet light
    SystemLight,
    /// Air filter fan
    Filter,
}

impl ToggleDevice {
    fn hardware(&self) -> &'static str {
        match self {
            ToggleDevice::UvLight => "uv",
            ToggleDevice::SystemLight => "light",
            ToggleDevice::Filter => "fan",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ToggleDevice::UvLight => "UV light",
            ToggleDevice::SystemLight => "System light",
            ToggleDevice::Filter => "Filter",
        }
    }

    /// Command description for switching this device on or off
    pub fn command(&self, on: bool, timeout: Duration) -> CommandSpec {
        let hardware = self.hardware();
        let action = if on { "on" } else { "off" };
        CommandSpec::new(
            format!("turn_{}_{}_hardware", action, hardware),
            format!("{}_complete", hardware),
        )
        .with_error_event(format!("{}_error", hardware))
        .with_timeout(timeout)
        .with_id(IdField::ControlId, hardware)
        .with_failure_message(format!("{} control failed", self.label()))
    }
}

impl std::fmt::Display for ToggleDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A WiFi network reported by the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WifiNetwork {
    /// Network name; empty for hidden networks
    #[serde(default, deserialize_with = "string_or_empty")]
    pub ssid: String,
    /// Signal strength as reported, e.g. `"72"`
    #[serde(default, deserialize_with = "string_or_number")]
    pub signal_strength: Option<String>,
    /// Security scheme, e.g. `WPA2`
    #[serde(default, deserialize_with = "string_or_number")]
    pub security: Option<String>,
    /// Whether the controller is connected to this network
    ///
    /// nmcli marks the active network with `*`.
    #[serde(default, deserialize_with = "truthy")]
    pub in_use: bool,
}

/// WiFi connection status of the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WifiStatus {
    /// Whether the controller is on a network
    #[serde(default, deserialize_with = "truthy")]
    pub connected: bool,
    /// Current network name
    #[serde(default, deserialize_with = "string_or_number")]
    pub ssid: Option<String>,
    /// Current signal strength
    #[serde(default, deserialize_with = "string_or_number")]
    pub signal_strength: Option<String>,
}

/// Networks listed under `networks`; entries that do not decode are skipped
fn network_list(payload: &Value) -> Vec<WifiNetwork> {
    let Some(items) = payload.get("networks").and_then(Value::as_array) else {
        tracing::debug!("WiFi reply carries no network list");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match WifiNetwork::deserialize(item) {
            Ok(network) => Some(network),
            Err(e) => {
                tracing::debug!("Skipping unreadable network entry {}: {}", item, e);
                None
            }
        })
        .collect()
}

/// Truthiness of any JSON value: `false`, `0`, `""` and `null` are false
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    })
}

fn string_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(string_or_number(deserializer)?.unwrap_or_default())
}

/// Accept a string, a number, or nothing
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Parameters of a run, as entered by the operator
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    /// Run identifier chosen by the operator
    pub run_id: String,
    /// Operator name
    #[serde(default)]
    pub operator_name: String,
    /// Number of samples
    pub number_of_samples: u32,
    /// Extraction protocol
    #[serde(default)]
    pub protocol_type: String,
    /// Sample material
    #[serde(default)]
    pub sample_type: String,
    /// Wells in use
    #[serde(default)]
    pub selected_wells: Vec<String>,
    /// Reagent volumes per step
    #[serde(default)]
    pub reagent_volumes: Vec<String>,
    /// Pipette tips loaded
    #[serde(default)]
    pub pipette_tips: Vec<String>,
}

/// A run accepted by the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStarted {
    /// Run id assigned by the controller
    pub run_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct RunAck {
    #[serde(default, deserialize_with = "truthy")]
    success: bool,
    #[serde(default, deserialize_with = "string_or_number")]
    run_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    error: Option<String>,
}

fn decode<T: DeserializeOwned>(command: &str, payload: Value) -> CommandResult<T> {
    serde_json::from_value(payload).map_err(|e| CommandError::InvalidResponse {
        command: command.to_string(),
        reason: e.to_string(),
    })
}

/// Device control facade
#[derive(Debug, Clone)]
pub struct DeviceController {
    correlator: Correlator,
    timeouts: CommandTimeouts,
}

impl DeviceController {
    /// Create a facade on `channel` with default timeouts
    pub fn new(channel: ChannelClient) -> Self {
        Self::with_timeouts(channel, CommandTimeouts::default())
    }

    /// Create a facade with custom timeouts
    pub fn with_timeouts(channel: ChannelClient, timeouts: CommandTimeouts) -> Self {
        Self {
            correlator: Correlator::new(channel),
            timeouts,
        }
    }

    /// Switch a device on or off
    pub async fn set_toggle(&self, device: ToggleDevice, on: bool) -> CommandResult<Value> {
        let spec = device.command(on, self.timeouts.device);
        let reply = self.correlator.invoke(&spec, json!({})).await;
        if let Err(e) = &reply {
            tracing::warn!("{} {} failed: {}", device, if on { "on" } else { "off" }, e);
        }
        reply
    }

    /// Switch the UV lamp
    pub async fn set_uv_light(&self, on: bool) -> CommandResult<Value> {
        self.set_toggle(ToggleDevice::UvLight, on).await
    }

    /// Switch the cabinet light
    pub async fn set_system_light(&self, on: bool) -> CommandResult<Value> {
        self.set_toggle(ToggleDevice::SystemLight, on).await
    }

    /// Switch the air filter
    pub async fn set_filter(&self, on: bool) -> CommandResult<Value> {
        self.set_toggle(ToggleDevice::Filter, on).await
    }

    /// Drive a numbered device into a state
    pub async fn control_device(
        &self,
        device: &str,
        number: u32,
        state: &str,
    ) -> CommandResult<Value> {
        let spec = CommandSpec::new("device_control", "control_complete")
            .with_error_event("control_error")
            .with_timeout(self.timeouts.device)
            .with_id(IdField::ControlId, "control")
            .with_failure_message("Device control failed");
        self.correlator
            .invoke(
                &spec,
                json!({ "device": device, "number": number, "state": state }),
            )
            .await
    }

    /// Initialize the instrument hardware
    pub async fn initialize_hardware(&self) -> CommandResult<Value> {
        let spec = CommandSpec::new("initialize_beluga_hardware", "beluga_initialized")
            .with_error_event("beluga_error")
            .with_timeout(self.timeouts.network)
            .with_id(IdField::ControlId, "init")
            .with_failure_message("Hardware initialization failed");
        self.correlator.invoke(&spec, json!({})).await
    }

    /// Ask the controller to start a run
    pub async fn start_run(&self, request: &RunRequest) -> CommandResult<RunStarted> {
        const COMMAND: &str = "start_pcr_run";
        let payload = serde_json::to_value(request).map_err(|e| CommandError::InvalidResponse {
            command: COMMAND.to_string(),
            reason: e.to_string(),
        })?;

        let reply = self
            .correlator
            .invoke_ack(COMMAND, payload, self.timeouts.network)
            .await?;
        // Anything but an object with a truthy `success` is a rejection
        let ack = RunAck::deserialize(&reply).unwrap_or_else(|e| {
            tracing::debug!("Unreadable run acknowledgement {}: {}", reply, e);
            RunAck::default()
        });

        if ack.success {
            let run_id = ack.run_id.unwrap_or_else(|| "unknown".to_string());
            tracing::info!("Run {} started", run_id);
            Ok(RunStarted { run_id })
        } else {
            let message = ack
                .error
                .unwrap_or_else(|| "Unknown error occurred".to_string());
            tracing::warn!("Run start rejected: {}", message);
            Err(CommandError::RemoteError {
                command: COMMAND.to_string(),
                message,
            })
        }
    }

    /// Ask the controller to stop a run; no reply is awaited
    pub fn stop_run(&self, run_id: &str) -> CommandResult<()> {
        self.correlator
            .channel()
            .send("stop_pcr_run", json!({ "run_id": run_id }))
    }

    /// Ask the controller to broadcast its status; no reply is awaited
    pub fn request_system_status(&self) -> CommandResult<()> {
        self.correlator.channel().send("get_system_status", Value::Null)
    }

    /// Current WiFi status
    pub async fn wifi_status(&self) -> CommandResult<WifiStatus> {
        let spec = CommandSpec::new("get_wifi_status", "wifi_status")
            .with_timeout(self.timeouts.device)
            .with_id(IdField::RequestId, "wifi_status");
        let reply = self.correlator.invoke(&spec, json!({})).await?;
        decode(&spec.command, reply)
    }

    /// Scan for nearby WiFi networks
    pub async fn scan_wifi_networks(&self) -> CommandResult<Vec<WifiNetwork>> {
        let spec = CommandSpec::new("scan_wifi_networks", "wifi_networks")
            .with_error_event("wifi_error")
            .with_timeout(self.timeouts.network)
            .with_id(IdField::RequestId, "wifi_scan")
            .with_failure_message("WiFi scan failed");
        let reply = self.correlator.invoke(&spec, json!({})).await?;
        Ok(network_list(&reply))
    }

    /// Networks the controller remembers
    pub async fn known_networks(&self) -> CommandResult<Vec<WifiNetwork>> {
        let spec = CommandSpec::new("get_known_networks", "wifi_networks")
            .with_timeout(self.timeouts.device)
            .with_id(IdField::RequestId, "wifi_known");
        let reply = self.correlator.invoke(&spec, json!({})).await?;
        Ok(network_list(&reply))
    }

    /// Join a WiFi network
    pub async fn connect_wifi(&self, ssid: &str, password: Option<&str>) -> CommandResult<Value> {
        let spec = CommandSpec::new("connect_wifi", "wifi_connected")
            .with_error_event("wifi_error")
            .with_timeout(self.timeouts.network)
            .with_id(IdField::RequestId, "wifi_connect")
            .with_failure_message("WiFi connection failed");
        let payload = json!({ "ssid": ssid, "password": password.unwrap_or_default() });
        self.correlator.invoke(&spec, payload).await
    }

    /// Leave the current WiFi network
    pub async fn disconnect_wifi(&self) -> CommandResult<WifiStatus> {
        let spec = CommandSpec::new("disconnect_wifi", "wifi_status")
            .with_timeout(self.timeouts.device)
            .with_id(IdField::RequestId, "wifi_disconnect");
        let reply = self.correlator.invoke(&spec, json!({})).await?;
        decode(&spec.command, reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_commands() {
        let spec = ToggleDevice::UvLight.command(true, Duration::from_secs(10));
        assert_eq!(spec.command, "turn_on_uv_hardware");
        assert_eq!(spec.success_event, "uv_complete");
        assert_eq!(spec.error_event.as_deref(), Some("uv_error"));
        assert_eq!(spec.id_field, IdField::ControlId);

        let spec = ToggleDevice::Filter.command(false, Duration::from_secs(10));
        assert_eq!(spec.command, "turn_off_fan_hardware");
        assert_eq!(spec.success_event, "fan_complete");
        assert_eq!(spec.failure_message, "Filter control failed");

        let spec = ToggleDevice::SystemLight.command(true, Duration::from_secs(10));
        assert_eq!(spec.command, "turn_on_light_hardware");
        assert_eq!(spec.error_event.as_deref(), Some("light_error"));
    }

    #[test]
    fn test_wifi_network_decoding() {
        let networks = network_list(&json!({
            "networks": [
                { "ssid": "Lab", "signal_strength": 72, "security": "WPA2", "in_use": true },
                { "ssid": "Guest", "signal_strength": "40" },
            ]
        }));
        assert_eq!(networks.len(), 2);
        assert_eq!(networks[0].signal_strength.as_deref(), Some("72"));
        assert!(networks[0].in_use);
        assert_eq!(networks[1].signal_strength.as_deref(), Some("40"));
        assert_eq!(networks[1].security, None);

        assert!(network_list(&json!({})).is_empty());
        assert!(network_list(&Value::Null).is_empty());
        assert!(network_list(&json!({ "networks": "none" })).is_empty());
    }

    #[test]
    fn test_wifi_network_entries_are_lenient() {
        let networks = network_list(&json!({
            "networks": [
                { "ssid": "Lab", "in_use": "*" },
                { "ssid": null, "in_use": "" },
                "not a network",
                { "ssid": "Office", "in_use": 0 },
            ]
        }));
        assert_eq!(networks.len(), 3);
        assert!(networks[0].in_use);
        assert_eq!(networks[1].ssid, "");
        assert!(!networks[1].in_use);
        assert_eq!(networks[2].ssid, "Office");
        assert!(!networks[2].in_use);
    }

    #[test]
    fn test_wifi_status_truthiness() {
        let status: WifiStatus =
            serde_json::from_value(json!({ "connected": "yes", "ssid": "Lab" })).unwrap();
        assert!(status.connected);
        let status: WifiStatus = serde_json::from_value(json!({ "connected": null })).unwrap();
        assert!(!status.connected);
    }

    #[test]
    fn test_run_ack_defaults_to_rejection() {
        let ack = RunAck::deserialize(&Value::Null).unwrap_or_default();
        assert!(!ack.success);
        assert!(ack.error.is_none());

        let ack = RunAck::deserialize(&json!({ "success": 1, "run_id": 42 })).unwrap();
        assert!(ack.success);
        assert_eq!(ack.run_id.as_deref(), Some("42"));
    }

    #[test]
    fn test_invalid_reply_maps_to_invalid_response() {
        let err = decode::<WifiStatus>("get_wifi_status", json!(["connected"])).unwrap_err();
        assert!(matches!(err, CommandError::InvalidResponse { .. }));
    }

    #[test]
    fn test_default_timeouts() {
        let timeouts = CommandTimeouts::default();
        assert_eq!(timeouts.device, Duration::from_secs(10));
        assert_eq!(timeouts.network, Duration::from_secs(30));
    }
}
