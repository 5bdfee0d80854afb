//! Tests for the device control facade

mod common;

use belugakit_communication::{
    loopback, ChannelClient, CommandTimeouts, ControllerLink, DeviceController, RunRequest,
    WifiStatus,
};
use belugakit_core::CommandError;
use common::{connected_client, test_config};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Answer the next command with `reply_event`, echoing the id in `id_field`
async fn reply(link: &mut ControllerLink, expected: &str, id_field: &str, reply_event: &str, payload: Value) -> Value {
    let command = link.next_command().await.unwrap();
    assert_eq!(command.name, expected);
    let id = command
        .str_field(id_field)
        .unwrap_or_else(|| panic!("{} carries no {}", expected, id_field))
        .to_string();

    let mut payload = payload;
    payload[id_field] = Value::String(id);
    link.emit(reply_event, payload);
    command.data
}

#[tokio::test]
async fn test_toggles_use_their_own_events() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let cases = [
        ("turn_on_uv_hardware", "uv_complete"),
        ("turn_off_light_hardware", "light_complete"),
        ("turn_on_fan_hardware", "fan_complete"),
    ];

    for (index, (command, reply_event)) in cases.into_iter().enumerate() {
        let call = tokio::spawn({
            let devices = devices.clone();
            async move {
                match index {
                    0 => devices.set_uv_light(true).await,
                    1 => devices.set_system_light(false).await,
                    _ => devices.set_filter(true).await,
                }
            }
        });
        reply(&mut link, command, "control_id", reply_event, json!({ "ok": true })).await;
        assert_eq!(call.await.unwrap().unwrap()["ok"], true);
    }
}

#[tokio::test]
async fn test_control_device_sends_arguments() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.control_device("pump", 2, "on").await }
    });
    let sent = reply(&mut link, "device_control", "control_id", "control_complete", json!({})).await;
    assert_eq!(sent["device"], "pump");
    assert_eq!(sent["number"], 2);
    assert_eq!(sent["state"], "on");
    assert!(call.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_initialize_hardware_error() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.initialize_hardware().await }
    });
    reply(
        &mut link,
        "initialize_beluga_hardware",
        "control_id",
        "beluga_error",
        json!({ "error": "Homing failed" }),
    )
    .await;

    match call.await.unwrap() {
        Err(CommandError::RemoteError { message, .. }) => assert_eq!(message, "Homing failed"),
        other => panic!("Expected remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_start_run_accepted() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let request = RunRequest {
        run_id: "R-42".to_string(),
        operator_name: "Dana".to_string(),
        number_of_samples: 32,
        ..Default::default()
    };
    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.start_run(&request).await }
    });

    let command = link.next_command().await.unwrap();
    assert_eq!(command.name, "start_pcr_run");
    assert_eq!(command.data["number_of_samples"], 32);
    link.ack(command.ack_id.unwrap(), json!({ "success": true, "run_id": "R-42" }));

    assert_eq!(call.await.unwrap().unwrap().run_id, "R-42");
}

#[tokio::test]
async fn test_start_run_rejected_and_unknown_id() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.start_run(&RunRequest::default()).await }
    });
    let command = link.next_command().await.unwrap();
    link.ack(command.ack_id.unwrap(), json!({ "success": false, "error": "Door open" }));
    assert_eq!(
        call.await.unwrap().unwrap_err(),
        CommandError::RemoteError {
            command: "start_pcr_run".to_string(),
            message: "Door open".to_string(),
        }
    );

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.start_run(&RunRequest::default()).await }
    });
    let command = link.next_command().await.unwrap();
    link.ack(command.ack_id.unwrap(), json!({ "success": true }));
    assert_eq!(call.await.unwrap().unwrap().run_id, "unknown");
}

#[tokio::test]
async fn test_start_run_unreadable_ack_is_rejected() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    for ack in [Value::Null, json!("ok"), json!({ "success": false })] {
        let call = tokio::spawn({
            let devices = devices.clone();
            async move { devices.start_run(&RunRequest::default()).await }
        });
        let command = link.next_command().await.unwrap();
        link.ack(command.ack_id.unwrap(), ack);
        assert_eq!(
            call.await.unwrap().unwrap_err(),
            CommandError::RemoteError {
                command: "start_pcr_run".to_string(),
                message: "Unknown error occurred".to_string(),
            }
        );
    }
}

#[tokio::test]
async fn test_wifi_scan_keeps_readable_entries() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.scan_wifi_networks().await }
    });
    reply(
        &mut link,
        "scan_wifi_networks",
        "request_id",
        "wifi_networks",
        json!({
            "networks": [
                { "ssid": "Lab", "signal_strength": "80", "security": "WPA2", "in_use": "*" },
                { "ssid": "Guest", "signal_strength": 35, "in_use": "" },
                { "ssid": null, "signal_strength": 10 },
                42,
            ]
        }),
    )
    .await;

    let networks = call.await.unwrap().unwrap();
    assert_eq!(networks.len(), 3);
    assert_eq!(networks[0].ssid, "Lab");
    assert!(networks[0].in_use);
    assert!(!networks[1].in_use);
    assert_eq!(networks[1].signal_strength.as_deref(), Some("35"));
    assert_eq!(networks[2].ssid, "");
}

#[tokio::test]
async fn test_wifi_operations() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.scan_wifi_networks().await }
    });
    reply(
        &mut link,
        "scan_wifi_networks",
        "request_id",
        "wifi_networks",
        json!({ "networks": [{ "ssid": "Lab", "signal_strength": 80, "security": "WPA2", "in_use": true }] }),
    )
    .await;
    let networks = call.await.unwrap().unwrap();
    assert_eq!(networks.len(), 1);
    assert_eq!(networks[0].ssid, "Lab");

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.connect_wifi("Lab", Some("secret")).await }
    });
    let sent = reply(&mut link, "connect_wifi", "request_id", "wifi_error", json!({ "error": "Wrong password" })).await;
    assert_eq!(sent["ssid"], "Lab");
    assert_eq!(sent["password"], "secret");
    assert!(matches!(
        call.await.unwrap(),
        Err(CommandError::RemoteError { message, .. }) if message == "Wrong password"
    ));

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.wifi_status().await }
    });
    reply(
        &mut link,
        "get_wifi_status",
        "request_id",
        "wifi_status",
        json!({ "connected": true, "ssid": "Lab", "signal_strength": "80" }),
    )
    .await;
    assert_eq!(
        call.await.unwrap().unwrap(),
        WifiStatus {
            connected: true,
            ssid: Some("Lab".to_string()),
            signal_strength: Some("80".to_string()),
        }
    );

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.disconnect_wifi().await }
    });
    reply(&mut link, "disconnect_wifi", "request_id", "wifi_status", json!({ "connected": false })).await;
    assert!(!call.await.unwrap().unwrap().connected);

    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.known_networks().await }
    });
    reply(&mut link, "get_known_networks", "request_id", "wifi_networks", json!({ "networks": [] })).await;
    assert!(call.await.unwrap().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_wifi_scan_uses_network_timeout() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::with_timeouts(
        client,
        CommandTimeouts {
            device: Duration::from_secs(10),
            network: Duration::from_secs(30),
        },
    );

    let started = tokio::time::Instant::now();
    let call = tokio::spawn({
        let devices = devices.clone();
        async move { devices.scan_wifi_networks().await }
    });
    link.next_command().await.unwrap();

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        CommandError::Timeout {
            command: "scan_wifi_networks".to_string(),
            timeout_ms: 30_000,
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(30));
}

#[tokio::test]
async fn test_fire_and_forget_requests() {
    let (client, _controller, mut link) = connected_client(0).await;
    let devices = DeviceController::new(client);

    devices.stop_run("R-9").unwrap();
    devices.request_system_status().unwrap();

    let stop = link.next_command().await.unwrap();
    assert_eq!(stop.name, "stop_pcr_run");
    assert_eq!(stop.str_field("run_id"), Some("R-9"));
    let status = link.next_command().await.unwrap();
    assert_eq!(status.name, "get_system_status");
    assert_eq!(status.data, Value::Null);
}

#[tokio::test(start_paused = true)]
async fn test_disconnected_facade_fails_fast() {
    let (transport, _controller) = loopback();
    let client = ChannelClient::new(test_config(0), Arc::new(transport));
    let devices = DeviceController::new(client.clone());

    let started = tokio::time::Instant::now();
    assert_eq!(devices.set_uv_light(true).await, Err(CommandError::NotConnected));
    assert_eq!(devices.scan_wifi_networks().await, Err(CommandError::NotConnected));
    assert_eq!(
        devices.start_run(&RunRequest::default()).await,
        Err(CommandError::NotConnected)
    );
    assert_eq!(devices.stop_run("R-1"), Err(CommandError::NotConnected));

    assert_eq!(started.elapsed(), Duration::ZERO);
    assert_eq!(client.bus().subscriber_count(), 0);
    assert_eq!(client.pending_acks(), 0);
}
