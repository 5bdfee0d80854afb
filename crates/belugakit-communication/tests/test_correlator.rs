//! Tests for command correlation over the loopback transport

mod common;

use belugakit_communication::{loopback, ChannelClient, CommandSpec, Correlator, IdField};
use belugakit_core::CommandError;
use common::{connected_client, test_config};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn uv_on() -> CommandSpec {
    CommandSpec::new("turn_on_uv_hardware", "uv_complete")
        .with_error_event("uv_error")
        .with_timeout(Duration::from_secs(10))
        .with_id(IdField::ControlId, "uv")
        .with_failure_message("UV control failed")
}

#[tokio::test]
async fn test_success_reply_resolves_call() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({})).await }
    });

    let command = link.next_command().await.unwrap();
    assert_eq!(command.name, "turn_on_uv_hardware");
    let id = command.str_field("control_id").unwrap().to_string();
    assert!(id.starts_with("uv_"));

    link.emit("uv_complete", json!({ "control_id": id, "state": "on" }));

    let reply = call.await.unwrap().unwrap();
    assert_eq!(reply["state"], "on");
    assert_eq!(client.bus().subscriber_count(), 0);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client);

    let first = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({ "call": 1 })).await }
    });
    let first_command = link.next_command().await.unwrap();

    let second = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({ "call": 2 })).await }
    });
    let second_command = link.next_command().await.unwrap();

    let first_id = first_command.str_field("control_id").unwrap().to_string();
    let second_id = second_command.str_field("control_id").unwrap().to_string();
    assert_ne!(first_id, second_id);

    // Reply out of order
    link.emit("uv_complete", json!({ "control_id": second_id, "call": 2 }));
    link.emit("uv_complete", json!({ "control_id": first_id, "call": 1 }));

    assert_eq!(first.await.unwrap().unwrap()["call"], 1);
    assert_eq!(second.await.unwrap().unwrap()["call"], 2);
}

#[tokio::test]
async fn test_error_reply_rejects_with_message() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({})).await }
    });
    let command = link.next_command().await.unwrap();
    let id = command.str_field("control_id").unwrap().to_string();

    link.emit("uv_error", json!({ "control_id": id.clone(), "error": "Lamp failure" }));
    // The later success for the same id is a no-op
    link.emit("uv_complete", json!({ "control_id": id }));

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        CommandError::RemoteError {
            command: "turn_on_uv_hardware".to_string(),
            message: "Lamp failure".to_string(),
        }
    );
    assert_eq!(client.bus().subscriber_count(), 0);
}

#[tokio::test]
async fn test_error_without_message_uses_failure_message() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client);

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({})).await }
    });
    let command = link.next_command().await.unwrap();
    let id = command.str_field("control_id").unwrap().to_string();
    link.emit("uv_error", json!({ "control_id": id }));

    match call.await.unwrap() {
        Err(CommandError::RemoteError { message, .. }) => assert_eq!(message, "UV control failed"),
        other => panic!("Expected remote error, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unmatched_replies_are_ignored_until_timeout() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let started = tokio::time::Instant::now();
    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({})).await }
    });
    link.next_command().await.unwrap();

    link.emit("uv_complete", json!({}));
    link.emit("uv_complete", json!({ "control_id": "uv_0_0" }));
    link.emit("uv_error", json!({ "control_id": "uv_0_0", "error": "not yours" }));

    let err = call.await.unwrap().unwrap_err();
    assert_eq!(
        err,
        CommandError::Timeout {
            command: "turn_on_uv_hardware".to_string(),
            timeout_ms: 10_000,
        }
    );
    assert!(started.elapsed() >= Duration::from_secs(10));
    assert_eq!(client.bus().subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_reply_after_timeout_is_noop() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());
    let mut events = client.events();

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({})).await }
    });
    let command = link.next_command().await.unwrap();
    let id = command.str_field("control_id").unwrap().to_string();

    assert!(call.await.unwrap().unwrap_err().is_timeout());

    link.emit("uv_complete", json!({ "control_id": id }));
    common::next_named(&mut events, "uv_complete").await;
    assert_eq!(client.bus().subscriber_count(), 0);
}

#[tokio::test]
async fn test_dropped_call_removes_its_handlers() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move { correlator.invoke(&uv_on(), json!({})).await }
    });
    link.next_command().await.unwrap();
    assert_eq!(client.bus().subscriber_count(), 2);

    call.abort();
    assert!(call.await.unwrap_err().is_cancelled());
    assert_eq!(client.bus().subscriber_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_not_connected_registers_nothing() {
    let (transport, _controller) = loopback();
    let client = ChannelClient::new(test_config(0), Arc::new(transport));
    let correlator = Correlator::new(client.clone());

    let started = tokio::time::Instant::now();
    let err = correlator.invoke(&uv_on(), json!({})).await.unwrap_err();

    assert_eq!(err, CommandError::NotConnected);
    assert_eq!(client.bus().subscriber_count(), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test]
async fn test_ack_reply_resolves_call() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move {
            correlator
                .invoke_ack("start_pcr_run", json!({ "run_id": "R-1" }), Duration::from_secs(30))
                .await
        }
    });

    let command = link.next_command().await.unwrap();
    let ack_id = command.ack_id.expect("ack requested");
    link.ack(ack_id, json!({ "success": true, "run_id": "R-1" }));

    assert_eq!(call.await.unwrap().unwrap()["run_id"], "R-1");
    assert_eq!(client.pending_acks(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_ack_timeout_clears_pending_entry() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move {
            correlator
                .invoke_ack("start_pcr_run", json!({}), Duration::from_secs(30))
                .await
        }
    });
    let command = link.next_command().await.unwrap();

    assert!(call.await.unwrap().unwrap_err().is_timeout());
    assert_eq!(client.pending_acks(), 0);

    // A late ack finds nothing to resolve
    link.ack(command.ack_id.unwrap(), json!({ "success": true }));
}

#[tokio::test]
async fn test_ack_fails_when_connection_drops() {
    let (client, _controller, mut link) = connected_client(0).await;
    let correlator = Correlator::new(client.clone());

    let call = tokio::spawn({
        let correlator = correlator.clone();
        async move {
            correlator
                .invoke_ack("start_pcr_run", json!({}), Duration::from_secs(30))
                .await
        }
    });
    link.next_command().await.unwrap();
    drop(link);

    assert_eq!(
        call.await.unwrap().unwrap_err(),
        CommandError::Disconnected {
            operation: "start_pcr_run".to_string(),
        }
    );
    assert_eq!(client.pending_acks(), 0);
}
