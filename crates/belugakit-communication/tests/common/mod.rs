//! Shared helpers for the loopback-based integration tests
#![allow(dead_code)]

use belugakit_communication::{
    loopback, ChannelClient, ChannelConfig, ControllerLink, LoopbackController,
};
use belugakit_core::ChannelEvent;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

pub fn test_config(reconnect_attempts: u32) -> ChannelConfig {
    ChannelConfig::new("http://beluga.test:8000")
        .with_reconnect(reconnect_attempts, Duration::from_millis(100))
        .with_connect_timeout(Duration::from_secs(2))
}

/// A client connected to a loopback controller
pub async fn connected_client(
    reconnect_attempts: u32,
) -> (ChannelClient, LoopbackController, ControllerLink) {
    let (transport, mut controller) = loopback();
    let client = ChannelClient::new(test_config(reconnect_attempts), Arc::new(transport));
    client.connect().expect("valid base url");
    let link = controller
        .accept_session()
        .await
        .expect("client should open a link");
    client
        .wait_connected(Duration::from_secs(2))
        .await
        .expect("client should connect");
    (client, controller, link)
}

/// Wait for the next event with `name`, skipping others
pub async fn next_named(events: &mut broadcast::Receiver<ChannelEvent>, name: &str) -> ChannelEvent {
    loop {
        let event = events.recv().await.expect("bus closed");
        if event.name == name {
            return event;
        }
    }
}
