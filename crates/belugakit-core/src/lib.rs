//! # BelugaKit Core
//!
//! Core types, errors, and utilities for BelugaKit.
//! Provides the error taxonomy shared by every layer, the channel event bus
//! that controller events and connection lifecycle events are published on,
//! and the connection state model.

pub mod data;
pub mod error;
pub mod event_bus;
pub mod types;

pub use data::ConnectionState;

pub use error::{CommandError, CommandResult, ConnectionError, Error, ProtocolError, Result};

// Re-export event bus for convenience
pub use event_bus::{
    lifecycle, ChannelEvent, EventBus, EventBusConfig, EventFilter, SubscriptionGuard,
    SubscriptionId,
};

// Re-export type aliases for convenience
pub use types::{
    thread_safe, thread_safe_map, thread_safe_none, DataCallback, SharedCallback, ThreadSafe,
    ThreadSafeMap, ThreadSafeOption,
};
