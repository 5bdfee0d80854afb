//! # Event Bus Module
//!
//! Provides the event bus that carries controller events and connection
//! lifecycle events to every component of the console.
//!
//! ## Overview
//!
//! - The channel client publishes every incoming event by name
//! - Components subscribe with a name filter and receive a [`SubscriptionId`]
//! - Removal requires that id, so handlers for the same event name never
//!   interfere with each other
//! - A [`SubscriptionGuard`] removes a group of handlers on drop
//!
//! ## Usage
//!
//! ```rust,ignore
//! use belugakit_core::event_bus::{ChannelEvent, EventBus, EventFilter};
//!
//! let bus = EventBus::new();
//! let subscription = bus.subscribe(EventFilter::event("uv_complete"), |event| {
//!     println!("UV done: {}", event.payload);
//! });
//!
//! bus.publish(ChannelEvent::new("uv_complete", serde_json::json!({})));
//! bus.unsubscribe(subscription);
//! ```

mod bus;
mod events;

pub use bus::*;
pub use events::*;
