//! Event Bus implementation.
//!
//! Provides the core EventBus struct. Every registration returns its own
//! [`SubscriptionId`] and removal requires that token, so cleaning up one
//! pending call can never remove another call's handler for the same event
//! name.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::ChannelEvent;

/// Subscription handle for unsubscribing from events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new unique subscription ID
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.to_string()[..8])
    }
}

/// Filter to receive only specific events
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Receive all events.
    #[default]
    All,
    /// Receive events with exactly this name.
    Event(String),
    /// Receive events matching any of these names.
    Events(Vec<String>),
}

impl EventFilter {
    /// Filter for a single event name
    pub fn event(name: impl Into<String>) -> Self {
        EventFilter::Event(name.into())
    }

    /// Check if an event matches this filter
    pub fn matches(&self, event: &ChannelEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Event(name) => *name == event.name,
            EventFilter::Events(names) => names.iter().any(|n| *n == event.name),
        }
    }
}

/// Type alias for event handler functions
type EventHandler = Arc<dyn Fn(&ChannelEvent) + Send + Sync>;

/// Configuration for the event bus
#[derive(Debug, Clone)]
pub struct EventBusConfig {
    /// Channel capacity for broadcast.
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Event bus shared by the channel client and every component built on it
///
/// Cloning is cheap; clones share the same handler registry.
#[derive(Clone)]
pub struct EventBus {
    /// Broadcast channel sender
    sender: broadcast::Sender<ChannelEvent>,
    /// Registered synchronous handlers
    handlers: Arc<RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>>,
    /// Configuration
    config: EventBusConfig,
}

impl EventBus {
    /// Create a new event bus with default configuration
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create a new event bus with custom configuration
    pub fn with_config(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            sender,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Publish an event to all subscribers
    ///
    /// Matching handlers are collected under the lock and invoked after it is
    /// released, so a handler may unsubscribe itself (or others) while running.
    /// Returns the number of synchronous handlers that were invoked.
    pub fn publish(&self, event: ChannelEvent) -> usize {
        let matching: Vec<EventHandler> = {
            let handlers = self.handlers.read();
            handlers
                .values()
                .filter(|(filter, _)| filter.matches(&event))
                .map(|(_, handler)| Arc::clone(handler))
                .collect()
        };

        for handler in &matching {
            handler(&event);
        }

        // Lagging or absent async receivers are not an error for the publisher
        let _ = self.sender.send(event);
        matching.len()
    }

    /// Subscribe to events with a synchronous handler
    ///
    /// The handler will be called on the publishing task, so it should
    /// return quickly to avoid blocking event dispatch.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId::new();
        let mut handlers = self.handlers.write();
        handlers.insert(id, (filter, Arc::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Get a receiver for manual event polling
    ///
    /// This is useful for async contexts where you want to receive events
    /// in a tokio task.
    pub fn receiver(&self) -> broadcast::Receiver<ChannelEvent> {
        self.sender.subscribe()
    }

    /// Unsubscribe from events
    ///
    /// Returns true if the subscription was found and removed. Removing an
    /// unknown or already-removed id is a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut handlers = self.handlers.write();
        let removed = handlers.remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Get the number of active subscriptions
    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }

    /// Get the current configuration
    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("config", &self.config)
            .finish()
    }
}

/// A set of subscriptions removed together when the guard is released or dropped
///
/// Used by every pending call so its handlers leave the bus on all exit
/// paths, including a caller dropping the future mid-flight.
#[must_use = "dropping the guard unsubscribes its handlers immediately"]
pub struct SubscriptionGuard {
    bus: EventBus,
    ids: Vec<SubscriptionId>,
}

impl SubscriptionGuard {
    /// Create an empty guard for `bus`
    pub fn new(bus: &EventBus) -> Self {
        Self {
            bus: bus.clone(),
            ids: Vec::new(),
        }
    }

    /// Subscribe on the guarded bus and track the resulting id
    pub fn subscribe<F>(&mut self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = self.bus.subscribe(filter, handler);
        self.ids.push(id);
        id
    }

    /// Number of subscriptions still held
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the guard holds no subscriptions
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Unsubscribe everything now. Calling it again does nothing.
    pub fn release(&mut self) {
        for id in self.ids.drain(..) {
            self.bus.unsubscribe(id);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.release();
    }
}
