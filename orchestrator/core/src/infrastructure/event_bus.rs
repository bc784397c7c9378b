// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Pub/Sub for Domain Events
//
// Provides in-memory event streaming using tokio broadcast channels.
// The daemon subscribes and emits the Home Assistant payload of every add-on
// state change; tests subscribe directly.

use crate::domain::events::{AddonEvent, ResolutionEvent};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Unified domain event type for the event bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    Addon(AddonEvent),
    Resolution(ResolutionEvent),
}

/// Event bus for publishing and subscribing to domain events
#[derive(Clone)]
pub struct EventBus {
    sender: Arc<broadcast::Sender<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before dropping old ones
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Create event bus with default capacity (1000)
    pub fn with_default_capacity() -> Self {
        Self::new(1000)
    }

    pub fn publish_addon_event(&self, event: AddonEvent) {
        self.publish(DomainEvent::Addon(event));
    }

    pub fn publish_resolution_event(&self, event: ResolutionEvent) {
        self.publish(DomainEvent::Resolution(event));
    }

    fn publish(&self, event: DomainEvent) {
        debug!("Publishing event: {:?}", event);

        // send() fails only when nobody is subscribed
        let receiver_count = self.sender.send(event).unwrap_or(0);

        if receiver_count == 0 {
            debug!("No subscribers listening to event");
        }
    }

    /// Subscribe to all domain events
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Subscribe to the events of one add-on
    pub fn subscribe_addon(&self, slug: impl Into<String>) -> AddonEventReceiver {
        AddonEventReceiver {
            receiver: self.sender.subscribe(),
            slug: slug.into(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

fn map_recv_error(e: broadcast::error::RecvError) -> EventBusError {
    match e {
        broadcast::error::RecvError::Closed => EventBusError::Closed,
        broadcast::error::RecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

fn map_try_recv_error(e: broadcast::error::TryRecvError) -> EventBusError {
    match e {
        broadcast::error::TryRecvError::Empty => EventBusError::Empty,
        broadcast::error::TryRecvError::Closed => EventBusError::Closed,
        broadcast::error::TryRecvError::Lagged(n) => {
            warn!("Event receiver lagged by {} events", n);
            EventBusError::Lagged(n)
        }
    }
}

/// Receiver for all domain events
pub struct EventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until one is available)
    pub async fn recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.recv().await.map_err(map_recv_error)
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<DomainEvent, EventBusError> {
        self.receiver.try_recv().map_err(map_try_recv_error)
    }

    /// Drains every buffered event.
    pub fn drain(&mut self) -> Vec<DomainEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Receiver for events of a single add-on (filtered)
pub struct AddonEventReceiver {
    receiver: broadcast::Receiver<DomainEvent>,
    slug: String,
}

impl AddonEventReceiver {
    pub async fn recv(&mut self) -> Result<AddonEvent, EventBusError> {
        loop {
            let event = self.receiver.recv().await.map_err(map_recv_error)?;
            if let DomainEvent::Addon(addon_event) = event {
                if addon_event.slug() == self.slug {
                    return Ok(addon_event);
                }
            }
        }
    }

    pub fn try_recv(&mut self) -> Result<AddonEvent, EventBusError> {
        loop {
            let event = self.receiver.try_recv().map_err(map_try_recv_error)?;
            if let DomainEvent::Addon(addon_event) = event {
                if addon_event.slug() == self.slug {
                    return Ok(addon_event);
                }
            }
        }
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::addon::AddonState;
    use chrono::Utc;

    fn state_changed(slug: &str, state: AddonState) -> AddonEvent {
        AddonEvent::StateChanged {
            slug: slug.to_string(),
            state,
            changed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_bus_publish_subscribe() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        event_bus.publish_addon_event(state_changed("local_ssh", AddonState::Started));

        let received = receiver.recv().await.unwrap();
        match received {
            DomainEvent::Addon(AddonEvent::StateChanged { slug, state, .. }) => {
                assert_eq!(slug, "local_ssh");
                assert_eq!(state, AddonState::Started);
            }
            _ => panic!("Wrong event type received"),
        }
    }

    #[tokio::test]
    async fn test_addon_event_filtering() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe_addon("local_ssh");

        // Different add-on, filtered out
        event_bus.publish_addon_event(state_changed("local_mqtt", AddonState::Started));
        event_bus.publish_addon_event(state_changed("local_ssh", AddonState::Stopped));

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.slug(), "local_ssh");
        assert!(matches!(receiver.try_recv(), Err(EventBusError::Empty)));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();

        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish_addon_event(state_changed("local_ssh", AddonState::Error));

        // Both receivers should get the event
        assert_eq!(receiver1.drain().len(), 1);
        let _ = receiver2.recv().await.unwrap();
    }

    #[test]
    fn test_domain_event_is_tagged() {
        let event = DomainEvent::Addon(state_changed("local_ssh", AddonState::Started));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "addon");
    }
}
