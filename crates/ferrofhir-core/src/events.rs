//! Resource events emitted on every successful write.
//!
//! The broadcaster is a thin wrapper over a tokio broadcast channel so
//! subscribers (the notification engine, auto-provenance) stay decoupled
//! from the request path. Lagging receivers drop events rather than
//! backpressure writers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// The storage mutation that produced the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceAction {
    Create,
    Update,
    Delete,
}

impl ResourceAction {
    /// HTTP verb used in notification bundle entries.
    pub fn http_method(&self) -> &'static str {
        match self {
            Self::Create => "POST",
            Self::Update => "PUT",
            Self::Delete => "DELETE",
        }
    }
}

/// One storage mutation, fanned out to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceEvent {
    pub action: ResourceAction,
    pub resource_type: String,
    pub resource_id: String,
    pub resource: Value,
    #[serde(with = "time::serde::rfc3339")]
    pub occurred_at: OffsetDateTime,
}

impl ResourceEvent {
    pub fn new(
        action: ResourceAction,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
        resource: Value,
    ) -> Self {
        Self {
            action,
            resource_type: resource_type.into(),
            resource_id: resource_id.into(),
            resource,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Event bus for resource mutations.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<ResourceEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.sender.subscribe()
    }

    /// Send an event. A send with no live subscribers is not an error.
    pub fn send(&self, event: ResourceEvent) {
        if let Err(e) = self.sender.send(event) {
            tracing::trace!(error = %e, "resource event dropped: no subscribers");
        }
    }

    pub fn send_created(&self, resource_type: &str, id: &str, resource: Value) {
        self.send(ResourceEvent::new(
            ResourceAction::Create,
            resource_type,
            id,
            resource,
        ));
    }

    pub fn send_updated(&self, resource_type: &str, id: &str, resource: Value) {
        self.send(ResourceEvent::new(
            ResourceAction::Update,
            resource_type,
            id,
            resource,
        ));
    }

    pub fn send_deleted(&self, resource_type: &str, id: &str, resource: Value) {
        self.send(ResourceEvent::new(
            ResourceAction::Delete,
            resource_type,
            id,
            resource,
        ));
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn actions_map_to_http_methods() {
        assert_eq!(ResourceAction::Create.http_method(), "POST");
        assert_eq!(ResourceAction::Update.http_method(), "PUT");
        assert_eq!(ResourceAction::Delete.http_method(), "DELETE");
    }

    #[tokio::test]
    async fn subscribers_receive_sent_events() {
        let bus = EventBroadcaster::new(8);
        let mut rx = bus.subscribe();

        bus.send_created("Patient", "p1", json!({"resourceType": "Patient", "id": "p1"}));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.action, ResourceAction::Create);
        assert_eq!(event.resource_type, "Patient");
        assert_eq!(event.resource_id, "p1");
    }

    #[tokio::test]
    async fn send_without_subscribers_does_not_panic() {
        let bus = EventBroadcaster::new(8);
        bus.send_deleted("Patient", "p1", json!({}));
    }
}
