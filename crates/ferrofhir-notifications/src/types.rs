use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use ferrofhir_core::events::ResourceAction;

/// Subscription lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Requested,
    Active,
    Error,
    Off,
}

/// The cached form of one subscription, joined with its channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub fhir_id: String,
    /// Criteria string, e.g. `Observation?code=8480-6`.
    pub criteria: String,
    pub channel: ChannelInfo,
}

/// Webhook channel configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub endpoint: String,
    /// Payload MIME type; empty means `application/fhir+json`.
    #[serde(default)]
    pub payload: String,
    /// Extra headers, each formatted `Key: value`.
    #[serde(default)]
    pub headers: Vec<String>,
}

impl ChannelInfo {
    pub fn content_type(&self) -> &str {
        if self.payload.is_empty() {
            "application/fhir+json"
        } else {
            &self.payload
        }
    }
}

/// Delivery state of one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Processing,
    Delivered,
    Abandoned,
    Cancelled,
}

/// One queued notification plus the joined channel fields needed for
/// delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: String,
    pub subscription_id: String,
    pub resource_type: String,
    pub resource_id: String,
    pub event: ResourceAction,
    pub payload: Value,
    pub status: NotificationStatus,
    pub attempt_count: u32,
    pub max_attempts: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub next_attempt_at: OffsetDateTime,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub delivered_at: Option<OffsetDateTime>,
    pub channel: ChannelInfo,
}

impl NotificationRecord {
    /// A fresh pending record for one matched event.
    pub fn pending(
        subscription: &SubscriptionInfo,
        resource_type: &str,
        resource_id: &str,
        event: ResourceAction,
        payload: Value,
        max_attempts: u32,
        now: OffsetDateTime,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subscription_id: subscription.id.clone(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            event,
            payload,
            status: NotificationStatus::Pending,
            attempt_count: 0,
            max_attempts,
            next_attempt_at: now,
            last_error: None,
            delivered_at: None,
            channel: subscription.channel.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_type_defaults_to_fhir_json() {
        let channel = ChannelInfo {
            endpoint: "http://example.org/hook".to_string(),
            payload: String::new(),
            headers: Vec::new(),
        };
        assert_eq!(channel.content_type(), "application/fhir+json");

        let custom = ChannelInfo {
            payload: "application/json".to_string(),
            ..channel
        };
        assert_eq!(custom.content_type(), "application/json");
    }

    #[test]
    fn pending_record_starts_at_zero_attempts() {
        let subscription = SubscriptionInfo {
            id: "s1".to_string(),
            fhir_id: "sub-1".to_string(),
            criteria: "Patient".to_string(),
            channel: ChannelInfo {
                endpoint: "http://example.org/hook".to_string(),
                payload: String::new(),
                headers: Vec::new(),
            },
        };
        let record = NotificationRecord::pending(
            &subscription,
            "Patient",
            "p1",
            ResourceAction::Create,
            json!({"resourceType": "Patient", "id": "p1"}),
            5,
            OffsetDateTime::now_utc(),
        );
        assert_eq!(record.status, NotificationStatus::Pending);
        assert_eq!(record.attempt_count, 0);
        assert_eq!(record.max_attempts, 5);
        assert_eq!(record.channel.endpoint, "http://example.org/hook");
    }
}
