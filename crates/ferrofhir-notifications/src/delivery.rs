//! Webhook delivery over HTTP POST.
//!
//! Each notification is wrapped as a one-entry history Bundle and
//! POSTed to the channel endpoint with the channel's content type and
//! any configured extra headers.

use serde_json::json;

use ferrofhir_core::bundle::{Bundle, BundleEntry, BundleRequest};

use crate::error::SubscriptionError;
use crate::types::NotificationRecord;

/// HTTP delivery client with a 10 second request timeout.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    http: reqwest::Client,
}

impl DeliveryClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self { http }
    }

    pub fn with_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Build the one-entry history bundle for a notification.
    pub fn notification_bundle(record: &NotificationRecord) -> Bundle {
        let url = format!("{}/{}", record.resource_type, record.resource_id);
        Bundle::history(
            vec![BundleEntry {
                full_url: Some(url.clone()),
                resource: Some(record.payload.clone()),
                request: Some(BundleRequest {
                    method: record.event.http_method().to_string(),
                    url,
                }),
                ..Default::default()
            }],
            1,
        )
    }

    /// POST the notification to its channel endpoint. Any non-2xx
    /// response or transport error is a delivery failure.
    pub async fn deliver(&self, record: &NotificationRecord) -> Result<(), SubscriptionError> {
        let bundle = Self::notification_bundle(record);
        let mut request = self
            .http
            .post(&record.channel.endpoint)
            .header("Content-Type", record.channel.content_type());

        for header in &record.channel.headers {
            if let Some((key, value)) = header.split_once(':') {
                request = request.header(key.trim(), value.trim());
            }
        }

        let response = request
            .json(&bundle)
            .send()
            .await
            .map_err(|e| SubscriptionError::delivery(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SubscriptionError::delivery(format!(
                "endpoint returned HTTP {}",
                status.as_u16()
            )))
        }
    }

    /// One-off `{}` handshake POST; success iff the endpoint answers 2xx.
    pub async fn handshake(&self, endpoint: &str, headers: &[String]) -> bool {
        let mut request = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/fhir+json");
        for header in headers {
            if let Some((key, value)) = header.split_once(':') {
                request = request.header(key.trim(), value.trim());
            }
        }

        match request.json(&json!({})).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::warn!(endpoint, error = %e, "subscription handshake failed");
                false
            }
        }
    }
}

impl Default for DeliveryClient {
    fn default() -> Self {
        Self::new()
    }
}
