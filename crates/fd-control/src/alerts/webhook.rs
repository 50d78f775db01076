//! Webhook delivery

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use fd_core::error::AlertError;
use fd_core::model::FleetEvent;

/// Longest response body kept in a rejection error
const MAX_ERROR_BODY: usize = 512;

/// Posts one JSON payload; `Ok` carries the 2xx status
#[async_trait]
pub trait WebhookSender: Send + Sync {
    async fn send(&self, url: &str, kind: &str, payload: &Value) -> Result<u16, AlertError>;
}

pub struct HttpWebhookSender {
    http: Client,
}

impl HttpWebhookSender {
    pub fn new(timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("fleetdeck/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl WebhookSender for HttpWebhookSender {
    async fn send(&self, url: &str, kind: &str, payload: &Value) -> Result<u16, AlertError> {
        let response = self
            .http
            .post(url)
            .header("X-Fleetdeck-Event", kind)
            .json(payload)
            .send()
            .await
            .map_err(|e| AlertError::Transport(e.to_string()))?;

        let status = response.status().as_u16();
        if response.status().is_success() {
            return Ok(status);
        }
        let mut body = response.text().await.unwrap_or_default();
        if body.len() > MAX_ERROR_BODY {
            let mut cut = MAX_ERROR_BODY;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Err(AlertError::DeliveryRejected { status, body })
    }
}

/// JSON body for an event. `text` makes it readable by chat webhooks as-is.
pub fn payload(event: &FleetEvent, test: bool) -> Value {
    json!({
        "text": format!("[{}] {}: {}", event.severity, event.title, event.message),
        "severity": event.severity,
        "kind": event.kind,
        "signature": event.signature,
        "targetId": event.target_id,
        "title": event.title,
        "message": event.message,
        "occurredAt": event.occurred_at.to_rfc3339(),
        "test": test,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fd_core::types::{Severity, TargetId};

    #[test]
    fn test_payload_shape() {
        let event = FleetEvent::new(
            Severity::Critical,
            "target.unavailable",
            "t1",
            Some(TargetId::new("t1")),
            "Target lab unavailable",
            "3 consecutive sync failures",
        );
        let body = payload(&event, false);
        assert_eq!(body["severity"], "critical");
        assert_eq!(body["targetId"], "t1");
        assert_eq!(body["test"], false);
        assert_eq!(
            body["text"],
            "[critical] Target lab unavailable: 3 consecutive sync failures"
        );
    }
}
