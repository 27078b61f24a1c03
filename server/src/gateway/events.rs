//! Provider Webhook Events
//!
//! Tagged union over the event shapes the provider pushes, decoded
//! defensively: missing or malformed nested fields degrade to [`WebhookEvent::Other`]
//! rather than failing, so unknown provider event types stay forward-compatible.

use serde_json::Value;

/// Event tag for connection state changes.
pub const CONNECTION_UPDATE: &str = "CONNECTION_UPDATE";
/// Event tag for a refreshed pairing code.
pub const QRCODE_UPDATED: &str = "QRCODE_UPDATED";

/// A provider webhook event. Constructed per inbound delivery, consumed once;
/// only its derived effect is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Connection state change; `status_reason` is the provider's numeric
    /// disconnect/ban code when present.
    ConnectionUpdate {
        state: String,
        status_reason: Option<i64>,
    },
    /// A fresh pairing code to show the operator.
    QrCodeUpdated { base64: String },
    /// Anything unrecognized. Accepted and acknowledged, never rejected.
    Other,
}

impl WebhookEvent {
    /// Decode an event from the inbound `{event, data}` pair.
    #[must_use]
    pub fn from_parts(event: &str, data: &Value) -> Self {
        match event {
            CONNECTION_UPDATE => Self::ConnectionUpdate {
                state: data
                    .get("state")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                status_reason: data.get("statusReason").and_then(Value::as_i64),
            },
            QRCODE_UPDATED => {
                // Tolerate a missing/malformed payload by ignoring the event.
                match data
                    .get("qrcode")
                    .and_then(|qr| qr.get("base64"))
                    .and_then(Value::as_str)
                {
                    Some(base64) => Self::QrCodeUpdated {
                        base64: base64.to_string(),
                    },
                    None => Self::Other,
                }
            }
            _ => Self::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_connection_update() {
        let data = json!({ "state": "close", "statusReason": 401 });
        let event = WebhookEvent::from_parts(CONNECTION_UPDATE, &data);
        assert_eq!(
            event,
            WebhookEvent::ConnectionUpdate {
                state: "close".into(),
                status_reason: Some(401),
            }
        );
    }

    #[test]
    fn test_decode_connection_update_without_reason() {
        let data = json!({ "state": "connecting" });
        let event = WebhookEvent::from_parts(CONNECTION_UPDATE, &data);
        assert_eq!(
            event,
            WebhookEvent::ConnectionUpdate {
                state: "connecting".into(),
                status_reason: None,
            }
        );
    }

    #[test]
    fn test_decode_qr_code() {
        let data = json!({ "qrcode": { "base64": "abc123" } });
        let event = WebhookEvent::from_parts(QRCODE_UPDATED, &data);
        assert_eq!(event, WebhookEvent::QrCodeUpdated { base64: "abc123".into() });
    }

    #[test]
    fn test_malformed_qr_payload_degrades_to_other() {
        assert_eq!(
            WebhookEvent::from_parts(QRCODE_UPDATED, &json!({})),
            WebhookEvent::Other
        );
        assert_eq!(
            WebhookEvent::from_parts(QRCODE_UPDATED, &json!({ "qrcode": "not-an-object" })),
            WebhookEvent::Other
        );
        assert_eq!(
            WebhookEvent::from_parts(QRCODE_UPDATED, &json!({ "qrcode": { "base64": 42 } })),
            WebhookEvent::Other
        );
    }

    #[test]
    fn test_unknown_tag_is_other() {
        let data = json!({ "messages": [] });
        assert_eq!(
            WebhookEvent::from_parts("MESSAGES_UPSERT", &data),
            WebhookEvent::Other
        );
    }
}
