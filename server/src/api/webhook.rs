//! Inbound Provider Webhook
//!
//! The asynchronous entry point the provider pushes events to. This endpoint
//! must never signal failure back to the provider: a non-2xx answer would
//! trigger provider-side retry storms or webhook deactivation, so malformed
//! bodies and internal processing errors are logged and acknowledged anyway.

use axum::body::Bytes;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::AppState;
use crate::gateway::WebhookEvent;

/// Receive a provider push event.
///
/// POST /api/whatsapp/webhook
pub async fn receive(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(error = %e, "Discarding unparseable webhook body");
            return acknowledge();
        }
    };

    let tag = payload
        .get("event")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let data = payload.get("data").cloned().unwrap_or(Value::Null);

    let event = WebhookEvent::from_parts(tag, &data);
    info!(event = %tag, "Webhook event received");

    if let Err(e) = state.state_machine.apply(event).await {
        error!(event = %tag, error = %e, "Failed to apply webhook event");
    }

    acknowledge()
}

fn acknowledge() -> Json<Value> {
    Json(json!({ "received": true }))
}
