//! Admin Gateway Handlers
//!
//! Bearer-token-gated management surface: connection status, instance
//! lifecycle, kill-switch reset, provider configuration, and test sends.
//! Operations that hit the kill switch report the stored human-readable
//! reason so an operator understands why sends are paused.

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info};

use super::AppState;
use crate::db::keys;
use crate::gateway::{ConnectionStatus, GatewayError};

// ============================================================================
// Error Types
// ============================================================================

/// Error types for admin gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Missing or invalid admin token")]
    Unauthorized,

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            Self::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),
            Self::Gateway(GatewayError::SafetyBlocked { reason }) => {
                (StatusCode::CONFLICT, "SAFETY_BLOCKED", reason.clone())
            }
            Self::Gateway(GatewayError::Configuration(_)) => (
                StatusCode::PRECONDITION_FAILED,
                "PROVIDER_NOT_CONFIGURED",
                self.to_string(),
            ),
            Self::Gateway(GatewayError::Provider { .. }) => {
                error!("Provider error: {}", self);
                (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", self.to_string())
            }
            Self::Gateway(GatewayError::Database(err)) | Self::Database(err) => {
                error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "Database error".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": code, "message": message }))).into_response()
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Middleware requiring the configured admin bearer token.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AdminError> {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.config.admin_token);

    if !authorized {
        return Err(AdminError::Unauthorized);
    }

    Ok(next.run(request).await)
}

// ============================================================================
// Status
// ============================================================================

/// Gateway status as seen by an operator.
#[derive(Debug, Serialize)]
pub struct GatewayStatusResponse {
    pub kill_switch: bool,
    pub kill_reason: String,
    pub status: String,
    pub live_state: String,
    pub has_qr: bool,
    pub qr_base64: String,
}

/// Get gateway status. `live_state` is fetched live from the provider; the
/// rest comes from the settings store.
///
/// GET /api/admin/whatsapp/status
pub async fn gateway_status(
    State(state): State<AppState>,
) -> Result<Json<GatewayStatusResponse>, AdminError> {
    let kill = state.kill_switch.state().await?;
    let status = state.state_machine.status().await?;
    let qr = state.settings.get_or(keys::WA_QR_CODE, "").await?;
    let live_state = state.provider.live_state().await;

    Ok(Json(GatewayStatusResponse {
        kill_switch: kill.active,
        kill_reason: kill.reason,
        status: status.to_string(),
        live_state,
        has_qr: !qr.is_empty(),
        qr_base64: qr,
    }))
}

// ============================================================================
// Instance Lifecycle
// ============================================================================

/// Register the provider-side instance, pointing its webhook at us.
///
/// POST /api/admin/whatsapp/instance
pub async fn create_instance(State(state): State<AppState>) -> Result<Json<Value>, AdminError> {
    let webhook_url = state.config.webhook_url();
    let data = state.provider.create_instance(&webhook_url).await?;
    info!(webhook_url = %webhook_url, "Provider instance created");
    Ok(success(data))
}

/// Request a fresh pairing code.
///
/// GET /api/admin/whatsapp/qr
pub async fn fetch_qr(State(state): State<AppState>) -> Result<Json<Value>, AdminError> {
    let data = state.provider.fetch_qr().await?;
    Ok(success(data))
}

/// Tear down the provider-side session.
///
/// POST /api/admin/whatsapp/logout
pub async fn logout(State(state): State<AppState>) -> Result<Json<Value>, AdminError> {
    let data = state.provider.logout().await?;
    state
        .state_machine
        .set_status(ConnectionStatus::Disconnected)
        .await?;
    info!("Provider instance logged out");
    Ok(success(data))
}

// ============================================================================
// Kill Switch
// ============================================================================

/// Manually reset the kill switch. Idempotent.
///
/// POST /api/admin/whatsapp/kill-switch/reset
pub async fn reset_kill_switch(State(state): State<AppState>) -> Result<Json<Value>, AdminError> {
    state.kill_switch.reset().await?;
    Ok(success(Value::Null))
}

// ============================================================================
// Sends
// ============================================================================

const fn default_min_delay() -> u64 {
    1
}

const fn default_max_delay() -> u64 {
    3
}

/// Test text message request.
#[derive(Debug, Deserialize)]
pub struct SendTestRequest {
    pub to: String,
    pub message: String,
    #[serde(default = "default_min_delay")]
    pub min_delay_seconds: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
}

/// Send a test text message through the humanized dispatcher.
///
/// POST /api/admin/whatsapp/send-test
pub async fn send_test(
    State(state): State<AppState>,
    Json(req): Json<SendTestRequest>,
) -> Result<Json<Value>, AdminError> {
    let data = state
        .dispatcher
        .send_text(
            &req.to,
            &req.message,
            req.min_delay_seconds,
            req.max_delay_seconds,
        )
        .await?;
    Ok(success(data))
}

/// Document send request.
#[derive(Debug, Deserialize)]
pub struct SendDocumentRequest {
    pub to: String,
    pub file_url: String,
    pub caption: String,
    pub file_name: String,
    #[serde(default = "default_min_delay")]
    pub min_delay_seconds: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: u64,
}

/// Send a document through the humanized dispatcher.
///
/// POST /api/admin/whatsapp/send-document
pub async fn send_document(
    State(state): State<AppState>,
    Json(req): Json<SendDocumentRequest>,
) -> Result<Json<Value>, AdminError> {
    let data = state
        .dispatcher
        .send_document(
            &req.to,
            &req.file_url,
            &req.caption,
            &req.file_name,
            req.min_delay_seconds,
            req.max_delay_seconds,
        )
        .await?;
    Ok(success(data))
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// Partial provider configuration update.
#[derive(Debug, Deserialize)]
pub struct UpdateProviderConfigRequest {
    pub evolution_url: Option<String>,
    pub evolution_key: Option<String>,
    pub evolution_instance: Option<String>,
}

/// Upsert provider configuration and invalidate the client's cached copy.
///
/// PUT /api/admin/whatsapp/config
pub async fn update_provider_config(
    State(state): State<AppState>,
    Json(req): Json<UpdateProviderConfigRequest>,
) -> Result<Json<Value>, AdminError> {
    if let Some(url) = &req.evolution_url {
        state.settings.set(keys::EVOLUTION_URL, url).await?;
    }
    if let Some(key) = &req.evolution_key {
        state.settings.set(keys::EVOLUTION_KEY, key).await?;
    }
    if let Some(instance) = &req.evolution_instance {
        state.settings.set(keys::EVOLUTION_INSTANCE, instance).await?;
    }

    state.provider.invalidate_config().await;
    info!("Provider configuration updated");
    Ok(success(Value::Null))
}

fn success(data: Value) -> Json<Value> {
    Json(json!({ "success": true, "data": data }))
}
