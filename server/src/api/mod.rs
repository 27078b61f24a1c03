//! API Router and Application State
//!
//! Central routing configuration and shared state.

pub mod admin;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::Config;
use crate::db::SettingsStore;
use crate::gateway::{
    ConnectionStateMachine, EvolutionClient, KillSwitchGuard, MessageDispatcher,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Server configuration
    pub config: Arc<Config>,
    /// Durable key/value settings
    pub settings: SettingsStore,
    /// Outbound safety interlock
    pub kill_switch: KillSwitchGuard,
    /// Webhook-driven connection model
    pub state_machine: ConnectionStateMachine,
    /// Evolution API client
    pub provider: EvolutionClient,
    /// Humanized outbound dispatcher
    pub dispatcher: MessageDispatcher<EvolutionClient>,
}

impl AppState {
    /// Create new application state.
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let settings = SettingsStore::new(db);
        let kill_switch = KillSwitchGuard::new(settings.clone());
        let state_machine = ConnectionStateMachine::new(settings.clone(), kill_switch.clone());
        let provider = EvolutionClient::new(
            settings.clone(),
            Duration::from_secs(config.provider_timeout_secs),
        )?;
        let dispatcher = MessageDispatcher::new(provider.clone(), kill_switch.clone());

        Ok(Self {
            config: Arc::new(config),
            settings,
            kill_switch,
            state_machine,
            provider,
            dispatcher,
        })
    }
}

/// Create the main application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin_routes = Router::new()
        .route("/status", get(admin::gateway_status))
        .route("/instance", post(admin::create_instance))
        .route("/qr", get(admin::fetch_qr))
        .route("/logout", post(admin::logout))
        .route("/kill-switch/reset", post(admin::reset_kill_switch))
        .route("/send-test", post(admin::send_test))
        .route("/send-document", post(admin::send_document))
        .route("/config", put(admin::update_provider_config))
        .layer(from_fn_with_state(state.clone(), admin::require_admin_token));

    Router::new()
        .route("/health", get(health))
        .route("/api/whatsapp/webhook", post(webhook::receive))
        .nest("/api/admin/whatsapp", admin_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Liveness probe.
///
/// GET /health
async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
