//! Evolution API Client
//!
//! Instance lifecycle and message-send calls against the provider. Base URL,
//! API key, and instance name live in the settings store; they are loaded
//! lazily on first use and cached until an admin configuration change
//! invalidates them. Every call carries the `apikey` header and a bounded
//! timeout.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::warn;

use super::dispatch::SendTransport;
use super::error::GatewayError;
use crate::db::{keys, SettingsStore};

/// Event types the provider is asked to push to our webhook.
pub const WEBHOOK_EVENTS: [&str; 3] = ["CONNECTION_UPDATE", "QRCODE_UPDATED", "MESSAGES_UPSERT"];

/// Instance name used when `evolution_instance` is not set.
const DEFAULT_INSTANCE: &str = "wagate";

/// Provider connection values, cached after first load.
#[derive(Debug, Clone)]
struct ProviderConfig {
    base_url: String,
    api_key: String,
    instance: String,
}

/// HTTP client for the Evolution API.
#[derive(Clone)]
pub struct EvolutionClient {
    http: reqwest::Client,
    settings: SettingsStore,
    config: Arc<RwLock<Option<ProviderConfig>>>,
}

impl EvolutionClient {
    /// Build a client with the given per-request timeout.
    pub fn new(settings: SettingsStore, timeout: Duration) -> reqwest::Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            settings,
            config: Arc::new(RwLock::new(None)),
        })
    }

    /// Drop the cached provider config so the next call reloads it.
    pub async fn invalidate_config(&self) {
        *self.config.write().await = None;
    }

    /// Load (or reuse) the provider configuration. Missing base URL or API
    /// key surfaces as a configuration error only here, when a call needs it.
    async fn config(&self) -> Result<ProviderConfig, GatewayError> {
        if let Some(config) = self.config.read().await.as_ref() {
            return Ok(config.clone());
        }

        let base_url = self
            .settings
            .get(keys::EVOLUTION_URL)
            .await?
            .ok_or(GatewayError::Configuration(keys::EVOLUTION_URL))?;
        let api_key = self
            .settings
            .get(keys::EVOLUTION_KEY)
            .await?
            .ok_or(GatewayError::Configuration(keys::EVOLUTION_KEY))?;
        let instance = self
            .settings
            .get_or(keys::EVOLUTION_INSTANCE, DEFAULT_INSTANCE)
            .await?;

        let config = ProviderConfig {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            instance,
        };
        *self.config.write().await = Some(config.clone());
        Ok(config)
    }

    /// Single request/response exchange. Non-2xx maps to a provider error
    /// carrying the status and raw body; transport failures map to the same
    /// kind without a status.
    async fn request(
        &self,
        config: &ProviderConfig,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{path}", config.base_url);

        let mut request = self
            .http
            .request(method, &url)
            .header("apikey", &config.api_key);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::provider_transport(&e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::provider_transport(&e))?;

        if !status.is_success() {
            return Err(GatewayError::provider_status(status.as_u16(), text));
        }

        // Some provider endpoints answer with empty or non-JSON bodies.
        Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
    }

    /// Register a provider-side instance pushing our fixed event set to
    /// `webhook_url`. Returns the provider's raw acknowledgement.
    pub async fn create_instance(&self, webhook_url: &str) -> Result<Value, GatewayError> {
        let config = self.config().await?;
        let body = create_instance_body(&config.instance, webhook_url);
        self.request(&config, Method::POST, "/instance/create", Some(body))
            .await
    }

    /// Provider-reported connection state for the instance.
    pub async fn connection_state(&self) -> Result<String, GatewayError> {
        let config = self.config().await?;
        let path = format!("/instance/connectionState/{}", config.instance);
        let body = self.request(&config, Method::GET, &path, None).await?;
        Ok(parse_connection_state(&body))
    }

    /// Request a fresh pairing code.
    pub async fn fetch_qr(&self) -> Result<Value, GatewayError> {
        let config = self.config().await?;
        let path = format!("/instance/connect/{}", config.instance);
        self.request(&config, Method::GET, &path, None).await
    }

    /// Tear down the provider-side session.
    pub async fn logout(&self) -> Result<Value, GatewayError> {
        let config = self.config().await?;
        let path = format!("/instance/logout/{}", config.instance);
        self.request(&config, Method::DELETE, &path, None).await
    }

    /// Whether the instance currently has a live session. Any failure is
    /// logged and treated as not connected.
    pub async fn is_connected(&self) -> bool {
        match self.connection_state().await {
            Ok(state) => state == "open",
            Err(e) => {
                warn!(error = %e, "Provider status check failed, treating as not connected");
                false
            }
        }
    }

    /// Live provider state for the admin status view. Degrades to a marker
    /// string instead of failing.
    pub async fn live_state(&self) -> String {
        match self.connection_state().await {
            Ok(state) => state,
            Err(GatewayError::Configuration(_)) => "not_configured".into(),
            Err(e) => {
                warn!(error = %e, "Provider unreachable for live state");
                "api_unreachable".into()
            }
        }
    }
}

#[async_trait]
impl SendTransport for EvolutionClient {
    async fn send_presence(
        &self,
        jid: &str,
        presence: &str,
        duration_ms: u64,
    ) -> Result<Value, GatewayError> {
        let config = self.config().await?;
        let path = format!("/chat/sendPresence/{}", config.instance);
        let body = json!({ "number": jid, "presence": presence, "delay": duration_ms });
        self.request(&config, Method::POST, &path, Some(body)).await
    }

    async fn send_text(&self, jid: &str, text: &str) -> Result<Value, GatewayError> {
        let config = self.config().await?;
        let path = format!("/message/sendText/{}", config.instance);
        let body = json!({ "number": jid, "text": text });
        self.request(&config, Method::POST, &path, Some(body)).await
    }

    async fn send_document(
        &self,
        jid: &str,
        file_url: &str,
        caption: &str,
        file_name: &str,
    ) -> Result<Value, GatewayError> {
        let config = self.config().await?;
        let path = format!("/message/sendMedia/{}", config.instance);
        let body = json!({
            "number": jid,
            "mediatype": "document",
            "media": file_url,
            "caption": caption,
            "fileName": file_name,
        });
        self.request(&config, Method::POST, &path, Some(body)).await
    }
}

/// Instance registration payload: QR pairing enabled, webhook pointed at us
/// with the fixed event set.
fn create_instance_body(instance: &str, webhook_url: &str) -> Value {
    json!({
        "instanceName": instance,
        "qrcode": true,
        "integration": "WHATSAPP-BAILEYS",
        "webhook": {
            "url": webhook_url,
            "enabled": true,
            "events": WEBHOOK_EVENTS,
        },
    })
}

/// Extract the state string from a connectionState response.
fn parse_connection_state(body: &Value) -> String {
    body.get("instance")
        .and_then(|instance| instance.get("state"))
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use sqlx::PgPool;

    use super::*;

    #[test]
    fn test_create_instance_body_shape() {
        let body = create_instance_body("primary", "https://app.example/api/whatsapp/webhook");

        assert_eq!(body["instanceName"], "primary");
        assert_eq!(
            body["webhook"]["url"],
            "https://app.example/api/whatsapp/webhook"
        );
        assert_eq!(body["webhook"]["enabled"], true);

        let events: Vec<&str> = body["webhook"]["events"]
            .as_array()
            .expect("events must be an array")
            .iter()
            .map(|v| v.as_str().expect("event must be a string"))
            .collect();
        assert_eq!(events, WEBHOOK_EVENTS);
    }

    #[test]
    fn test_parse_connection_state() {
        let body = json!({ "instance": { "instanceName": "primary", "state": "open" } });
        assert_eq!(parse_connection_state(&body), "open");

        assert_eq!(parse_connection_state(&json!({})), "unknown");
        assert_eq!(
            parse_connection_state(&json!({ "instance": { "state": 3 } })),
            "unknown"
        );
    }

    #[sqlx::test]
    async fn test_is_connected_false_when_unconfigured(pool: PgPool) {
        let client = EvolutionClient::new(SettingsStore::new(pool), Duration::from_secs(1))
            .expect("Failed to build client");

        assert!(!client.is_connected().await);
    }

    #[sqlx::test]
    async fn test_is_connected_false_on_transport_error(pool: PgPool) {
        let settings = SettingsStore::new(pool);
        // Nothing listens on the discard port; the probe must swallow the
        // transport error and report not connected.
        settings
            .set(keys::EVOLUTION_URL, "http://127.0.0.1:9")
            .await
            .expect("Write failed");
        settings
            .set(keys::EVOLUTION_KEY, "secret")
            .await
            .expect("Write failed");

        let client = EvolutionClient::new(settings, Duration::from_secs(1))
            .expect("Failed to build client");

        assert!(!client.is_connected().await);
    }
}
