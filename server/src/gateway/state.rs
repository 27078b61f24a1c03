//! Connection State Machine
//!
//! Interprets provider webhook events and derives the gateway's connection
//! status. Transitions are persisted through the settings store; a ban or
//! unexpected disconnect also trips the kill switch, and a clean reconnect
//! clears it. Concurrent deliveries may interleave writes, leaving at worst a
//! momentarily stale status.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::events::WebhookEvent;
use super::kill_switch::KillSwitchGuard;
use crate::db::{keys, SettingsStore};

/// Derived connection status, stored as `wa_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No webhook processed yet.
    Unknown,
    /// Session torn down by an admin logout.
    Disconnected,
    /// Provider is establishing the session.
    Connecting,
    /// Waiting for the operator to scan a pairing code.
    QrPending,
    /// Session is live; sends are possible.
    Connected,
    /// Provider reported a ban or dropped the session unexpectedly.
    BannedOrDisconnected,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::QrPending => "qr_pending",
            Self::Connected => "connected",
            Self::BannedOrDisconnected => "banned_or_disconnected",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Self::Unknown),
            "disconnected" => Ok(Self::Disconnected),
            "connecting" => Ok(Self::Connecting),
            "qr_pending" => Ok(Self::QrPending),
            "connected" => Ok(Self::Connected),
            "banned_or_disconnected" => Ok(Self::BannedOrDisconnected),
            _ => Err(()),
        }
    }
}

/// Applies webhook events to the persisted connection model.
#[derive(Debug, Clone)]
pub struct ConnectionStateMachine {
    settings: SettingsStore,
    kill_switch: KillSwitchGuard,
}

impl ConnectionStateMachine {
    #[must_use]
    pub const fn new(settings: SettingsStore, kill_switch: KillSwitchGuard) -> Self {
        Self {
            settings,
            kill_switch,
        }
    }

    /// Current persisted status; `unknown` before any event.
    pub async fn status(&self) -> sqlx::Result<ConnectionStatus> {
        let raw = self.settings.get_or(keys::WA_STATUS, "unknown").await?;
        Ok(raw.parse().unwrap_or(ConnectionStatus::Unknown))
    }

    /// Persist a status directly (admin logout path).
    pub async fn set_status(&self, status: ConnectionStatus) -> sqlx::Result<()> {
        self.settings.set(keys::WA_STATUS, status.as_str()).await
    }

    /// Apply one webhook event. Unrecognized combinations are ignored, never
    /// an error.
    pub async fn apply(&self, event: WebhookEvent) -> sqlx::Result<()> {
        match event {
            WebhookEvent::ConnectionUpdate {
                state,
                status_reason,
            } => self.apply_connection_update(&state, status_reason).await,
            WebhookEvent::QrCodeUpdated { base64 } => {
                self.settings.set(keys::WA_QR_CODE, &base64).await?;
                self.set_status(ConnectionStatus::QrPending).await
            }
            WebhookEvent::Other => Ok(()),
        }
    }

    /// Transition rules for a connection update, in priority order.
    async fn apply_connection_update(
        &self,
        state: &str,
        status_reason: Option<i64>,
    ) -> sqlx::Result<()> {
        debug!(state = %state, status_reason = ?status_reason, "Connection update");

        // 1. A 401 means the provider banned or logged out the account.
        if status_reason == Some(401) {
            self.set_status(ConnectionStatus::BannedOrDisconnected)
                .await?;
            return self
                .kill_switch
                .activate("WhatsApp account banned or logged out by provider (status 401)")
                .await;
        }

        // 2. A close with anything but a clean 200 is an unexpected disconnect.
        if state == "close" && status_reason != Some(200) {
            let code = status_reason
                .map_or_else(|| "unknown".to_string(), |c| c.to_string());
            self.set_status(ConnectionStatus::BannedOrDisconnected)
                .await?;
            return self
                .kill_switch
                .activate(&format!("Unexpected disconnect (close, reason {code})"))
                .await;
        }

        // 3. An open session clears any previous interlock.
        if state == "open" {
            self.set_status(ConnectionStatus::Connected).await?;
            return self.kill_switch.deactivate().await;
        }

        // 4. Connecting updates the status only; the kill switch is untouched.
        if state == "connecting" {
            return self.set_status(ConnectionStatus::Connecting).await;
        }

        // 5. Everything else is ignored.
        Ok(())
    }
}
