//! Settings Store
//!
//! String-keyed durable settings backing every piece of gateway state:
//! connection status, kill switch, last QR code, and provider configuration.
//!
//! Keys are case-sensitive and globally unique. A missing key (or a NULL
//! value) reads as the caller-supplied default, never as an error. Writes are
//! plain upserts without cross-process locking; two racing writers may
//! interleave, which is an accepted limitation of this substrate.

use sqlx::PgPool;
use tracing::error;

/// Well-known setting keys.
pub mod keys {
    /// Serialized [`ConnectionStatus`](crate::gateway::ConnectionStatus).
    pub const WA_STATUS: &str = "wa_status";
    /// Kill switch flag, `"0"` or `"1"`.
    pub const WA_KILL_SWITCH: &str = "wa_kill_switch";
    /// Human-readable reason the kill switch tripped.
    pub const WA_KILL_REASON: &str = "wa_kill_reason";
    /// Last pairing code pushed by the provider, base64.
    pub const WA_QR_CODE: &str = "wa_qr_code";
    /// Provider base URL.
    pub const EVOLUTION_URL: &str = "evolution_url";
    /// Provider API key.
    pub const EVOLUTION_KEY: &str = "evolution_key";
    /// Provider instance name.
    pub const EVOLUTION_INSTANCE: &str = "evolution_instance";
}

/// Durable key/value store over the `gateway_settings` table.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    pool: PgPool,
}

impl SettingsStore {
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read a setting. Missing keys and NULL values both read as `None`.
    pub async fn get(&self, key: &str) -> sqlx::Result<Option<String>> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT value FROM gateway_settings WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| {
                    error!(key = %key, error = %e, "Settings read failed");
                    e
                })?;

        Ok(row.and_then(|(value,)| value))
    }

    /// Read a setting, falling back to `default` when absent.
    pub async fn get_or(&self, key: &str, default: &str) -> sqlx::Result<String> {
        Ok(self.get(key).await?.unwrap_or_else(|| default.to_string()))
    }

    /// Upsert a setting. Immediately visible to subsequent reads.
    pub async fn set(&self, key: &str, value: &str) -> sqlx::Result<()> {
        sqlx::query(
            r"
            INSERT INTO gateway_settings (key, value, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (key) DO UPDATE SET value = $2, updated_at = NOW()
            ",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!(key = %key, error = %e, "Settings write failed");
            e
        })?;

        Ok(())
    }
}
