//! Gateway Errors
//!
//! Error taxonomy for dispatch and provider lifecycle operations. Safety
//! blocks and provider failures always propagate to the caller unmodified;
//! they are never silently retried.

use thiserror::Error;

/// Errors surfaced by gateway operations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A provider configuration value is not set. Surfaced only when an
    /// operation actually needs the missing value.
    #[error("Provider not configured: {0} is not set")]
    Configuration(&'static str),

    /// The kill switch is active; all outbound provider traffic is halted.
    #[error("Send blocked by kill switch: {reason}")]
    SafetyBlocked { reason: String },

    /// Provider request failed. `status` carries the non-2xx HTTP status and
    /// `body` the raw response for diagnostics; a `status` of `None` marks a
    /// transport-level failure (no response at all).
    #[error("Provider request failed: {body}")]
    Provider { status: Option<u16>, body: String },

    /// Settings store failure.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl GatewayError {
    /// Build a provider error from a non-success HTTP response.
    #[must_use]
    pub fn provider_status(status: u16, body: String) -> Self {
        Self::Provider {
            status: Some(status),
            body: format!("HTTP {status}: {body}"),
        }
    }

    /// Build a provider error from a transport failure (no response).
    #[must_use]
    pub fn provider_transport(err: &reqwest::Error) -> Self {
        Self::Provider {
            status: None,
            body: format!("transport: {err}"),
        }
    }
}
