//! Kill Switch Guard
//!
//! Persisted safety interlock consulted before every dispatch. Activated by
//! the state machine on ban/unexpected disconnect, cleared on reconnect or by
//! an explicit admin reset. Every write is a synchronous settings upsert and
//! immediately visible to the next dispatch, possibly running concurrently.

use serde::Serialize;
use tracing::{info, warn};

use crate::db::{keys, SettingsStore};

/// Current interlock state. `active == false` implies `reason == ""`.
#[derive(Debug, Clone, Serialize)]
pub struct KillSwitchState {
    pub active: bool,
    pub reason: String,
}

/// Guard over the persisted kill switch fields.
#[derive(Debug, Clone)]
pub struct KillSwitchGuard {
    settings: SettingsStore,
}

impl KillSwitchGuard {
    #[must_use]
    pub const fn new(settings: SettingsStore) -> Self {
        Self { settings }
    }

    /// Whether outbound traffic is currently halted.
    pub async fn is_active(&self) -> sqlx::Result<bool> {
        Ok(self.settings.get_or(keys::WA_KILL_SWITCH, "0").await? == "1")
    }

    /// The stored human-readable reason; empty while inactive.
    pub async fn reason(&self) -> sqlx::Result<String> {
        self.settings.get_or(keys::WA_KILL_REASON, "").await
    }

    /// Read flag and reason together.
    pub async fn state(&self) -> sqlx::Result<KillSwitchState> {
        Ok(KillSwitchState {
            active: self.is_active().await?,
            reason: self.reason().await?,
        })
    }

    /// Halt all outbound traffic, recording why.
    ///
    /// The reason is written before the flag flips: a concurrent dispatch
    /// that observes the switch active must also find the reason behind it.
    pub async fn activate(&self, reason: &str) -> sqlx::Result<()> {
        warn!(reason = %reason, "Kill switch activated, outbound sends halted");
        self.settings.set(keys::WA_KILL_REASON, reason).await?;
        self.settings.set(keys::WA_KILL_SWITCH, "1").await
    }

    /// Re-enable outbound traffic and clear the reason. Idempotent.
    pub async fn deactivate(&self) -> sqlx::Result<()> {
        self.settings.set(keys::WA_KILL_SWITCH, "0").await?;
        self.settings.set(keys::WA_KILL_REASON, "").await
    }

    /// Admin-triggered reset. Equivalent to [`Self::deactivate`]; resetting an
    /// already-inactive switch changes nothing and succeeds.
    pub async fn reset(&self) -> sqlx::Result<()> {
        info!("Kill switch manually reset");
        self.deactivate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::PgPool;

    #[sqlx::test]
    async fn test_inactive_by_default(pool: PgPool) {
        let guard = KillSwitchGuard::new(SettingsStore::new(pool));

        let state = guard.state().await.expect("Query failed");
        assert!(!state.active);
        assert_eq!(state.reason, "");
    }

    #[sqlx::test]
    async fn test_activate_then_deactivate(pool: PgPool) {
        let guard = KillSwitchGuard::new(SettingsStore::new(pool));

        guard.activate("banned (401)").await.expect("Write failed");
        let state = guard.state().await.expect("Query failed");
        assert!(state.active);
        assert_eq!(state.reason, "banned (401)");

        guard.deactivate().await.expect("Write failed");
        let state = guard.state().await.expect("Query failed");
        assert!(!state.active);
        assert_eq!(state.reason, "");
    }

    #[sqlx::test]
    async fn test_concurrent_reader_sees_reason_with_active_flag(pool: PgPool) {
        let guard = KillSwitchGuard::new(SettingsStore::new(pool));

        // A reader racing activate() may interleave between its two writes;
        // an active flag must never be visible ahead of its reason.
        for _ in 0..10 {
            guard.deactivate().await.expect("Write failed");

            let reader = {
                let guard = guard.clone();
                tokio::spawn(async move {
                    loop {
                        let state = guard.state().await.expect("Query failed");
                        if state.active {
                            return state;
                        }
                    }
                })
            };

            guard
                .activate("Unexpected disconnect (close, reason 500)")
                .await
                .expect("Write failed");

            let observed = reader.await.expect("Reader task failed");
            assert_eq!(observed.reason, "Unexpected disconnect (close, reason 500)");
        }
    }

    #[sqlx::test]
    async fn test_reset_is_idempotent(pool: PgPool) {
        let guard = KillSwitchGuard::new(SettingsStore::new(pool));

        // Resetting an already-inactive switch succeeds and changes nothing.
        guard.reset().await.expect("Reset failed");
        let before = guard.state().await.expect("Query failed");

        guard.reset().await.expect("Reset failed");
        let after = guard.state().await.expect("Query failed");

        assert_eq!(before.active, after.active);
        assert_eq!(before.reason, after.reason);
        assert!(!after.active);
    }
}
