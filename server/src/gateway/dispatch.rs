//! Message Dispatcher
//!
//! Humanized outbound delivery: kill-switch check first, then a randomized
//! pacing delay, a best-effort presence signal, and finally the real send.
//! Each dispatch runs inside its own request task and only ever suspends
//! cooperatively, so slow, deliberately-paced sends never serialize against
//! each other or against the webhook path.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::error::GatewayError;
use super::kill_switch::KillSwitchGuard;

/// Presence signal shown to the recipient before a send.
const PRESENCE_COMPOSING: &str = "composing";

/// How long the presence signal is held before the real send.
const PRESENCE_WINDOW: Duration = Duration::from_secs(3);

/// Provider send operations the dispatcher drives. Kept behind a trait so a
/// resilience policy (retry, circuit breaking) can wrap the transport without
/// touching the dispatch sequence.
#[async_trait]
pub trait SendTransport: Send + Sync {
    /// Signal "typing"/"recording" presence. Cosmetic; callers may ignore
    /// failures.
    async fn send_presence(
        &self,
        jid: &str,
        presence: &str,
        duration_ms: u64,
    ) -> Result<Value, GatewayError>;

    /// Send a plain text message.
    async fn send_text(&self, jid: &str, text: &str) -> Result<Value, GatewayError>;

    /// Send a document by URL.
    async fn send_document(
        &self,
        jid: &str,
        file_url: &str,
        caption: &str,
        file_name: &str,
    ) -> Result<Value, GatewayError>;
}

/// Outbound dispatcher guarded by the kill switch.
#[derive(Debug, Clone)]
pub struct MessageDispatcher<P> {
    transport: P,
    guard: KillSwitchGuard,
    presence_window: Duration,
}

impl<P: SendTransport> MessageDispatcher<P> {
    #[must_use]
    pub fn new(transport: P, guard: KillSwitchGuard) -> Self {
        Self {
            transport,
            guard,
            presence_window: PRESENCE_WINDOW,
        }
    }

    /// Override the presence hold window (shortened in tests).
    #[must_use]
    pub fn with_presence_window(mut self, window: Duration) -> Self {
        self.presence_window = window;
        self
    }

    /// Send a text message with humanized pacing.
    pub async fn send_text(
        &self,
        to: &str,
        message: &str,
        min_delay_secs: u64,
        max_delay_secs: u64,
    ) -> Result<Value, GatewayError> {
        self.check_halted().await?;

        let jid = normalize_recipient(to);
        self.humanize(&jid, min_delay_secs, max_delay_secs).await;
        self.transport.send_text(&jid, message).await
    }

    /// Send a document with humanized pacing.
    pub async fn send_document(
        &self,
        to: &str,
        file_url: &str,
        caption: &str,
        file_name: &str,
        min_delay_secs: u64,
        max_delay_secs: u64,
    ) -> Result<Value, GatewayError> {
        self.check_halted().await?;

        let jid = normalize_recipient(to);
        self.humanize(&jid, min_delay_secs, max_delay_secs).await;
        self.transport
            .send_document(&jid, file_url, caption, file_name)
            .await
    }

    /// Kill-switch gate. Must run before any delay or network call, with no
    /// other side effects.
    async fn check_halted(&self) -> Result<(), GatewayError> {
        let state = self.guard.state().await?;
        if state.active {
            return Err(GatewayError::SafetyBlocked {
                reason: state.reason,
            });
        }
        Ok(())
    }

    /// Pacing delay plus presence simulation. The presence call is cosmetic:
    /// on failure it is logged and the send continues.
    async fn humanize(&self, jid: &str, min_delay_secs: u64, max_delay_secs: u64) {
        let delay = pick_delay_secs(min_delay_secs, max_delay_secs);
        debug!(jid = %jid, delay_secs = delay, "Pacing outbound message");
        sleep(Duration::from_secs(delay)).await;

        let window_ms = self.presence_window.as_millis() as u64;
        match self
            .transport
            .send_presence(jid, PRESENCE_COMPOSING, window_ms)
            .await
        {
            Ok(_) => sleep(self.presence_window).await,
            Err(e) => warn!(jid = %jid, error = %e, "Presence simulation failed, continuing"),
        }
    }
}

/// Uniform random delay in `[min, max]` seconds, inclusive. Reversed bounds
/// are swapped rather than rejected.
fn pick_delay_secs(min: u64, max: u64) -> u64 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rand::thread_rng().gen_range(lo..=hi)
}

/// Strip the caller-supplied identifier down to digits and suffix it into the
/// provider's one-to-one chat addressing scheme.
#[must_use]
pub fn normalize_recipient(to: &str) -> String {
    let digits: String = to.chars().filter(char::is_ascii_digit).collect();
    format!("{digits}@s.whatsapp.net")
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    use serde_json::json;
    use sqlx::PgPool;

    use super::*;
    use crate::db::SettingsStore;

    #[test]
    fn test_normalize_recipient_strips_non_digits() {
        assert_eq!(
            normalize_recipient("+55 (11) 98765-4321"),
            "5511987654321@s.whatsapp.net"
        );
        assert_eq!(normalize_recipient("5511987654321"), "5511987654321@s.whatsapp.net");
    }

    #[test]
    fn test_delay_always_within_inclusive_bounds() {
        for _ in 0..1000 {
            let delay = pick_delay_secs(2, 5);
            assert!((2..=5).contains(&delay));
        }
        assert_eq!(pick_delay_secs(4, 4), 4);
        // Reversed bounds are swapped, not rejected.
        for _ in 0..100 {
            let delay = pick_delay_secs(7, 3);
            assert!((3..=7).contains(&delay));
        }
    }

    /// Mock transport counting provider calls.
    #[derive(Default)]
    struct CountingTransport {
        presence_calls: AtomicUsize,
        send_calls: AtomicUsize,
    }

    #[async_trait]
    impl SendTransport for Arc<CountingTransport> {
        async fn send_presence(
            &self,
            _jid: &str,
            _presence: &str,
            _duration_ms: u64,
        ) -> Result<Value, GatewayError> {
            self.presence_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }

        async fn send_text(&self, jid: &str, text: &str) -> Result<Value, GatewayError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "to": jid, "text": text }))
        }

        async fn send_document(
            &self,
            jid: &str,
            file_url: &str,
            _caption: &str,
            _file_name: &str,
        ) -> Result<Value, GatewayError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "to": jid, "media": file_url }))
        }
    }

    fn dispatcher(
        pool: PgPool,
        transport: Arc<CountingTransport>,
    ) -> (MessageDispatcher<Arc<CountingTransport>>, KillSwitchGuard) {
        let guard = KillSwitchGuard::new(SettingsStore::new(pool));
        let dispatcher = MessageDispatcher::new(transport, guard.clone())
            .with_presence_window(Duration::ZERO);
        (dispatcher, guard)
    }

    #[sqlx::test]
    async fn test_active_kill_switch_blocks_before_any_delay(pool: PgPool) {
        let transport = Arc::new(CountingTransport::default());
        let (dispatcher, guard) = dispatcher(pool, transport.clone());

        guard.activate("account banned (401)").await.expect("Write failed");

        let start = Instant::now();
        let result = dispatcher
            .send_text("5511987654321", "hello", 5, 10)
            .await;

        // Fails with the stored reason, before the 5-10s pacing delay.
        match result {
            Err(GatewayError::SafetyBlocked { reason }) => {
                assert_eq!(reason, "account banned (401)");
            }
            other => panic!("Expected SafetyBlocked, got {other:?}"),
        }
        assert!(start.elapsed() < Duration::from_secs(2));

        // Zero provider contact of any kind.
        assert_eq!(transport.presence_calls.load(Ordering::SeqCst), 0);
        assert_eq!(transport.send_calls.load(Ordering::SeqCst), 0);
    }

    #[sqlx::test]
    async fn test_send_text_issues_exactly_one_send(pool: PgPool) {
        let transport = Arc::new(CountingTransport::default());
        let (dispatcher, _guard) = dispatcher(pool, transport.clone());

        let response = dispatcher
            .send_text("+55 11 98765-4321", "hello", 0, 0)
            .await
            .expect("Send failed");

        assert_eq!(response["to"], "5511987654321@s.whatsapp.net");
        assert_eq!(transport.send_calls.load(Ordering::SeqCst), 1);
        assert_eq!(transport.presence_calls.load(Ordering::SeqCst), 1);
    }

    #[sqlx::test]
    async fn test_send_document_issues_exactly_one_send(pool: PgPool) {
        let transport = Arc::new(CountingTransport::default());
        let (dispatcher, _guard) = dispatcher(pool, transport.clone());

        let response = dispatcher
            .send_document(
                "5511987654321",
                "https://files.example/report.pdf",
                "Monthly report",
                "report.pdf",
                0,
                0,
            )
            .await
            .expect("Send failed");

        assert_eq!(response["media"], "https://files.example/report.pdf");
        assert_eq!(transport.send_calls.load(Ordering::SeqCst), 1);
    }

    /// Presence failures are cosmetic: the send still goes out.
    struct FailingPresenceTransport {
        send_calls: AtomicUsize,
    }

    #[async_trait]
    impl SendTransport for Arc<FailingPresenceTransport> {
        async fn send_presence(
            &self,
            _jid: &str,
            _presence: &str,
            _duration_ms: u64,
        ) -> Result<Value, GatewayError> {
            Err(GatewayError::Provider {
                status: Some(500),
                body: "HTTP 500: presence unavailable".into(),
            })
        }

        async fn send_text(&self, _jid: &str, _text: &str) -> Result<Value, GatewayError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "status": "PENDING" }))
        }

        async fn send_document(
            &self,
            _jid: &str,
            _file_url: &str,
            _caption: &str,
            _file_name: &str,
        ) -> Result<Value, GatewayError> {
            self.send_calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({}))
        }
    }

    #[sqlx::test]
    async fn test_presence_failure_does_not_abort_send(pool: PgPool) {
        let transport = Arc::new(FailingPresenceTransport {
            send_calls: AtomicUsize::new(0),
        });
        let guard = KillSwitchGuard::new(SettingsStore::new(pool));
        let dispatcher = MessageDispatcher::new(transport.clone(), guard)
            .with_presence_window(Duration::ZERO);

        dispatcher
            .send_text("5511987654321", "hello", 0, 0)
            .await
            .expect("Send should survive presence failure");

        assert_eq!(transport.send_calls.load(Ordering::SeqCst), 1);
    }
}
