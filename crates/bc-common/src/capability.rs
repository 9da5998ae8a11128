//! External capabilities the runner depends on, injected rather than
//! constructed internally so that tests can substitute fakes without any
//! network or wall-clock dependency.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

/// Result of `ChatTransport::exists_on_platform`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExistsResult {
    pub exists: bool,
    pub handle: Option<String>,
}

/// Result of `ChatTransport::send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendOutcome {
    pub provider_message_id: String,
}

/// Error raised by a `ChatTransport` call, pre-classification. The runner
/// maps this to a `CoreError` transport variant at the call boundary.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    #[error("rate limited: {0}")]
    RateLimit(String),
    #[error("permission revoked: {0}")]
    PermissionRevoked(String),
    #[error("recipient invalid: {0}")]
    RecipientInvalid(String),
    #[error("unknown transport error: {0}")]
    Unknown(String),
}

/// The outbound channel surface a `CampaignRunner` drives. Implementations
/// talk to whatever messaging platform backs a channel; test doubles
/// simulate one in-process.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn exists_on_platform(&self, address: &str) -> std::result::Result<ExistsResult, TransportError>;

    async fn send(
        &self,
        channel_id: &str,
        address: &str,
        body: &str,
        headers: &[(String, String)],
    ) -> std::result::Result<SendOutcome, TransportError>;
}

/// Virtualizable time source. Production code uses `SystemClock`; tests use
/// a fake that advances instantly and records cancellation without waiting
/// wall-clock time.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Sleeps for `duration`, returning early if `cancellation` fires. The
    /// ≤100ms cancellation latency bound applies to every caller of this
    /// method.
    async fn sleep(&self, duration: Duration, cancellation: &tokio_util::sync::CancellationToken);
}

/// Non-blocking, best-effort real-time event fan-out. A publish failure or
/// slow subscriber must never stall the runner.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    async fn publish(&self, tenant_id: &str, event: serde_json::Value);
}

/// Wall-clock `Clock` used outside of tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration, cancellation: &tokio_util::sync::CancellationToken) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = cancellation.cancelled() => {}
        }
    }
}

/// Converts a `TransportError` into the crate's closed error taxonomy. The
/// runner calls this exactly once per failed send, at the boundary named by
/// the propagation policy.
pub fn classify_transport_error(err: &TransportError) -> crate::error::CoreError {
    use crate::error::CoreError;
    match err {
        TransportError::TransientNetwork(m) => CoreError::TransportTransient(m.clone()),
        TransportError::RateLimit(m) => CoreError::TransportTransient(m.clone()),
        TransportError::PermissionRevoked(m) => CoreError::TransportPermanent(m.clone()),
        TransportError::RecipientInvalid(m) => CoreError::RecipientInvalid(m.clone()),
        TransportError::Unknown(m) => CoreError::TransportPermanent(m.clone()),
    }
}

/// Used by callers that need a `Result<(), CoreError>` shape around a
/// publish; `SubscriberSink::publish` itself never fails by contract.
pub async fn publish_ignoring_errors(sink: &dyn SubscriberSink, tenant_id: &str, event: serde_json::Value) -> Result<()> {
    sink.publish(tenant_id, event).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_transport_error_maps_retryable_kinds_to_transient() {
        let err = TransportError::RateLimit("429".into());
        assert!(matches!(classify_transport_error(&err), crate::error::CoreError::TransportTransient(_)));
    }

    #[test]
    fn classify_transport_error_maps_permission_revoked_to_permanent() {
        let err = TransportError::PermissionRevoked("blocked".into());
        assert!(matches!(classify_transport_error(&err), crate::error::CoreError::TransportPermanent(_)));
    }

    #[tokio::test]
    async fn system_clock_sleep_respects_cancellation() {
        let token = tokio_util::sync::CancellationToken::new();
        let clock = SystemClock;
        token.cancel();
        let start = std::time::Instant::now();
        clock.sleep(Duration::from_secs(5), &token).await;
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
