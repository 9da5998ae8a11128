//! Real-time event fan-out, scoped per tenant. `RealTimeEmitter` composes
//! a `bc_common::SubscriberSink` and never blocks the runner: delivery is
//! best-effort, at-most-once.

use std::sync::Arc;

use bc_common::capability::SubscriberSink;
use bc_common::types::{CampaignStatus, TransportErrorKind};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;

/// Toast severity for `Event::Toast`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToastKind {
    Success,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Event {
    Progress { campaign_id: String, sent: u32, failed: u32, skipped: u32, total: u32, pct: f64, next_message_hint: Option<String> },
    MessageSuccess { campaign_id: String, ordinal: u32, recipient: String },
    MessageFailure { campaign_id: String, ordinal: u32, recipient: String, error_kind: TransportErrorKind, retryable: bool, attempt: u32, max_retries: u32 },
    StatusChange { campaign_id: String, from: CampaignStatus, to: CampaignStatus, reason: Option<String> },
    CampaignCompleted { campaign_id: String, sent: u32, failed: u32, skipped: u32 },
    Toast { kind: ToastKind, title: String, body: String },
}

/// Composes typed event construction over any `SubscriberSink`. Holding
/// this behind the capability trait (rather than a concrete transport)
/// keeps the runner decoupled from how events actually reach a client.
pub struct RealTimeEmitter {
    sink: Arc<dyn SubscriberSink>,
}

impl RealTimeEmitter {
    pub fn new(sink: Arc<dyn SubscriberSink>) -> Self {
        Self { sink }
    }

    async fn emit(&self, tenant_id: &str, event: Event) {
        self.sink.publish(tenant_id, json!(event)).await;
    }

    pub async fn emit_progress(&self, tenant_id: &str, campaign_id: &str, sent: u32, failed: u32, skipped: u32, total: u32, next_message_hint: Option<String>) {
        let pct = if total == 0 { 0.0 } else { (sent + failed + skipped) as f64 / total as f64 * 100.0 };
        self.emit(tenant_id, Event::Progress { campaign_id: campaign_id.to_string(), sent, failed, skipped, total, pct, next_message_hint }).await;
    }

    pub async fn emit_success(&self, tenant_id: &str, campaign_id: &str, ordinal: u32, recipient: &str) {
        self.emit(tenant_id, Event::MessageSuccess { campaign_id: campaign_id.to_string(), ordinal, recipient: recipient.to_string() }).await;
    }

    pub async fn emit_failure(
        &self,
        tenant_id: &str,
        campaign_id: &str,
        ordinal: u32,
        recipient: &str,
        error_kind: TransportErrorKind,
        retryable: bool,
        attempt: u32,
        max_retries: u32,
    ) {
        self.emit(
            tenant_id,
            Event::MessageFailure { campaign_id: campaign_id.to_string(), ordinal, recipient: recipient.to_string(), error_kind, retryable, attempt, max_retries },
        )
        .await;
    }

    pub async fn emit_status_change(&self, tenant_id: &str, campaign_id: &str, from: CampaignStatus, to: CampaignStatus, reason: Option<String>) {
        self.emit(tenant_id, Event::StatusChange { campaign_id: campaign_id.to_string(), from, to, reason }).await;
    }

    pub async fn emit_completed(&self, tenant_id: &str, campaign_id: &str, sent: u32, failed: u32, skipped: u32) {
        self.emit(tenant_id, Event::CampaignCompleted { campaign_id: campaign_id.to_string(), sent, failed, skipped }).await;
    }

    pub async fn toast(&self, tenant_id: &str, kind: ToastKind, title: &str, body: &str) {
        self.emit(tenant_id, Event::Toast { kind, title: title.to_string(), body: body.to_string() }).await;
    }
}

/// In-process `SubscriberSink` backed by a per-tenant broadcast channel.
/// Slow subscribers lag and silently miss events rather than blocking the
/// publisher, matching `tokio::sync::broadcast`'s own semantics.
pub struct BroadcastSubscriberSink {
    channels: DashMap<String, broadcast::Sender<serde_json::Value>>,
    capacity: usize,
}

impl BroadcastSubscriberSink {
    pub fn new(capacity: usize) -> Self {
        Self { channels: DashMap::new(), capacity }
    }

    pub fn subscribe(&self, tenant_id: &str) -> broadcast::Receiver<serde_json::Value> {
        self.channels.entry(tenant_id.to_string()).or_insert_with(|| broadcast::channel(self.capacity).0).subscribe()
    }
}

impl Default for BroadcastSubscriberSink {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait::async_trait]
impl SubscriberSink for BroadcastSubscriberSink {
    async fn publish(&self, tenant_id: &str, event: serde_json::Value) {
        if let Some(sender) = self.channels.get(tenant_id) {
            // No receivers is not an error; it just means nobody is
            // listening on this tenant channel right now.
            let _ = sender.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscriber_does_not_panic() {
        let sink = BroadcastSubscriberSink::default();
        sink.publish("tenant-1", json!({"x": 1})).await;
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let sink = Arc::new(BroadcastSubscriberSink::default());
        let mut rx = sink.subscribe("tenant-1");
        let emitter = RealTimeEmitter::new(sink);

        emitter.emit_success("tenant-1", "c1", 0, "+15550001").await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received["type"], "messageSuccess");
    }

    #[tokio::test]
    async fn events_for_one_campaign_arrive_in_publish_order() {
        let sink = Arc::new(BroadcastSubscriberSink::default());
        let mut rx = sink.subscribe("tenant-1");
        let emitter = RealTimeEmitter::new(sink);

        for ordinal in 0..5 {
            emitter.emit_success("tenant-1", "c1", ordinal, "+1555").await;
        }

        for expected in 0..5 {
            let received = rx.recv().await.unwrap();
            assert_eq!(received["ordinal"], expected);
        }
    }
}
