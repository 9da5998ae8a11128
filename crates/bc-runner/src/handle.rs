//! `RunnerHandle` decouples `EmergencyMonitor` and the control-plane API
//! from the concrete `CampaignRunner` type, the way `fc-outbox`'s
//! `EnhancedOutboxProcessor` depends on `OutboxRepository`/leader-election
//! collaborators through trait objects rather than holding a back-reference
//! to its caller. Monitor and API code talk only to `Arc<dyn RunnerHandle>`.

use async_trait::async_trait;
use bc_common::error::Result;
use bc_common::types::{CampaignStatus, PauseReason};
use chrono::{DateTime, Utc};
use dashmap::DashMap;

#[async_trait]
pub trait RunnerHandle: Send + Sync {
    fn campaign_id(&self) -> &str;

    /// Owning tenant, for `EmergencyMonitor`'s warning-only toast path.
    fn tenant_id(&self) -> &str;

    async fn status(&self) -> CampaignStatus;

    async fn pause(&self, reason: PauseReason, resume_at: Option<DateTime<Utc>>) -> Result<()>;

    async fn resume(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Lifetime send attempts and failures, for `EmergencyMonitor`'s
    /// failure-rate sweep.
    async fn lifetime_attempts_and_failures(&self) -> (u64, u64);
}

/// In-process map of `campaignId -> RunnerHandle` that `EmergencyMonitor`
/// and the control-plane API use to reach live runners.
#[derive(Default)]
pub struct RunnerRegistry {
    handles: DashMap<String, std::sync::Arc<dyn RunnerHandle>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self { handles: DashMap::new() }
    }

    pub fn register(&self, handle: std::sync::Arc<dyn RunnerHandle>) {
        self.handles.insert(handle.campaign_id().to_string(), handle);
    }

    pub fn unregister(&self, campaign_id: &str) {
        self.handles.remove(campaign_id);
    }

    pub fn get(&self, campaign_id: &str) -> Option<std::sync::Arc<dyn RunnerHandle>> {
        self.handles.get(campaign_id).map(|h| h.clone())
    }

    pub fn all(&self) -> Vec<std::sync::Arc<dyn RunnerHandle>> {
        self.handles.iter().map(|e| e.value().clone()).collect()
    }
}
