//! Core domain types: Campaign, QueueItem, and their satellite records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

// ============================================================================
// Campaign
// ============================================================================

/// Lifecycle state of a Campaign. See `bc-runner::CampaignRunner` for the
/// transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum CampaignStatus {
    Scheduled,
    Running,
    Paused,
    Stopped,
    Completed,
    Failed,
}

impl CampaignStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Stopped | CampaignStatus::Completed | CampaignStatus::Failed)
    }
}

/// Reason a campaign was paused; carried on `Campaign.pause_reason`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PauseReason {
    Manual { note: Option<String> },
    AccountHealthLow,
    AccountHealthCritical { repeat_count: u32 },
    AutoPauseBanRate,
    BusinessHoursClosed,
    DailyLimitReached,
}

/// Coarse channel maturity classification selecting safety defaults (§6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChannelAge {
    New,
    Warming,
    Established,
}

/// A user-scoped send run. Field layout mirrors the durable `campaigns`
/// table.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Campaign {
    pub campaign_id: String,
    pub tenant_id: String,
    pub channel_id: String,
    pub name: String,
    pub status: CampaignStatus,

    pub total: u32,
    pub sent: u32,
    pub failed: u32,
    pub skipped: u32,
    pub current_index: u32,

    pub config: super::config::CampaignConfig,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub paused_at: Option<DateTime<Utc>>,
    pub resume_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<PauseReason>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl Campaign {
    /// `progressPct = (sent+failed+skipped)/total`, 0 when `total == 0`.
    pub fn progress_pct(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        let done = (self.sent + self.failed + self.skipped) as f64;
        (done / self.total as f64) * 100.0
    }

    pub fn pending_or_claimed(&self) -> u32 {
        self.total.saturating_sub(self.sent + self.failed + self.skipped)
    }
}

// ============================================================================
// QueueItem
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueItemStatus {
    Pending,
    Claimed,
    Sent,
    Failed,
    Skipped,
}

impl QueueItemStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueItemStatus::Sent | QueueItemStatus::Failed | QueueItemStatus::Skipped)
    }
}

/// Classification of a `ChatTransport` failure, assigned once at the runner
/// boundary and never reclassified downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportErrorKind {
    TransientNetwork,
    RateLimit,
    PermissionRevoked,
    RecipientInvalid,
    Unknown,
}

impl TransportErrorKind {
    /// {TRANSIENT_NETWORK, RATE_LIMIT} are retryable unless the item has
    /// exhausted `maxRetries`.
    pub fn is_retryable_kind(self) -> bool {
        matches!(self, TransportErrorKind::TransientNetwork | TransportErrorKind::RateLimit)
    }
}

/// One recipient task, owned by its Campaign.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct QueueItem {
    pub item_id: String,
    pub campaign_id: String,
    pub ordinal: u32,
    pub recipient_address: String,
    pub recipient_label: Option<String>,
    pub rendered_message: String,
    pub status: QueueItemStatus,
    pub attempt: u32,
    pub last_error: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
}

/// Outcome passed to `MessageQueueStore::complete`.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Sent,
    Failed { kind: TransportErrorKind, reason: String, retryable: bool },
    Skipped { reason: String },
}

// ============================================================================
// ValidationCacheEntry
// ============================================================================

/// Which cache tier served a lookup; used to decide which outer layers need
/// warming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLayer {
    L1,
    L2,
    L3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationCacheEntry {
    pub address: String,
    pub exists: bool,
    pub provider_handle: Option<String>,
    pub validated_at: DateTime<Utc>,
}

/// Result of `PhoneValidationCache::lookup`.
#[derive(Debug, Clone)]
pub enum CacheLookup {
    Hit { exists: bool, handle: Option<String>, layer: CacheLayer },
    Miss,
}

// ============================================================================
// HealthRecord
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionQuality {
    Good,
    Degraded,
    Poor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub channel_id: String,
    pub score: u8,
    pub connection_quality: ConnectionQuality,
    pub recent_failure_count: u32,
    pub recovery_until: Option<DateTime<Utc>>,
    pub repeat_pause_count_7d: u32,
}

impl HealthRecord {
    pub fn new(channel_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            score: 100,
            connection_quality: ConnectionQuality::Good,
            recent_failure_count: 0,
            recovery_until: None,
            repeat_pause_count_7d: 0,
        }
    }
}

// ============================================================================
// FingerprintRecord
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub manufacturer: String,
    pub model: String,
    pub os_version: String,
    pub user_agent: String,
    pub app_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    pub campaign_id: String,
    pub device: DeviceDescriptor,
    pub device_id: String,
    pub generation: u32,
}

// ============================================================================
// TimingRecord
// ============================================================================

/// Append-only bounded ring of `(op, t_ms, ts_real)` per campaign, used only
/// by `AntiDetectionEngine::self_inspect`.
#[derive(Debug, Clone)]
pub struct TimingRing {
    capacity: usize,
    entries: VecDeque<TimingEntry>,
}

#[derive(Debug, Clone, Copy)]
pub struct TimingEntry {
    pub op: TimingOp,
    pub t_ms: u64,
    pub ts_real: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimingOp {
    Send,
    Validate,
}

impl TimingRing {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity, entries: VecDeque::with_capacity(capacity) }
    }

    pub fn push(&mut self, entry: TimingEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TimingEntry> {
        self.entries.iter()
    }
}

impl Default for TimingRing {
    fn default() -> Self {
        Self::with_capacity(100)
    }
}
