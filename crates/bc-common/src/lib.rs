//! Shared domain types, error taxonomy, external capabilities, and logging
//! setup for the Blast Campaign Execution Core. Every other `bc-*` crate
//! depends on this one.

pub mod capability;
pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use capability::{ChatTransport, Clock, ExistsResult, SendOutcome, SubscriberSink, SystemClock, TransportError};
pub use config::{BusinessHoursConfig, CampaignConfig, Range, RetryConfig, UserCampaignConfig};
pub use error::{CoreError, ErrorEnvelope, Result};
pub use types::{
    Campaign, CampaignStatus, CacheLayer, CacheLookup, ChannelAge, CompletionOutcome, ConnectionQuality,
    DeviceDescriptor, FingerprintRecord, HealthRecord, PauseReason, QueueItem, QueueItemStatus, TimingEntry,
    TimingOp, TimingRing, TransportErrorKind, ValidationCacheEntry,
};
