//! Per-campaign pacing configuration: channel-age defaults and the
//! per-key deep merge that lets a user override only part of the tree.

use serde::{Deserialize, Serialize};

use crate::types::ChannelAge;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// User-supplied config section; every field is optional so that omitted
/// keys fall back to the channel-age default (see `CampaignConfig::for_age`
/// and `merge_user_config`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, utoipa::ToSchema)]
pub struct UserCampaignConfig {
    pub message_delay: Option<Range>,
    pub contact_delay: Option<Range>,
    pub rest_delay: Option<Range>,
    pub rest_threshold: Option<Range>,
    pub daily_limit: Option<Range>,
    pub business_hours: Option<BusinessHoursConfig>,
    pub retry_config: Option<RetryConfig>,
    #[serde(default)]
    pub account_age: Option<ChannelAge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct BusinessHoursConfig {
    pub enabled: bool,
    pub start_hour: u8,
    pub end_hour: u8,
    pub timezone: String,
    pub exclude_weekends: bool,
    pub exclude_lunch_break: bool,
    pub lunch_start: u8,
    pub lunch_end: u8,
}

impl Default for BusinessHoursConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start_hour: 9,
            end_hour: 18,
            timezone: "UTC".to_string(),
            exclude_weekends: true,
            exclude_lunch_break: false,
            lunch_start: 12,
            lunch_end: 13,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_s: f64,
    #[serde(default)]
    pub exponential_backoff: bool,
    #[serde(default = "default_retryable_errors")]
    pub retryable_errors: Vec<String>,
}

fn default_retryable_errors() -> Vec<String> {
    vec!["TRANSPORT_TRANSIENT".to_string()]
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_s: 5.0,
            exponential_backoff: false,
            retryable_errors: default_retryable_errors(),
        }
    }
}

/// Fully-resolved per-campaign config: every field present, either from the
/// channel-age defaults table or from a user override. This is what gets
/// persisted on `Campaign.config`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CampaignConfig {
    pub message_delay: Range,
    pub contact_delay: Range,
    pub rest_delay: Range,
    pub rest_threshold: Range,
    pub daily_limit: Range,
    pub business_hours: BusinessHoursConfig,
    pub retry_config: RetryConfig,
    pub account_age: ChannelAge,
}

impl CampaignConfig {
    /// Channel-age defaults. `messageDelay` and `restDelay`/`restThreshold`
    /// don't vary by age; only `contactDelay` and `dailyLimit` do.
    pub fn for_age(age: ChannelAge) -> Self {
        let (contact_delay, daily_limit) = match age {
            ChannelAge::New => (Range::new(90.0, 300.0), Range::new(40.0, 60.0)),
            ChannelAge::Warming => (Range::new(60.0, 180.0), Range::new(80.0, 120.0)),
            ChannelAge::Established => (Range::new(45.0, 150.0), Range::new(150.0, 200.0)),
        };

        Self {
            message_delay: Range::new(2.0, 10.0),
            contact_delay,
            rest_delay: Range::new(60.0, 120.0),
            rest_threshold: Range::new(20.0, 40.0),
            daily_limit,
            business_hours: BusinessHoursConfig::default(),
            retry_config: RetryConfig::default(),
            account_age: age,
        }
    }

    /// Merge a user-supplied partial config over the channel-age defaults,
    /// per-key: a key the user supplies replaces the default wholesale, a
    /// key the user omits is left untouched. There is no deep merge within
    /// a single `Range` or `RetryConfig` value — presence of the key is
    /// all-or-nothing per the control-plane contract.
    pub fn merge_user_config(user: &UserCampaignConfig) -> Self {
        let age = user.account_age.unwrap_or(ChannelAge::New);
        let mut resolved = Self::for_age(age);

        if let Some(v) = user.message_delay {
            resolved.message_delay = v;
        }
        if let Some(v) = user.contact_delay {
            resolved.contact_delay = v;
        }
        if let Some(v) = user.rest_delay {
            resolved.rest_delay = v;
        }
        if let Some(v) = user.rest_threshold {
            resolved.rest_threshold = v;
        }
        if let Some(v) = user.daily_limit {
            resolved.daily_limit = v;
        }
        if let Some(ref v) = user.business_hours {
            resolved.business_hours = v.clone();
        }
        if let Some(ref v) = user.retry_config {
            resolved.retry_config = v.clone();
        }

        resolved
    }
}
