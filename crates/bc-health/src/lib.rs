//! Per-channel health scoring (`AccountHealthMonitor`) and the throttling/
//! recovery ladder it drives (`RecoveryController`).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;

use bc_common::types::{ConnectionQuality, HealthRecord};

const SUCCESS_DELTA: i32 = 1;
const FAILURE_DELTA: i32 = -5;
const MAX_CONNECTION_DOWNGRADE: i32 = 30;

/// Outcome of re-evaluating a channel's throttling ladder after a score
/// update.
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryDecision {
    /// Score is healthy; no throttling in effect.
    Normal,
    /// `score < 70`: delay factor 1.5x, concurrency capped to 1.
    Throttle { delay_factor: f64, concurrency_cap: u32 },
    /// `score < 50` or `score < 30`: campaign must pause until `resume_at`.
    ForcePause { resume_at: DateTime<Utc>, repeat_count: u32 },
}

struct ChannelState {
    record: HealthRecord,
    pause_history: Vec<DateTime<Utc>>,
}

impl ChannelState {
    fn new(channel_id: &str) -> Self {
        Self { record: HealthRecord::new(channel_id), pause_history: Vec::new() }
    }
}

/// Tracks health per outbound channel and decides throttling/recovery
/// actions. Health scores are mutated by whichever campaign last sent on a
/// channel; all mutation goes through a per-channel mutex so concurrent
/// senders never race the score.
pub struct AccountHealthMonitor {
    channels: DashMap<String, Mutex<ChannelState>>,
}

impl Default for AccountHealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountHealthMonitor {
    pub fn new() -> Self {
        Self { channels: DashMap::new() }
    }

    pub fn record(&self, channel_id: &str) -> HealthRecord {
        self.channels.entry(channel_id.to_string()).or_insert_with(|| Mutex::new(ChannelState::new(channel_id))).lock().record.clone()
    }

    /// Applies a +1/-5 delta for a send outcome, clamped to [0,100], then
    /// re-evaluates the throttling ladder.
    pub fn on_send_result(&self, channel_id: &str, success: bool) -> RecoveryDecision {
        let entry = self.channels.entry(channel_id.to_string()).or_insert_with(|| Mutex::new(ChannelState::new(channel_id)));
        let mut state = entry.lock();

        let delta = if success { SUCCESS_DELTA } else { FAILURE_DELTA };
        state.record.score = clamp_score(state.record.score as i32 + delta);
        if !success {
            state.record.recent_failure_count += 1;
        } else {
            state.record.recent_failure_count = 0;
        }

        self.evaluate(&mut state)
    }

    /// Applies a connection-quality downgrade, subtracting up to 30 points
    /// proportional to severity (1.0 = full downgrade).
    pub fn on_connection_quality(&self, channel_id: &str, quality: ConnectionQuality, severity: f64) -> RecoveryDecision {
        let entry = self.channels.entry(channel_id.to_string()).or_insert_with(|| Mutex::new(ChannelState::new(channel_id)));
        let mut state = entry.lock();

        state.record.connection_quality = quality;
        let penalty = (MAX_CONNECTION_DOWNGRADE as f64 * severity.clamp(0.0, 1.0)).round() as i32;
        state.record.score = clamp_score(state.record.score as i32 - penalty);

        self.evaluate(&mut state)
    }

    fn evaluate(&self, state: &mut ChannelState) -> RecoveryDecision {
        let score = state.record.score;
        let now = Utc::now();

        state.pause_history.retain(|t| now - *t < ChronoDuration::days(7));
        state.record.repeat_pause_count_7d = state.pause_history.len() as u32;

        if score < 30 {
            let hours = pause_hours_for_repeat(state.record.repeat_pause_count_7d);
            let resume_at = now + ChronoDuration::hours(hours);
            state.pause_history.push(now);
            state.record.repeat_pause_count_7d = state.pause_history.len() as u32;
            state.record.recovery_until = Some(resume_at);
            return RecoveryDecision::ForcePause { resume_at, repeat_count: state.record.repeat_pause_count_7d };
        }

        if score < 50 {
            let hours = rand::thread_rng().gen_range(2.0..=4.0);
            let resume_at = now + ChronoDuration::minutes((hours * 60.0) as i64);
            state.pause_history.push(now);
            state.record.repeat_pause_count_7d = state.pause_history.len() as u32;
            state.record.recovery_until = Some(resume_at);
            return RecoveryDecision::ForcePause { resume_at, repeat_count: state.record.repeat_pause_count_7d };
        }

        if score < 70 {
            return RecoveryDecision::Throttle { delay_factor: 1.5, concurrency_cap: 1 };
        }

        state.record.recovery_until = None;
        RecoveryDecision::Normal
    }
}

fn clamp_score(score: i32) -> u8 {
    score.clamp(0, 100) as u8
}

/// Ladder applied when `score < 30`: the first occurrence in a rolling 7
/// day window gets the longest pause, each subsequent occurrence shortens
/// it, bottoming out at 6h. This front-loads caution on an account's first
/// severe episode and avoids compounding pause durations on an account that
/// keeps getting flagged in the same week.
fn pause_hours_for_repeat(repeat_count: u32) -> i64 {
    match repeat_count {
        0 => 48,
        1 => 24,
        2 => 12,
        _ => 6,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_raises_score_clamped_to_100() {
        let monitor = AccountHealthMonitor::new();
        for _ in 0..200 {
            monitor.on_send_result("ch1", true);
        }
        assert_eq!(monitor.record("ch1").score, 100);
    }

    #[test]
    fn repeated_failures_trigger_throttle_then_pause() {
        let monitor = AccountHealthMonitor::new();
        let mut last = RecoveryDecision::Normal;
        for _ in 0..10 {
            last = monitor.on_send_result("ch1", false);
        }
        assert!(matches!(last, RecoveryDecision::Throttle { .. }) || matches!(last, RecoveryDecision::ForcePause { .. }));
    }

    #[test]
    fn score_below_30_forces_pause_with_repeat_ladder() {
        let monitor = AccountHealthMonitor::new();
        for _ in 0..20 {
            monitor.on_send_result("ch1", false);
        }
        let decision = monitor.on_send_result("ch1", false);
        match decision {
            RecoveryDecision::ForcePause { repeat_count, .. } => assert!(repeat_count >= 1),
            other => panic!("expected ForcePause, got {:?}", other),
        }
    }

    #[test]
    fn pause_hours_ladder_shortens_with_repeats() {
        assert_eq!(pause_hours_for_repeat(0), 48);
        assert_eq!(pause_hours_for_repeat(3), 6);
    }
}
