//! Converts observed per-campaign outcomes into a multiplicative delay
//! factor, promoting/demoting a risk tier based on an EMA of the failure
//! rate.

use dashmap::DashMap;
use parking_lot::Mutex;

/// Categorical risk tier, ordered from least to most conservative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskTier {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTier {
    pub fn factor(self) -> f64 {
        match self {
            RiskTier::Low => 1.0,
            RiskTier::Medium => 1.5,
            RiskTier::High => 2.0,
            RiskTier::Critical => 3.0,
        }
    }

    fn promote(self) -> Self {
        match self {
            RiskTier::Low => RiskTier::Medium,
            RiskTier::Medium => RiskTier::High,
            RiskTier::High | RiskTier::Critical => RiskTier::Critical,
        }
    }

    fn demote(self) -> Self {
        match self {
            RiskTier::Critical => RiskTier::High,
            RiskTier::High => RiskTier::Medium,
            RiskTier::Medium | RiskTier::Low => RiskTier::Low,
        }
    }
}

const HALF_LIFE_MESSAGES: f64 = 20.0;
const PROMOTE_THRESHOLD: f64 = 0.15;
const DEMOTE_THRESHOLD: f64 = 0.03;
const HOLD_MESSAGES: u32 = 10;
const MAX_FACTOR: f64 = 5.0;

struct CampaignState {
    ema_failure_rate: f64,
    tier: RiskTier,
    hold_remaining: u32,
    demote_streak: u32,
}

impl Default for CampaignState {
    fn default() -> Self {
        Self { ema_failure_rate: 0.0, tier: RiskTier::Low, hold_remaining: 0, demote_streak: 0 }
    }
}

/// Per-campaign EMA-driven risk tier tracker. One instance shared across a
/// process; state keyed by campaign id.
pub struct AdaptiveDelayController {
    states: DashMap<String, Mutex<CampaignState>>,
}

impl Default for AdaptiveDelayController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdaptiveDelayController {
    pub fn new() -> Self {
        Self { states: DashMap::new() }
    }

    /// Records one outcome (`failed = true` on a failed send) and returns
    /// the current multiplicative factor for this campaign, after applying
    /// promotion/demotion rules.
    pub fn record_outcome(&self, campaign_id: &str, failed: bool) -> f64 {
        let entry = self.states.entry(campaign_id.to_string()).or_insert_with(|| Mutex::new(CampaignState::default()));
        let mut state = entry.lock();

        let alpha = 1.0 - 0.5f64.powf(1.0 / HALF_LIFE_MESSAGES);
        let sample = if failed { 1.0 } else { 0.0 };
        state.ema_failure_rate = state.ema_failure_rate + alpha * (sample - state.ema_failure_rate);

        if state.hold_remaining > 0 {
            state.hold_remaining -= 1;
        }

        if state.ema_failure_rate >= PROMOTE_THRESHOLD {
            if state.hold_remaining == 0 {
                let promoted = state.tier.promote();
                if promoted != state.tier {
                    state.tier = promoted;
                }
                state.hold_remaining = HOLD_MESSAGES;
            }
            state.demote_streak = 0;
        } else if state.ema_failure_rate <= DEMOTE_THRESHOLD {
            state.demote_streak += 1;
            if state.demote_streak >= HOLD_MESSAGES && state.hold_remaining == 0 {
                state.tier = state.tier.demote();
                state.demote_streak = 0;
            }
        } else {
            state.demote_streak = 0;
        }

        self.risk_override_or_tier_factor(&state, None)
    }

    /// Applies an externally-supplied risk signal (e.g. from a RiskAssessor)
    /// instead of the internally tracked tier, still clamped to 5.0x.
    pub fn factor_with_override(&self, campaign_id: &str, override_tier: Option<RiskTier>) -> f64 {
        let entry = self.states.entry(campaign_id.to_string()).or_insert_with(|| Mutex::new(CampaignState::default()));
        let state = entry.lock();
        self.risk_override_or_tier_factor(&state, override_tier)
    }

    fn risk_override_or_tier_factor(&self, state: &CampaignState, override_tier: Option<RiskTier>) -> f64 {
        let tier = override_tier.unwrap_or(state.tier);
        tier.factor().min(MAX_FACTOR)
    }

    pub fn current_tier(&self, campaign_id: &str) -> RiskTier {
        self.states.get(campaign_id).map(|e| e.lock().tier).unwrap_or(RiskTier::Low)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_failures_promote_tier() {
        let controller = AdaptiveDelayController::new();
        for _ in 0..30 {
            controller.record_outcome("c1", true);
        }
        assert!(controller.current_tier("c1") > RiskTier::Low);
    }

    #[test]
    fn sustained_success_demotes_back_to_low() {
        let controller = AdaptiveDelayController::new();
        for _ in 0..30 {
            controller.record_outcome("c1", true);
        }
        assert!(controller.current_tier("c1") > RiskTier::Low);

        for _ in 0..200 {
            controller.record_outcome("c1", false);
        }
        assert_eq!(controller.current_tier("c1"), RiskTier::Low);
    }

    #[test]
    fn factor_never_exceeds_5x() {
        assert!(RiskTier::Critical.factor() <= 5.0);
    }
}
