//! Human-like pacing: delay composition, fingerprint/header generation,
//! timing self-inspection, and risk-adaptive delay scaling.

pub mod adaptive_delay;
pub mod anti_detection;
pub mod human_simulator;

pub use adaptive_delay::{AdaptiveDelayController, RiskTier};
pub use anti_detection::{AntiDetectionEngine, IssueSeverity, SelfInspectIssue, SelfInspectReport};
pub use human_simulator::{compose_delay, compose_delay_for_age, DelayComponents};
