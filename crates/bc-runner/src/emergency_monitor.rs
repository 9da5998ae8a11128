//! Periodic sweep over every live RUNNING runner, auto-pausing on a high
//! lifetime failure rate. Grounded on `fc-scheduler::DispatchScheduler::start`'s
//! pattern of a `tokio::spawn`ed loop ticking a `tokio::time::interval` and
//! checking a shared running flag each tick, rather than the
//! `CampaignRunner` worker's own per-campaign loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bc_common::types::{CampaignStatus, PauseReason};
use bc_events::{RealTimeEmitter, ToastKind};
use tokio::time::interval;
use tracing::{info, warn};

use crate::handle::RunnerRegistry;

/// Failure rate is only meaningful once a runner has made a handful of
/// attempts; otherwise one early failure would read as 100%.
const MIN_ATTEMPTS_FOR_JUDGEMENT: u64 = 10;
/// The warning toast fires at this fraction of the auto-pause threshold,
/// giving an operator advance notice before the campaign gets auto-paused.
const WARNING_THRESHOLD_RATIO: f64 = 0.6;

/// Thresholds and cadence for [`EmergencyMonitor`], sourced from
/// `bc_config::EmergencyMonitorConfig` by the composing binary so this
/// crate stays agnostic of the config system.
#[derive(Debug, Clone, Copy)]
pub struct EmergencyMonitorSettings {
    pub ban_rate_threshold: f64,
    pub sweep_interval: Duration,
}

impl Default for EmergencyMonitorSettings {
    fn default() -> Self {
        Self { ban_rate_threshold: 0.05, sweep_interval: Duration::from_secs(60) }
    }
}

pub struct EmergencyMonitor {
    registry: Arc<RunnerRegistry>,
    emitter: Arc<RealTimeEmitter>,
    settings: EmergencyMonitorSettings,
    running: Arc<AtomicBool>,
}

impl EmergencyMonitor {
    pub fn new(registry: Arc<RunnerRegistry>, emitter: Arc<RealTimeEmitter>, settings: EmergencyMonitorSettings) -> Self {
        Self { registry, emitter, settings, running: Arc::new(AtomicBool::new(false)) }
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("emergency monitor already running");
            return;
        }

        let registry = Arc::clone(&self.registry);
        let emitter = Arc::clone(&self.emitter);
        let running = Arc::clone(&self.running);
        let settings = self.settings;

        info!(sweep_interval_s = settings.sweep_interval.as_secs(), ban_rate_threshold = settings.ban_rate_threshold, "starting emergency monitor");
        tokio::spawn(async move {
            let mut ticker = interval(settings.sweep_interval);
            loop {
                ticker.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                sweep(&registry, &emitter, settings).await;
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs one sweep immediately, bypassing the interval. Exposed for
    /// integration tests that need to exercise the auto-pause path without
    /// waiting out the real sweep interval.
    pub async fn sweep_once(&self) {
        sweep(&self.registry, &self.emitter, self.settings).await;
    }
}

async fn sweep(registry: &RunnerRegistry, emitter: &RealTimeEmitter, settings: EmergencyMonitorSettings) {
    let handles = registry.all();
    metrics::gauge!("runner.emergency_monitor.live_campaigns").set(handles.len() as f64);

    let warning_threshold = settings.ban_rate_threshold * WARNING_THRESHOLD_RATIO;

    for handle in handles {
        if handle.status().await != CampaignStatus::Running {
            continue;
        }

        let (attempts, failures) = handle.lifetime_attempts_and_failures().await;
        if attempts < MIN_ATTEMPTS_FOR_JUDGEMENT {
            continue;
        }

        let rate = failures as f64 / attempts as f64;
        if rate >= settings.ban_rate_threshold {
            warn!(campaign_id = handle.campaign_id(), rate, "auto-pausing campaign for high failure rate");
            metrics::counter!("runner.emergency_monitor.auto_pauses_total").increment(1);
            if let Err(e) = handle.pause(PauseReason::AutoPauseBanRate, None).await {
                warn!(error = %e, campaign_id = handle.campaign_id(), "failed to auto-pause campaign");
            }
        } else if rate >= warning_threshold {
            emitter
                .toast(
                    handle.tenant_id(),
                    ToastKind::Warning,
                    "Elevated failure rate",
                    &format!("Campaign {} is failing {:.1}% of sends", handle.campaign_id(), rate * 100.0),
                )
                .await;
        }
    }
}
