//! `CampaignRunner`: drives one Campaign through its lifecycle, composing
//! the cache, pacing, health, queue, and event crates. One runner per
//! RUNNING campaign; a single persistent worker task per runner, parked on
//! a `Notify` while paused rather than respawned, the way
//! `fc-scheduler::DispatchScheduler` parks its poll loops on a shared
//! `Arc<RwLock<bool>>` instead of tearing tasks down and back up.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bc_cache::PhoneValidationCache;
use bc_common::capability::{ChatTransport, Clock, TransportError};
use bc_common::config::CampaignConfig;
use bc_common::error::Result;
use bc_common::types::{
    CampaignStatus, CompletionOutcome, PauseReason, QueueItem, QueueItemStatus, TimingOp, TransportErrorKind,
};
use bc_events::RealTimeEmitter;
use bc_health::{AccountHealthMonitor, RecoveryDecision};
use bc_pacing::{human_simulator, AdaptiveDelayController, AntiDetectionEngine};
use bc_queue::{CampaignStore, MessageQueueStore};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::business_hours;
use crate::handle::RunnerHandle;

enum LoopOutcome {
    Continue,
    Exit,
}

/// Everything `CampaignRunner` needs from the outside world, bundled so
/// construction sites don't have to name every field positionally.
pub struct RunnerDeps {
    pub campaign_store: Arc<CampaignStore>,
    pub queue_store: Arc<MessageQueueStore>,
    pub cache: Arc<PhoneValidationCache>,
    pub health: Arc<AccountHealthMonitor>,
    pub adaptive_delay: Arc<AdaptiveDelayController>,
    pub anti_detection: Arc<AntiDetectionEngine>,
    pub emitter: Arc<RealTimeEmitter>,
    pub transport: Arc<dyn ChatTransport>,
    pub clock: Arc<dyn Clock>,
}

pub struct CampaignRunner {
    campaign_id: String,
    tenant_id: String,
    channel_id: String,

    campaign_store: Arc<CampaignStore>,
    queue_store: Arc<MessageQueueStore>,
    cache: Arc<PhoneValidationCache>,
    health: Arc<AccountHealthMonitor>,
    adaptive_delay: Arc<AdaptiveDelayController>,
    anti_detection: Arc<AntiDetectionEngine>,
    emitter: Arc<RealTimeEmitter>,
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,

    config: CampaignConfig,
    status: RwLock<CampaignStatus>,
    cancellation: Mutex<CancellationToken>,
    resume_notify: Notify,

    rng: Mutex<StdRng>,
    rest_threshold: u32,
    daily_limit: u32,
    messages_since_rest: AtomicU32,
    sent_today: AtomicU32,
    failed_today: AtomicU32,
    lifetime_attempts: AtomicU64,
    lifetime_failures: AtomicU64,
    last_forgot_at: Mutex<Option<DateTime<Utc>>>,
    recovery_multiplier: Mutex<f64>,
}

impl CampaignRunner {
    /// `seed` makes every random draw this runner makes (rest duration,
    /// chaos pauses, the one-time rest-threshold/daily-limit draws)
    /// reproducible; tests pass a fixed seed, production draws one from
    /// `rand::thread_rng()` once per campaign at creation time.
    pub fn new(campaign_id: String, tenant_id: String, channel_id: String, config: CampaignConfig, seed: u64, deps: RunnerDeps) -> Arc<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let rest_threshold = rng.gen_range(config.rest_threshold.min..=config.rest_threshold.max).round().max(1.0) as u32;
        let daily_limit = rng.gen_range(config.daily_limit.min..=config.daily_limit.max).round().max(1.0) as u32;

        Arc::new(Self {
            campaign_id,
            tenant_id,
            channel_id,
            campaign_store: deps.campaign_store,
            queue_store: deps.queue_store,
            cache: deps.cache,
            health: deps.health,
            adaptive_delay: deps.adaptive_delay,
            anti_detection: deps.anti_detection,
            emitter: deps.emitter,
            transport: deps.transport,
            clock: deps.clock,
            config,
            status: RwLock::new(CampaignStatus::Scheduled),
            cancellation: Mutex::new(CancellationToken::new()),
            resume_notify: Notify::new(),
            rng: Mutex::new(rng),
            rest_threshold,
            daily_limit,
            messages_since_rest: AtomicU32::new(0),
            sent_today: AtomicU32::new(0),
            failed_today: AtomicU32::new(0),
            lifetime_attempts: AtomicU64::new(0),
            lifetime_failures: AtomicU64::new(0),
            last_forgot_at: Mutex::new(None),
            recovery_multiplier: Mutex::new(1.0),
        })
    }

    pub fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    /// SCHEDULED -> RUNNING. Spawns the one worker task this runner will
    /// ever own; `pause`/`resume` park and wake it rather than tearing it
    /// down.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        self.campaign_store
            .transition(&self.campaign_id, &[CampaignStatus::Scheduled], CampaignStatus::Running, None, None)
            .await?;
        *self.status.write() = CampaignStatus::Running;
        info!(campaign_id = %self.campaign_id, "campaign runner starting");

        let me = Arc::clone(self);
        tokio::spawn(async move { me.run_worker().await });
        Ok(())
    }

    pub async fn pause(&self, reason: PauseReason, resume_at: Option<DateTime<Utc>>) -> Result<()> {
        self.campaign_store
            .transition(&self.campaign_id, &[CampaignStatus::Running], CampaignStatus::Paused, Some(&reason), resume_at)
            .await?;
        let from = self.current_status();
        *self.status.write() = CampaignStatus::Paused;
        self.cancel_current_sleep();
        self.emitter
            .emit_status_change(&self.tenant_id, &self.campaign_id, from, CampaignStatus::Paused, Some(format!("{:?}", reason)))
            .await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<()> {
        self.campaign_store
            .transition(&self.campaign_id, &[CampaignStatus::Paused], CampaignStatus::Running, None, None)
            .await?;
        *self.status.write() = CampaignStatus::Running;
        *self.cancellation.lock() = CancellationToken::new();
        self.emitter
            .emit_status_change(&self.tenant_id, &self.campaign_id, CampaignStatus::Paused, CampaignStatus::Running, None)
            .await;
        self.resume_notify.notify_one();
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        let from = self.current_status();
        self.campaign_store
            .transition(
                &self.campaign_id,
                &[CampaignStatus::Scheduled, CampaignStatus::Running, CampaignStatus::Paused],
                CampaignStatus::Stopped,
                None,
                None,
            )
            .await?;
        *self.status.write() = CampaignStatus::Stopped;
        self.cancel_current_sleep();
        self.resume_notify.notify_one();
        self.emitter.emit_status_change(&self.tenant_id, &self.campaign_id, from, CampaignStatus::Stopped, None).await;
        Ok(())
    }

    pub fn current_status(&self) -> CampaignStatus {
        *self.status.read()
    }

    pub fn lifetime_counters(&self) -> (u64, u64) {
        (self.lifetime_attempts.load(Ordering::SeqCst), self.lifetime_failures.load(Ordering::SeqCst))
    }

    fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.lock().clone()
    }

    fn cancel_current_sleep(&self) {
        self.cancellation.lock().cancel();
    }

    async fn run_worker(self: Arc<Self>) {
        loop {
            let status = self.current_status();
            if status.is_terminal() {
                break;
            }
            if status != CampaignStatus::Running {
                self.resume_notify.notified().await;
                continue;
            }

            metrics::counter!("runner.loop.iterations_total").increment(1);
            match self.iterate().await {
                LoopOutcome::Continue => continue,
                LoopOutcome::Exit => {
                    if self.current_status().is_terminal() {
                        break;
                    }
                    // Paused: loop back around and park on resume_notify.
                }
            }
        }
        info!(campaign_id = %self.campaign_id, status = ?self.current_status(), "campaign runner worker exiting");
    }

    /// One pass of the worker loop. Returns `Exit` whenever the campaign
    /// left the RUNNING state during this iteration (business hours,
    /// health, daily cap, or queue exhaustion); the caller re-checks status
    /// to tell a pause from a terminal exit.
    async fn iterate(&self) -> LoopOutcome {
        let now = self.clock.now();
        if let Some(resume_at) = business_hours::resume_at_if_closed(&self.config.business_hours, now) {
            if let Err(e) = self.pause(PauseReason::BusinessHoursClosed, Some(resume_at)).await {
                warn!(error = %e, campaign_id = %self.campaign_id, "failed to pause for business hours");
            }
            return LoopOutcome::Exit;
        }

        let item = match self.queue_store.claim_next(&self.campaign_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                self.complete_campaign().await;
                return LoopOutcome::Exit;
            }
            Err(e) => {
                self.fail_campaign(e.to_string()).await;
                return LoopOutcome::Exit;
            }
        };

        let lookup = self.cache.validate(&item.recipient_address, self.transport.as_ref()).await;
        match lookup {
            bc_common::types::CacheLookup::Hit { exists: false, .. } => {
                self.skip_item(&item, "not-on-platform").await;
                return LoopOutcome::Continue;
            }
            bc_common::types::CacheLookup::Miss => {
                self.fail_item_transient(&item, "recipient validation unavailable").await;
                return LoopOutcome::Continue;
            }
            bc_common::types::CacheLookup::Hit { exists: true, .. } => {}
        }

        let token = self.cancellation_token();

        let pre_send_delay = self.compose_pre_send_delay(&item.rendered_message);
        self.clock.sleep(pre_send_delay, &token).await;
        if token.is_cancelled() {
            self.release_item(&item).await;
            return LoopOutcome::Exit;
        }

        if self.messages_since_rest.fetch_add(1, Ordering::SeqCst) + 1 >= self.rest_threshold {
            self.messages_since_rest.store(0, Ordering::SeqCst);
            let rest = self.draw_rest_duration();
            self.clock.sleep(rest, &token).await;
            if token.is_cancelled() {
                self.release_item(&item).await;
                return LoopOutcome::Exit;
            }
        }

        let chaos = self.draw_chaos_pause();
        if chaos > Duration::ZERO {
            self.clock.sleep(chaos, &token).await;
            if token.is_cancelled() {
                self.release_item(&item).await;
                return LoopOutcome::Exit;
            }
        }

        let headers: Vec<(String, String)> = self.anti_detection.headers_for(&self.campaign_id).into_iter().collect();
        self.lifetime_attempts.fetch_add(1, Ordering::SeqCst);

        let started = Instant::now();
        let send_result = self.transport.send(&self.channel_id, &item.recipient_address, &item.rendered_message, &headers).await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match send_result {
            Ok(_) => self.on_send_success(&item, latency_ms).await,
            Err(err) => self.on_send_failure(&item, err).await,
        }

        if self.sent_today.load(Ordering::SeqCst) + self.failed_today.load(Ordering::SeqCst) >= self.daily_limit {
            let resume_at = next_day_utc(self.clock.now());
            if let Err(e) = self.pause(PauseReason::DailyLimitReached, Some(resume_at)).await {
                warn!(error = %e, campaign_id = %self.campaign_id, "failed to pause for daily limit");
            }
            return LoopOutcome::Exit;
        }

        if self.current_status() != CampaignStatus::Running {
            return LoopOutcome::Exit;
        }

        LoopOutcome::Continue
    }

    fn compose_pre_send_delay(&self, message: &str) -> Duration {
        let base_secs = {
            let mut rng = self.rng.lock();
            rng.gen_range(self.config.contact_delay.min..=self.config.contact_delay.max)
        };
        let adaptive_factor = self.adaptive_delay.factor_with_override(&self.campaign_id, None);
        let recovery_factor = *self.recovery_multiplier.lock();
        let base = Duration::from_secs_f64((base_secs * adaptive_factor * recovery_factor).max(0.0));

        let forgot_allowed = self.forgot_allowed();
        let human = human_simulator::compose_delay(message, forgot_allowed);
        if human.forgot > Duration::ZERO {
            *self.last_forgot_at.lock() = Some(self.clock.now());
        }

        self.anti_detection.jitter(base + human.total(), 0.2)
    }

    fn forgot_allowed(&self) -> bool {
        match *self.last_forgot_at.lock() {
            None => true,
            Some(last) => self.clock.now() - last >= chrono::Duration::hours(1),
        }
    }

    /// SHORT 40% / MEDIUM 40% / LONG 20%, each band an equal third of the
    /// configured `restDelay` minute range.
    fn draw_rest_duration(&self) -> Duration {
        let mut rng = self.rng.lock();
        let roll: f64 = rng.gen_range(0.0..1.0);
        let (lo_frac, hi_frac) = if roll < 0.4 {
            (0.0, 1.0 / 3.0)
        } else if roll < 0.8 {
            (1.0 / 3.0, 2.0 / 3.0)
        } else {
            (2.0 / 3.0, 1.0)
        };

        let span = self.config.rest_delay.max - self.config.rest_delay.min;
        let band_start = self.config.rest_delay.min + lo_frac * span;
        let band_end = self.config.rest_delay.min + hi_frac * span;
        let minutes = rng.gen_range(band_start..=band_end);
        Duration::from_secs_f64(minutes * 60.0)
    }

    /// Chaos pauses independent of `HumanSimulator`'s per-message
    /// components: distraction 5%, app-switching 5%, long-break 10%.
    fn draw_chaos_pause(&self) -> Duration {
        let mut rng = self.rng.lock();
        let mut total = Duration::ZERO;
        if rng.gen_bool(0.05) {
            total += Duration::from_secs_f64(rng.gen_range(10.0..=30.0));
        }
        if rng.gen_bool(0.05) {
            total += Duration::from_secs_f64(rng.gen_range(15.0..=45.0));
        }
        if rng.gen_bool(0.10) {
            total += Duration::from_secs_f64(rng.gen_range(180.0..=600.0));
        }
        total
    }

    async fn apply_recovery_decision(&self, decision: RecoveryDecision) {
        match decision {
            RecoveryDecision::Normal => {
                *self.recovery_multiplier.lock() = 1.0;
            }
            RecoveryDecision::Throttle { delay_factor, .. } => {
                *self.recovery_multiplier.lock() = delay_factor;
            }
            RecoveryDecision::ForcePause { resume_at, repeat_count } => {
                let score = self.health.record(&self.channel_id).score;
                let reason = if score < 30 { PauseReason::AccountHealthCritical { repeat_count } } else { PauseReason::AccountHealthLow };
                if let Err(e) = self.pause(reason, Some(resume_at)).await {
                    warn!(error = %e, campaign_id = %self.campaign_id, "failed to pause for account health");
                }
            }
        }
    }

    async fn on_send_success(&self, item: &QueueItem, latency_ms: u64) {
        if let Err(e) = self.queue_store.complete(&item.item_id, CompletionOutcome::Sent, self.config.retry_config.max_retries).await {
            warn!(error = %e, item_id = %item.item_id, "failed to record sent item");
        }
        let _ = self.campaign_store.increment_counters(&self.campaign_id, 1, 0, 0).await;
        self.sent_today.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("runner.items.sent_total").increment(1);

        self.adaptive_delay.record_outcome(&self.campaign_id, false);
        let decision = self.health.on_send_result(&self.channel_id, true);
        self.apply_recovery_decision(decision).await;
        self.anti_detection.record_timing(&self.campaign_id, TimingOp::Send, latency_ms);

        self.emitter.emit_success(&self.tenant_id, &self.campaign_id, item.ordinal, &item.recipient_address).await;
        self.emit_progress().await;
    }

    async fn on_send_failure(&self, item: &QueueItem, err: TransportError) {
        let kind = classify_kind(&err);
        let retryable = kind.is_retryable_kind();
        let max_retries = self.config.retry_config.max_retries;
        self.lifetime_failures.fetch_add(1, Ordering::SeqCst);

        let outcome = CompletionOutcome::Failed { kind, reason: err.to_string(), retryable };
        let resulting = match self.queue_store.complete(&item.item_id, outcome, max_retries).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, item_id = %item.item_id, "failed to record failed item");
                QueueItemStatus::Failed
            }
        };

        if resulting == QueueItemStatus::Failed {
            let _ = self.campaign_store.increment_counters(&self.campaign_id, 0, 1, 0).await;
            self.failed_today.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("runner.items.failed_total", "kind" => kind_label(kind)).increment(1);
        }

        self.adaptive_delay.record_outcome(&self.campaign_id, true);
        let decision = self.health.on_send_result(&self.channel_id, false);
        self.apply_recovery_decision(decision).await;

        let emitted_retryable = retryable && item.attempt < max_retries;
        self.emitter
            .emit_failure(&self.tenant_id, &self.campaign_id, item.ordinal, &item.recipient_address, kind, emitted_retryable, item.attempt, max_retries)
            .await;
        self.emit_progress().await;
    }

    /// Gives a CLAIMED item back to the queue when a pause or stop cancels
    /// the worker mid-sleep, so it's the next item claimed once the
    /// campaign resumes rather than sitting claimed until the stale
    /// recovery sweep notices it.
    async fn release_item(&self, item: &QueueItem) {
        if let Err(e) = self.queue_store.release(&item.item_id).await {
            warn!(error = %e, item_id = %item.item_id, "failed to release claimed item on cancellation");
        }
    }

    async fn skip_item(&self, item: &QueueItem, reason: &str) {
        if let Err(e) = self
            .queue_store
            .complete(&item.item_id, CompletionOutcome::Skipped { reason: reason.to_string() }, self.config.retry_config.max_retries)
            .await
        {
            warn!(error = %e, item_id = %item.item_id, "failed to record skipped item");
        }
        let _ = self.campaign_store.increment_counters(&self.campaign_id, 0, 0, 1).await;
        self.emit_progress().await;
    }

    /// A transport error while resolving platform existence (not a send
    /// failure) is treated as a retryable transient failure on the item,
    /// since the recipient's actual existence remains unknown.
    async fn fail_item_transient(&self, item: &QueueItem, reason: &str) {
        let max_retries = self.config.retry_config.max_retries;
        let outcome = CompletionOutcome::Failed { kind: TransportErrorKind::TransientNetwork, reason: reason.to_string(), retryable: true };
        let resulting = self.queue_store.complete(&item.item_id, outcome, max_retries).await.unwrap_or(QueueItemStatus::Failed);

        if resulting == QueueItemStatus::Failed {
            let _ = self.campaign_store.increment_counters(&self.campaign_id, 0, 1, 0).await;
            self.failed_today.fetch_add(1, Ordering::SeqCst);
        }

        self.emitter
            .emit_failure(
                &self.tenant_id,
                &self.campaign_id,
                item.ordinal,
                &item.recipient_address,
                TransportErrorKind::TransientNetwork,
                true,
                item.attempt,
                max_retries,
            )
            .await;
        self.emit_progress().await;
    }

    async fn complete_campaign(&self) {
        if let Err(e) = self
            .campaign_store
            .transition(&self.campaign_id, &[CampaignStatus::Running], CampaignStatus::Completed, None, None)
            .await
        {
            warn!(error = %e, campaign_id = %self.campaign_id, "failed to mark campaign completed");
        }
        *self.status.write() = CampaignStatus::Completed;

        let (sent, failed, skipped) = match self.campaign_store.get(&self.campaign_id).await {
            Ok(c) => (c.sent, c.failed, c.skipped),
            Err(_) => (0, 0, 0),
        };
        self.emitter.emit_completed(&self.tenant_id, &self.campaign_id, sent, failed, skipped).await;
        self.emitter
            .emit_status_change(&self.tenant_id, &self.campaign_id, CampaignStatus::Running, CampaignStatus::Completed, None)
            .await;
    }

    async fn fail_campaign(&self, reason: String) {
        let _ = self.campaign_store.set_last_error(&self.campaign_id, &reason).await;
        let from = self.current_status();
        let _ = self
            .campaign_store
            .transition(
                &self.campaign_id,
                &[CampaignStatus::Scheduled, CampaignStatus::Running, CampaignStatus::Paused],
                CampaignStatus::Failed,
                None,
                None,
            )
            .await;
        *self.status.write() = CampaignStatus::Failed;
        self.emitter.toast(&self.tenant_id, bc_events::ToastKind::Error, "Campaign failed", &reason).await;
        self.emitter
            .emit_status_change(&self.tenant_id, &self.campaign_id, from, CampaignStatus::Failed, Some(reason))
            .await;
    }

    async fn emit_progress(&self) {
        if let Ok(c) = self.campaign_store.get(&self.campaign_id).await {
            self.emitter.emit_progress(&self.tenant_id, &self.campaign_id, c.sent, c.failed, c.skipped, c.total, None).await;
        }
    }
}

fn classify_kind(err: &TransportError) -> TransportErrorKind {
    match err {
        TransportError::TransientNetwork(_) => TransportErrorKind::TransientNetwork,
        TransportError::RateLimit(_) => TransportErrorKind::RateLimit,
        TransportError::PermissionRevoked(_) => TransportErrorKind::PermissionRevoked,
        TransportError::RecipientInvalid(_) => TransportErrorKind::RecipientInvalid,
        TransportError::Unknown(_) => TransportErrorKind::Unknown,
    }
}

fn kind_label(kind: TransportErrorKind) -> &'static str {
    match kind {
        TransportErrorKind::TransientNetwork => "transient_network",
        TransportErrorKind::RateLimit => "rate_limit",
        TransportErrorKind::PermissionRevoked => "permission_revoked",
        TransportErrorKind::RecipientInvalid => "recipient_invalid",
        TransportErrorKind::Unknown => "unknown",
    }
}

fn next_day_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    (now + chrono::Duration::days(1))
        .date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|naive| naive.and_local_timezone(Utc).single())
        .unwrap_or(now + chrono::Duration::days(1))
}

#[async_trait]
impl RunnerHandle for CampaignRunner {
    fn campaign_id(&self) -> &str {
        &self.campaign_id
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    async fn status(&self) -> CampaignStatus {
        self.current_status()
    }

    async fn pause(&self, reason: PauseReason, resume_at: Option<DateTime<Utc>>) -> Result<()> {
        CampaignRunner::pause(self, reason, resume_at).await
    }

    async fn resume(&self) -> Result<()> {
        CampaignRunner::resume(self).await
    }

    async fn stop(&self) -> Result<()> {
        CampaignRunner::stop(self).await
    }

    async fn lifetime_attempts_and_failures(&self) -> (u64, u64) {
        self.lifetime_counters()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_cache::PhoneValidationCache;
    use bc_common::capability::{ExistsResult, SendOutcome};
    use bc_common::config::{CampaignConfig, ChannelAge};
    use bc_common::types::{Campaign, QueueItemStatus};
    use bc_events::BroadcastSubscriberSink;
    use sqlx::SqlitePool;
    use std::sync::atomic::AtomicBool;

    struct InstantClock;

    #[async_trait]
    impl Clock for InstantClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }

        async fn sleep(&self, _duration: Duration, _cancellation: &CancellationToken) {}
    }

    struct FakeTransport {
        send_succeeds: AtomicBool,
    }

    #[async_trait]
    impl ChatTransport for FakeTransport {
        async fn exists_on_platform(&self, _address: &str) -> std::result::Result<ExistsResult, TransportError> {
            Ok(ExistsResult { exists: true, handle: None })
        }

        async fn send(&self, _channel_id: &str, _address: &str, _body: &str, _headers: &[(String, String)]) -> std::result::Result<SendOutcome, TransportError> {
            if self.send_succeeds.load(Ordering::SeqCst) {
                Ok(SendOutcome { provider_message_id: "m1".to_string() })
            } else {
                Err(TransportError::TransientNetwork("boom".to_string()))
            }
        }
    }

    async fn fresh_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        bc_queue::create_schema(&pool).await.unwrap();
        pool
    }

    async fn make_runner(pool: SqlitePool, config: CampaignConfig, send_succeeds: bool, seed: u64) -> (Arc<CampaignRunner>, Arc<CampaignStore>, Arc<MessageQueueStore>) {
        let campaign_store = Arc::new(CampaignStore::new(pool.clone()));
        let queue_store = Arc::new(MessageQueueStore::new(pool.clone()));
        let cache = Arc::new(PhoneValidationCache::new(pool.clone()));
        cache.create_schema().await.unwrap();

        let campaign = Campaign {
            campaign_id: "c1".to_string(),
            tenant_id: "t1".to_string(),
            channel_id: "ch1".to_string(),
            name: "test".to_string(),
            status: CampaignStatus::Scheduled,
            total: 1,
            sent: 0,
            failed: 0,
            skipped: 0,
            current_index: 0,
            config: config.clone(),
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            resume_at: None,
            pause_reason: None,
            completed_at: None,
            last_error: None,
        };
        campaign_store.insert(&campaign).await.unwrap();

        let item = QueueItem {
            item_id: "item1".to_string(),
            campaign_id: "c1".to_string(),
            ordinal: 0,
            recipient_address: "+15550001".to_string(),
            recipient_label: None,
            rendered_message: "hi".to_string(),
            status: QueueItemStatus::Pending,
            attempt: 0,
            last_error: None,
            sent_at: None,
        };
        queue_store.append("c1", &[item]).await.unwrap();

        let deps = RunnerDeps {
            campaign_store: Arc::clone(&campaign_store),
            queue_store: Arc::clone(&queue_store),
            cache,
            health: Arc::new(AccountHealthMonitor::new()),
            adaptive_delay: Arc::new(AdaptiveDelayController::new()),
            anti_detection: Arc::new(AntiDetectionEngine::new()),
            emitter: Arc::new(RealTimeEmitter::new(Arc::new(BroadcastSubscriberSink::default()))),
            transport: Arc::new(FakeTransport { send_succeeds: AtomicBool::new(send_succeeds) }),
            clock: Arc::new(InstantClock),
        };

        let runner = CampaignRunner::new("c1".to_string(), "t1".to_string(), "ch1".to_string(), config, seed, deps);
        (runner, campaign_store, queue_store)
    }

    #[tokio::test]
    async fn successful_send_then_exhausted_queue_completes_campaign() {
        let pool = fresh_pool().await;
        let config = CampaignConfig::for_age(ChannelAge::Established);
        let (runner, campaign_store, queue_store) = make_runner(pool, config, true, 1).await;

        *runner.status.write() = CampaignStatus::Running;
        assert!(matches!(runner.iterate().await, LoopOutcome::Continue));

        let stats = queue_store.stats("c1").await.unwrap();
        assert_eq!(stats.sent, 1);

        assert!(matches!(runner.iterate().await, LoopOutcome::Exit));
        let campaign = campaign_store.get("c1").await.unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.sent, 1);
    }

    #[tokio::test]
    async fn failed_send_records_failure_and_respects_retry() {
        let pool = fresh_pool().await;
        let mut config = CampaignConfig::for_age(ChannelAge::Established);
        config.retry_config.max_retries = 0;
        let (runner, campaign_store, _queue_store) = make_runner(pool, config, false, 2).await;

        *runner.status.write() = CampaignStatus::Running;
        runner.iterate().await;

        let campaign = campaign_store.get("c1").await.unwrap();
        assert_eq!(campaign.failed, 1);
    }

    #[tokio::test]
    async fn pause_then_resume_roundtrips_status() {
        let pool = fresh_pool().await;
        let config = CampaignConfig::for_age(ChannelAge::Established);
        let (runner, campaign_store, _queue_store) = make_runner(pool, config, true, 3).await;

        campaign_store.transition("c1", &[CampaignStatus::Scheduled], CampaignStatus::Running, None, None).await.unwrap();
        *runner.status.write() = CampaignStatus::Running;

        runner.pause(PauseReason::Manual { note: Some("ops".to_string()) }, None).await.unwrap();
        assert_eq!(runner.current_status(), CampaignStatus::Paused);

        runner.resume().await.unwrap();
        assert_eq!(runner.current_status(), CampaignStatus::Running);
    }

    #[tokio::test]
    async fn rest_duration_always_within_configured_range() {
        let pool = fresh_pool().await;
        let config = CampaignConfig::for_age(ChannelAge::Established);
        let (runner, _campaign_store, _queue_store) = make_runner(pool, config.clone(), true, 42).await;

        for _ in 0..50 {
            let rest = runner.draw_rest_duration();
            assert!(rest.as_secs_f64() >= config.rest_delay.min * 60.0 - 0.01);
            assert!(rest.as_secs_f64() <= config.rest_delay.max * 60.0 + 0.01);
        }
    }

    #[tokio::test]
    async fn chaos_pause_is_zero_or_within_bounds() {
        let pool = fresh_pool().await;
        let config = CampaignConfig::for_age(ChannelAge::Established);
        let (runner, _campaign_store, _queue_store) = make_runner(pool, config, true, 7).await;

        for _ in 0..50 {
            let chaos = runner.draw_chaos_pause();
            assert!(chaos.as_secs_f64() <= 600.0);
        }
    }
}
