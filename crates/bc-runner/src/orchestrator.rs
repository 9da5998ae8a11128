//! Composition root: wires the queue, cache, pacing, health, and events
//! crates into `CampaignRunner`s, keeps the `RunnerRegistry` up to date,
//! and is the one thing the control-plane API depends on. Grounded on
//! `fc-router::manager::QueueManager`, which plays the analogous role for
//! pool workers.

use std::sync::Arc;
use std::time::Duration;

use bc_cache::PhoneValidationCache;
use bc_common::capability::{ChatTransport, Clock};
use bc_common::config::CampaignConfig;
use bc_common::error::{CoreError, Result};
use bc_common::types::{Campaign, CampaignStatus, PauseReason, QueueItem, QueueItemStatus};
use bc_events::RealTimeEmitter;
use bc_health::AccountHealthMonitor;
use bc_pacing::{AdaptiveDelayController, AntiDetectionEngine};
use bc_queue::{CampaignStore, MessageQueueStore};
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::emergency_monitor::{EmergencyMonitor, EmergencyMonitorSettings};
use crate::handle::RunnerRegistry;
use crate::runner::{CampaignRunner, RunnerDeps};
use crate::shuffle;

/// One recipient to enqueue; the caller has already rendered the message
/// template per-recipient.
pub struct NewRecipient {
    pub address: String,
    pub label: Option<String>,
    pub rendered_message: String,
}

pub struct CreateCampaignRequest {
    pub tenant_id: String,
    pub channel_id: String,
    pub name: String,
    pub config: CampaignConfig,
    pub recipients: Vec<NewRecipient>,
}

pub struct Orchestrator {
    campaign_store: Arc<CampaignStore>,
    queue_store: Arc<MessageQueueStore>,
    cache: Arc<PhoneValidationCache>,
    health: Arc<AccountHealthMonitor>,
    adaptive_delay: Arc<AdaptiveDelayController>,
    anti_detection: Arc<AntiDetectionEngine>,
    emitter: Arc<RealTimeEmitter>,
    transport: Arc<dyn ChatTransport>,
    clock: Arc<dyn Clock>,
    registry: Arc<RunnerRegistry>,
    emergency_monitor: EmergencyMonitor,
}

impl Orchestrator {
    pub fn new(
        campaign_store: Arc<CampaignStore>,
        queue_store: Arc<MessageQueueStore>,
        cache: Arc<PhoneValidationCache>,
        emitter: Arc<RealTimeEmitter>,
        transport: Arc<dyn ChatTransport>,
        clock: Arc<dyn Clock>,
        emergency_monitor_settings: EmergencyMonitorSettings,
    ) -> Self {
        let registry = Arc::new(RunnerRegistry::new());
        let emergency_monitor = EmergencyMonitor::new(Arc::clone(&registry), Arc::clone(&emitter), emergency_monitor_settings);
        Self {
            campaign_store,
            queue_store,
            cache,
            health: Arc::new(AccountHealthMonitor::new()),
            adaptive_delay: Arc::new(AdaptiveDelayController::new()),
            anti_detection: Arc::new(AntiDetectionEngine::new()),
            emitter,
            transport,
            clock,
            registry,
            emergency_monitor,
        }
    }

    /// Starts the background emergency-monitor sweep. Call once at process
    /// startup.
    pub fn start_emergency_monitor(&self) {
        self.emergency_monitor.start();
    }

    /// Runs one emergency-monitor sweep immediately. Exposed for
    /// integration tests that need to exercise the auto-pause path without
    /// waiting out the real sweep interval; production code relies on
    /// `start_emergency_monitor`'s periodic loop instead.
    pub async fn trigger_emergency_sweep(&self) {
        self.emergency_monitor.sweep_once().await;
    }

    pub async fn create_campaign(&self, req: CreateCampaignRequest) -> Result<String> {
        let campaign_id = Uuid::new_v4().to_string();
        let total = req.recipients.len() as u32;

        let campaign = Campaign {
            campaign_id: campaign_id.clone(),
            tenant_id: req.tenant_id,
            channel_id: req.channel_id,
            name: req.name,
            status: CampaignStatus::Scheduled,
            total,
            sent: 0,
            failed: 0,
            skipped: 0,
            current_index: 0,
            config: req.config,
            created_at: self.clock.now(),
            started_at: None,
            paused_at: None,
            resume_at: None,
            pause_reason: None,
            completed_at: None,
            last_error: None,
        };
        self.campaign_store.insert(&campaign).await?;

        let mut ordinals: Vec<u32> = (0..total).collect();
        let shuffle_seed: u64 = rand::thread_rng().gen();
        let mut shuffle_rng = rand::rngs::StdRng::seed_from_u64(shuffle_seed);
        shuffle::partial_shuffle(&mut ordinals, &mut shuffle_rng);

        let items: Vec<QueueItem> = req
            .recipients
            .into_iter()
            .zip(ordinals)
            .map(|(recipient, ordinal)| QueueItem {
                item_id: Uuid::new_v4().to_string(),
                campaign_id: campaign_id.clone(),
                ordinal,
                recipient_address: recipient.address,
                recipient_label: recipient.label,
                rendered_message: recipient.rendered_message,
                status: QueueItemStatus::Pending,
                attempt: 0,
                last_error: None,
                sent_at: None,
            })
            .collect();
        self.queue_store.append(&campaign_id, &items).await?;

        Ok(campaign_id)
    }

    pub async fn start(&self, campaign_id: &str) -> Result<()> {
        let campaign = self.campaign_store.get(campaign_id).await?;
        let seed = rand::thread_rng().gen();

        let runner = CampaignRunner::new(
            campaign_id.to_string(),
            campaign.tenant_id,
            campaign.channel_id,
            campaign.config,
            seed,
            RunnerDeps {
                campaign_store: Arc::clone(&self.campaign_store),
                queue_store: Arc::clone(&self.queue_store),
                cache: Arc::clone(&self.cache),
                health: Arc::clone(&self.health),
                adaptive_delay: Arc::clone(&self.adaptive_delay),
                anti_detection: Arc::clone(&self.anti_detection),
                emitter: Arc::clone(&self.emitter),
                transport: Arc::clone(&self.transport),
                clock: Arc::clone(&self.clock),
            },
        );

        self.registry.register(runner.clone());
        runner.start().await
    }

    pub async fn pause(&self, campaign_id: &str, note: Option<String>) -> Result<()> {
        let handle = self.handle(campaign_id)?;
        handle.pause(PauseReason::Manual { note }, None).await
    }

    pub async fn resume(&self, campaign_id: &str) -> Result<()> {
        let handle = self.handle(campaign_id)?;
        handle.resume().await
    }

    pub async fn stop(&self, campaign_id: &str) -> Result<()> {
        let handle = self.handle(campaign_id)?;
        let result = handle.stop().await;
        self.registry.unregister(campaign_id);
        result
    }

    pub async fn get(&self, campaign_id: &str) -> Result<Campaign> {
        self.campaign_store.get(campaign_id).await
    }

    /// Rough ETA for the next send: current adaptive-delay/contact-delay
    /// midpoint, not an exact prediction (the real delay also depends on
    /// jitter and chaos pauses drawn at send time).
    pub async fn next_send_estimate(&self, campaign_id: &str) -> Result<Duration> {
        let campaign = self.campaign_store.get(campaign_id).await?;
        let midpoint = (campaign.config.contact_delay.min + campaign.config.contact_delay.max) / 2.0;
        let factor = self.adaptive_delay.factor_with_override(campaign_id, None);
        Ok(Duration::from_secs_f64((midpoint * factor).max(0.0)))
    }

    fn handle(&self, campaign_id: &str) -> Result<Arc<dyn crate::handle::RunnerHandle>> {
        self.registry.get(campaign_id).ok_or_else(|| CoreError::NotFound(format!("no live runner for campaign {campaign_id}")))
    }
}
