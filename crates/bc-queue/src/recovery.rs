//! Periodic sweep resetting stale CLAIMED items back to PENDING, for
//! workers that died mid-send.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::MessageQueueStore;

pub struct RecoveryTask {
    store: Arc<MessageQueueStore>,
    interval: Duration,
    stale_threshold: chrono::Duration,
}

impl RecoveryTask {
    pub fn new(store: Arc<MessageQueueStore>, interval: Duration, stale_threshold: chrono::Duration) -> Self {
        Self { store, interval, stale_threshold }
    }

    /// Runs until the process exits; intended to be spawned once at
    /// startup alongside `MessageQueueStore::recover`'s one-shot initial
    /// pass.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            match self.store.recover(self.stale_threshold).await {
                Ok(0) => {}
                Ok(n) => {
                    info!(count = n, "recovered stale claimed items");
                    metrics::counter!("queue.stale_items.recovered_total").increment(n);
                }
                Err(e) => warn!(error = %e, "stale item recovery sweep failed"),
            }
        }
    }
}
