//! `queue_items` access: append, atomic claim, complete, stats, and
//! stale-claim recovery.

use bc_common::error::{CoreError, Result};
use bc_common::types::{CompletionOutcome, QueueItem, QueueItemStatus};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

pub struct MessageQueueStore {
    pool: SqlitePool,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStats {
    pub pending: i64,
    pub claimed: i64,
    pub sent: i64,
    pub failed: i64,
    pub skipped: i64,
}

impl MessageQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bulk-inserts items for a campaign, pre-start only. `ordinal` is
    /// whatever order the caller (the runner, post partial-shuffle) hands
    /// in.
    pub async fn append(&self, campaign_id: &str, items: &[QueueItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO queue_items (
                    item_id, campaign_id, ordinal, recipient_address, recipient_label,
                    rendered_message, status, attempt, last_error, sent_at
                ) VALUES (?, ?, ?, ?, ?, ?, 'PENDING', 0, NULL, NULL)
                "#,
            )
            .bind(&item.item_id)
            .bind(campaign_id)
            .bind(item.ordinal)
            .bind(&item.recipient_address)
            .bind(&item.recipient_label)
            .bind(&item.rendered_message)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Atomically transitions one PENDING item with the lowest ordinal to
    /// CLAIMED and returns it. `None` if the campaign's queue is empty.
    /// Safe against concurrent workers on the same campaign: the claiming
    /// `UPDATE` is conditioned on the row still being PENDING and checked
    /// via `rows_affected`.
    pub async fn claim_next(&self, campaign_id: &str) -> Result<Option<QueueItem>> {
        loop {
            let row = sqlx::query(
                r#"
                WITH eligible AS (
                    SELECT item_id, ROW_NUMBER() OVER (PARTITION BY campaign_id ORDER BY ordinal) AS rn
                    FROM queue_items
                    WHERE campaign_id = ? AND status = 'PENDING'
                )
                SELECT item_id FROM eligible WHERE rn = 1 LIMIT 1
                "#,
            )
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { return Ok(None) };
            let item_id: String = row.get("item_id");

            let claimed_at = Utc::now().to_rfc3339();
            let updated = sqlx::query("UPDATE queue_items SET status = 'CLAIMED', claimed_at = ? WHERE item_id = ? AND status = 'PENDING'")
                .bind(&claimed_at)
                .bind(&item_id)
                .execute(&self.pool)
                .await?;

            if updated.rows_affected() == 0 {
                // Another worker claimed it first; retry against the next
                // lowest-ordinal PENDING row.
                continue;
            }

            let fetched = sqlx::query("SELECT * FROM queue_items WHERE item_id = ?")
                .bind(&item_id)
                .fetch_one(&self.pool)
                .await?;

            return Ok(Some(row_to_item(&fetched)?));
        }
    }

    /// Applies a completion outcome. A retryable failure under
    /// `max_retries` returns the item to PENDING with an incremented
    /// attempt count; everything else is terminal.
    pub async fn complete(&self, item_id: &str, outcome: CompletionOutcome, max_retries: u32) -> Result<QueueItemStatus> {
        match outcome {
            CompletionOutcome::Sent => {
                let sent_at = Utc::now().to_rfc3339();
                sqlx::query("UPDATE queue_items SET status = 'SENT', sent_at = ? WHERE item_id = ?")
                    .bind(sent_at)
                    .bind(item_id)
                    .execute(&self.pool)
                    .await?;
                Ok(QueueItemStatus::Sent)
            }
            CompletionOutcome::Skipped { reason } => {
                sqlx::query("UPDATE queue_items SET status = 'SKIPPED', last_error = ? WHERE item_id = ?")
                    .bind(reason)
                    .bind(item_id)
                    .execute(&self.pool)
                    .await?;
                Ok(QueueItemStatus::Skipped)
            }
            CompletionOutcome::Failed { reason, retryable, .. } => {
                let row = sqlx::query("SELECT attempt FROM queue_items WHERE item_id = ?")
                    .bind(item_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .ok_or_else(|| CoreError::NotFound(format!("queue item {} not found", item_id)))?;
                let attempt: i64 = row.get("attempt");

                if retryable && (attempt as u32) < max_retries {
                    sqlx::query("UPDATE queue_items SET status = 'PENDING', attempt = attempt + 1, last_error = ? WHERE item_id = ?")
                        .bind(reason)
                        .bind(item_id)
                        .execute(&self.pool)
                        .await?;
                    Ok(QueueItemStatus::Pending)
                } else {
                    sqlx::query("UPDATE queue_items SET status = 'FAILED', last_error = ? WHERE item_id = ?")
                        .bind(reason)
                        .bind(item_id)
                        .execute(&self.pool)
                        .await?;
                    Ok(QueueItemStatus::Failed)
                }
            }
        }
    }

    /// Reverts a CLAIMED item back to PENDING without touching `attempt`.
    /// Used when a runner is paused or stopped mid-sleep, so the same item
    /// is the next one claimed on resume instead of waiting out the stale
    /// recovery sweep.
    pub async fn release(&self, item_id: &str) -> Result<()> {
        sqlx::query("UPDATE queue_items SET status = 'PENDING', claimed_at = NULL WHERE item_id = ? AND status = 'CLAIMED'")
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn stats(&self, campaign_id: &str) -> Result<QueueStats> {
        let rows = sqlx::query("SELECT status, COUNT(*) as n FROM queue_items WHERE campaign_id = ? GROUP BY status")
            .bind(campaign_id)
            .fetch_all(&self.pool)
            .await?;

        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in rows {
            let status: String = row.get("status");
            let n: i64 = row.get("n");
            counts.insert(status, n);
        }

        Ok(QueueStats {
            pending: counts.get("PENDING").copied().unwrap_or(0),
            claimed: counts.get("CLAIMED").copied().unwrap_or(0),
            sent: counts.get("SENT").copied().unwrap_or(0),
            failed: counts.get("FAILED").copied().unwrap_or(0),
            skipped: counts.get("SKIPPED").copied().unwrap_or(0),
        })
    }

    /// Resets any CLAIMED item whose `claimed_at` is older than
    /// `stale_threshold` back to PENDING. Call on startup and on a
    /// recurring interval to recover from a worker that died mid-send.
    pub async fn recover(&self, stale_threshold: chrono::Duration) -> Result<u64> {
        let cutoff = (Utc::now() - stale_threshold).to_rfc3339();
        let result = sqlx::query("UPDATE queue_items SET status = 'PENDING', claimed_at = NULL WHERE status = 'CLAIMED' AND claimed_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn row_to_item(row: &sqlx::sqlite::SqliteRow) -> Result<QueueItem> {
    let status: String = row.get("status");
    let status = match status.as_str() {
        "PENDING" => QueueItemStatus::Pending,
        "CLAIMED" => QueueItemStatus::Claimed,
        "SENT" => QueueItemStatus::Sent,
        "FAILED" => QueueItemStatus::Failed,
        "SKIPPED" => QueueItemStatus::Skipped,
        other => return Err(CoreError::Internal(format!("unknown queue item status {}", other))),
    };

    let sent_at: Option<String> = row.get("sent_at");
    let sent_at = sent_at.and_then(|v| DateTime::parse_from_rfc3339(&v).ok()).map(|dt| dt.with_timezone(&Utc));

    Ok(QueueItem {
        item_id: row.get("item_id"),
        campaign_id: row.get("campaign_id"),
        ordinal: row.get("ordinal"),
        recipient_address: row.get("recipient_address"),
        recipient_label: row.get("recipient_label"),
        rendered_message: row.get("rendered_message"),
        status,
        attempt: row.get("attempt"),
        last_error: row.get("last_error"),
        sent_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_common::types::TransportErrorKind;
    use uuid::Uuid;

    async fn fresh_store() -> (SqlitePool, MessageQueueStore) {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::schema::create_schema(&pool).await.unwrap();
        (pool.clone(), MessageQueueStore::new(pool))
    }

    async fn seed_campaign(pool: &SqlitePool, campaign_id: &str) {
        sqlx::query(
            "INSERT INTO campaigns (campaign_id, tenant_id, channel_id, name, status, config, created_at) VALUES (?, 't1', 'ch1', 'n', 'RUNNING', '{}', ?)",
        )
        .bind(campaign_id)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await
        .unwrap();
    }

    fn item(ordinal: u32, campaign_id: &str) -> QueueItem {
        QueueItem {
            item_id: Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            ordinal,
            recipient_address: format!("+1555000{:04}", ordinal),
            recipient_label: None,
            rendered_message: "hi".to_string(),
            status: QueueItemStatus::Pending,
            attempt: 0,
            last_error: None,
            sent_at: None,
        }
    }

    #[tokio::test]
    async fn claim_next_returns_lowest_ordinal_first() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        store.append("c1", &[item(2, "c1"), item(0, "c1"), item(1, "c1")]).await.unwrap();

        let first = store.claim_next("c1").await.unwrap().unwrap();
        assert_eq!(first.ordinal, 0);
        let second = store.claim_next("c1").await.unwrap().unwrap();
        assert_eq!(second.ordinal, 1);
    }

    #[tokio::test]
    async fn claim_next_empty_queue_returns_none() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        assert!(store.claim_next("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retryable_failure_under_max_retries_returns_to_pending() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        store.append("c1", &[item(0, "c1")]).await.unwrap();
        let claimed = store.claim_next("c1").await.unwrap().unwrap();

        let status = store
            .complete(
                &claimed.item_id,
                CompletionOutcome::Failed { kind: TransportErrorKind::TransientNetwork, reason: "timeout".into(), retryable: true },
                3,
            )
            .await
            .unwrap();
        assert_eq!(status, QueueItemStatus::Pending);

        let reclaimed = store.claim_next("c1").await.unwrap().unwrap();
        assert_eq!(reclaimed.attempt, 1);
    }

    #[tokio::test]
    async fn failure_exhausting_retries_is_terminal() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        store.append("c1", &[item(0, "c1")]).await.unwrap();
        let claimed = store.claim_next("c1").await.unwrap().unwrap();

        sqlx::query("UPDATE queue_items SET attempt = 3 WHERE item_id = ?").bind(&claimed.item_id).execute(&pool).await.unwrap();

        let status = store
            .complete(
                &claimed.item_id,
                CompletionOutcome::Failed { kind: TransportErrorKind::TransientNetwork, reason: "timeout".into(), retryable: true },
                3,
            )
            .await
            .unwrap();
        assert_eq!(status, QueueItemStatus::Failed);
    }

    #[tokio::test]
    async fn recover_resets_stale_claims() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        store.append("c1", &[item(0, "c1")]).await.unwrap();
        let claimed = store.claim_next("c1").await.unwrap().unwrap();

        let stale_ts = (Utc::now() - chrono::Duration::minutes(10)).to_rfc3339();
        sqlx::query("UPDATE queue_items SET claimed_at = ? WHERE item_id = ?").bind(stale_ts).bind(&claimed.item_id).execute(&pool).await.unwrap();

        let recovered = store.recover(chrono::Duration::minutes(2)).await.unwrap();
        assert_eq!(recovered, 1);

        let row = sqlx::query("SELECT status FROM queue_items WHERE item_id = ?").bind(&claimed.item_id).fetch_one(&pool).await.unwrap();
        let status: String = row.get("status");
        assert_eq!(status, "PENDING");
    }

    #[tokio::test]
    async fn release_reverts_claimed_item_immediately_without_staleness() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        store.append("c1", &[item(0, "c1")]).await.unwrap();
        let claimed = store.claim_next("c1").await.unwrap().unwrap();

        store.release(&claimed.item_id).await.unwrap();

        let reclaimed = store.claim_next("c1").await.unwrap().unwrap();
        assert_eq!(reclaimed.item_id, claimed.item_id);
        assert_eq!(reclaimed.attempt, 0);
    }

    #[tokio::test]
    async fn stats_counts_by_status() {
        let (pool, store) = fresh_store().await;
        seed_campaign(&pool, "c1").await;
        store.append("c1", &[item(0, "c1"), item(1, "c1")]).await.unwrap();
        store.claim_next("c1").await.unwrap();

        let stats = store.stats("c1").await.unwrap();
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.pending, 1);
    }
}
