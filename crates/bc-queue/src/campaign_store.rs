//! Durable `campaigns` table access: creation, status/counter updates, and
//! lookups needed by the control plane and the runner.

use bc_common::config::CampaignConfig;
use bc_common::error::{CoreError, Result};
use bc_common::types::{Campaign, CampaignStatus, PauseReason};
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct CampaignStore {
    pool: SqlitePool,
}

impl CampaignStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, campaign: &Campaign) -> Result<()> {
        let config_json = serde_json::to_string(&campaign.config)?;
        let pause_reason_json = campaign.pause_reason.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                campaign_id, tenant_id, channel_id, name, status, total, sent, failed, skipped,
                current_index, config, created_at, started_at, paused_at, resume_at, pause_reason,
                completed_at, last_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&campaign.campaign_id)
        .bind(&campaign.tenant_id)
        .bind(&campaign.channel_id)
        .bind(&campaign.name)
        .bind(status_str(campaign.status))
        .bind(campaign.total)
        .bind(campaign.sent)
        .bind(campaign.failed)
        .bind(campaign.skipped)
        .bind(campaign.current_index)
        .bind(config_json)
        .bind(campaign.created_at.to_rfc3339())
        .bind(campaign.started_at.map(|t| t.to_rfc3339()))
        .bind(campaign.paused_at.map(|t| t.to_rfc3339()))
        .bind(campaign.resume_at.map(|t| t.to_rfc3339()))
        .bind(pause_reason_json)
        .bind(campaign.completed_at.map(|t| t.to_rfc3339()))
        .bind(&campaign.last_error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, campaign_id: &str) -> Result<Campaign> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE campaign_id = ?")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("campaign {} not found", campaign_id)))?;

        row_to_campaign(&row)
    }

    /// Transitions status and, for a subset of transitions, their
    /// associated timestamps/fields in one statement. Returns
    /// `ILLEGAL_TRANSITION` if the campaign is not currently in `from`.
    pub async fn transition(
        &self,
        campaign_id: &str,
        from: &[CampaignStatus],
        to: CampaignStatus,
        pause_reason: Option<&PauseReason>,
        resume_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let from_strs: Vec<&str> = from.iter().map(|s| status_str(*s)).collect();
        let placeholders = from_strs.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!(
            r#"
            UPDATE campaigns SET
                status = ?,
                started_at = CASE WHEN ? = 'RUNNING' AND started_at IS NULL THEN ? ELSE started_at END,
                paused_at = CASE WHEN ? = 'PAUSED' THEN ? ELSE paused_at END,
                resume_at = ?,
                pause_reason = ?,
                completed_at = CASE WHEN ? = 'COMPLETED' THEN ? ELSE completed_at END
            WHERE campaign_id = ? AND status IN ({placeholders})
            "#
        );

        let now = Utc::now().to_rfc3339();
        let pause_reason_json = pause_reason.map(serde_json::to_string).transpose()?;
        let to_str = status_str(to);

        let mut query = sqlx::query(&sql)
            .bind(to_str)
            .bind(to_str)
            .bind(&now)
            .bind(to_str)
            .bind(&now)
            .bind(resume_at.map(|t| t.to_rfc3339()))
            .bind(pause_reason_json)
            .bind(to_str)
            .bind(&now)
            .bind(campaign_id);

        for f in &from_strs {
            query = query.bind(*f);
        }

        let result = query.execute(&self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::IllegalTransition(format!(
                "campaign {} is not in one of {:?}",
                campaign_id, from
            )));
        }

        Ok(())
    }

    /// Atomically increments the authoritative counters; never cached on
    /// the caller side so `progressPct` stays correct under concurrency.
    pub async fn increment_counters(&self, campaign_id: &str, sent: i64, failed: i64, skipped: i64) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET sent = sent + ?, failed = failed + ?, skipped = skipped + ? WHERE campaign_id = ?",
        )
        .bind(sent)
        .bind(failed)
        .bind(skipped)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// No-ops against a campaign already in a terminal state, so a worker
    /// losing a race against a concurrent `stop()`/`transition()` can't
    /// clobber the terminal status that already landed.
    pub async fn set_last_error(&self, campaign_id: &str, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE campaigns SET status = 'FAILED', last_error = ? \
             WHERE campaign_id = ? AND status NOT IN ('COMPLETED', 'STOPPED', 'FAILED')",
        )
        .bind(error)
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn status_str(status: CampaignStatus) -> &'static str {
    match status {
        CampaignStatus::Scheduled => "SCHEDULED",
        CampaignStatus::Running => "RUNNING",
        CampaignStatus::Paused => "PAUSED",
        CampaignStatus::Stopped => "STOPPED",
        CampaignStatus::Completed => "COMPLETED",
        CampaignStatus::Failed => "FAILED",
    }
}

fn parse_status(s: &str) -> Result<CampaignStatus> {
    Ok(match s {
        "SCHEDULED" => CampaignStatus::Scheduled,
        "RUNNING" => CampaignStatus::Running,
        "PAUSED" => CampaignStatus::Paused,
        "STOPPED" => CampaignStatus::Stopped,
        "COMPLETED" => CampaignStatus::Completed,
        "FAILED" => CampaignStatus::Failed,
        other => return Err(CoreError::Internal(format!("unknown campaign status {}", other))),
    })
}

fn parse_ts(value: Option<String>) -> Option<DateTime<Utc>> {
    value.and_then(|v| DateTime::parse_from_rfc3339(&v).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_campaign(row: &sqlx::sqlite::SqliteRow) -> Result<Campaign> {
    let config_json: String = row.get("config");
    let config: CampaignConfig = serde_json::from_str(&config_json)?;

    let pause_reason_json: Option<String> = row.get("pause_reason");
    let pause_reason = pause_reason_json.map(|s| serde_json::from_str(&s)).transpose()?;

    Ok(Campaign {
        campaign_id: row.get("campaign_id"),
        tenant_id: row.get("tenant_id"),
        channel_id: row.get("channel_id"),
        name: row.get("name"),
        status: parse_status(row.get::<String, _>("status").as_str())?,
        total: row.get("total"),
        sent: row.get("sent"),
        failed: row.get("failed"),
        skipped: row.get("skipped"),
        current_index: row.get("current_index"),
        config,
        created_at: DateTime::parse_from_rfc3339(row.get::<String, _>("created_at").as_str())
            .map_err(|e| CoreError::Internal(e.to_string()))?
            .with_timezone(&Utc),
        started_at: parse_ts(row.get("started_at")),
        paused_at: parse_ts(row.get("paused_at")),
        resume_at: parse_ts(row.get("resume_at")),
        pause_reason,
        completed_at: parse_ts(row.get("completed_at")),
        last_error: row.get("last_error"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bc_common::types::ChannelAge;

    async fn fresh_store() -> CampaignStore {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        crate::schema::create_schema(&pool).await.unwrap();
        CampaignStore::new(pool)
    }

    fn sample(campaign_id: &str) -> Campaign {
        Campaign {
            campaign_id: campaign_id.to_string(),
            tenant_id: "t1".into(),
            channel_id: "ch1".into(),
            name: "test".into(),
            status: CampaignStatus::Scheduled,
            total: 5,
            sent: 0,
            failed: 0,
            skipped: 0,
            current_index: 0,
            config: CampaignConfig::for_age(ChannelAge::New),
            created_at: Utc::now(),
            started_at: None,
            paused_at: None,
            resume_at: None,
            pause_reason: None,
            completed_at: None,
            last_error: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let store = fresh_store().await;
        store.insert(&sample("c1")).await.unwrap();
        let fetched = store.get("c1").await.unwrap();
        assert_eq!(fetched.status, CampaignStatus::Scheduled);
        assert_eq!(fetched.total, 5);
    }

    #[tokio::test]
    async fn transition_rejects_wrong_from_state() {
        let store = fresh_store().await;
        store.insert(&sample("c1")).await.unwrap();
        let err = store.transition("c1", &[CampaignStatus::Running], CampaignStatus::Paused, None, None).await;
        assert!(matches!(err, Err(CoreError::IllegalTransition(_))));
    }

    #[tokio::test]
    async fn transition_succeeds_from_correct_state() {
        let store = fresh_store().await;
        store.insert(&sample("c1")).await.unwrap();
        store.transition("c1", &[CampaignStatus::Scheduled], CampaignStatus::Running, None, None).await.unwrap();
        let fetched = store.get("c1").await.unwrap();
        assert_eq!(fetched.status, CampaignStatus::Running);
        assert!(fetched.started_at.is_some());
    }

    #[tokio::test]
    async fn increment_counters_is_additive() {
        let store = fresh_store().await;
        store.insert(&sample("c1")).await.unwrap();
        store.increment_counters("c1", 2, 1, 0).await.unwrap();
        store.increment_counters("c1", 1, 0, 1).await.unwrap();
        let fetched = store.get("c1").await.unwrap();
        assert_eq!(fetched.sent, 3);
        assert_eq!(fetched.failed, 1);
        assert_eq!(fetched.skipped, 1);
    }

    #[tokio::test]
    async fn set_last_error_does_not_overwrite_a_terminal_status() {
        let store = fresh_store().await;
        store.insert(&sample("c1")).await.unwrap();
        store.transition("c1", &[CampaignStatus::Scheduled], CampaignStatus::Running, None, None).await.unwrap();
        store.transition("c1", &[CampaignStatus::Running], CampaignStatus::Stopped, None, None).await.unwrap();

        store.set_last_error("c1", "send failed after stop").await.unwrap();

        let fetched = store.get("c1").await.unwrap();
        assert_eq!(fetched.status, CampaignStatus::Stopped);
        assert!(fetched.last_error.is_none());
    }

    #[tokio::test]
    async fn set_last_error_marks_a_non_terminal_campaign_failed() {
        let store = fresh_store().await;
        store.insert(&sample("c1")).await.unwrap();
        store.transition("c1", &[CampaignStatus::Scheduled], CampaignStatus::Running, None, None).await.unwrap();

        store.set_last_error("c1", "transport unreachable").await.unwrap();

        let fetched = store.get("c1").await.unwrap();
        assert_eq!(fetched.status, CampaignStatus::Failed);
        assert_eq!(fetched.last_error.as_deref(), Some("transport unreachable"));
    }
}
