//! Table definitions for the durable store. Mirrors the two tables named
//! in the persisted state layout: `campaigns` and `queue_items`.

use sqlx::SqlitePool;

pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS campaigns (
            campaign_id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            channel_id TEXT NOT NULL,
            name TEXT NOT NULL,
            status TEXT NOT NULL,
            total INTEGER NOT NULL DEFAULT 0,
            sent INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            current_index INTEGER NOT NULL DEFAULT 0,
            config TEXT NOT NULL,
            created_at TEXT NOT NULL,
            started_at TEXT,
            paused_at TEXT,
            resume_at TEXT,
            pause_reason TEXT,
            completed_at TEXT,
            last_error TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS queue_items (
            item_id TEXT PRIMARY KEY,
            campaign_id TEXT NOT NULL REFERENCES campaigns(campaign_id),
            ordinal INTEGER NOT NULL,
            recipient_address TEXT NOT NULL,
            recipient_label TEXT,
            rendered_message TEXT NOT NULL,
            status TEXT NOT NULL,
            attempt INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            sent_at TEXT,
            claimed_at TEXT,
            UNIQUE(campaign_id, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_items_campaign_status ON queue_items (campaign_id, status)")
        .execute(pool)
        .await?;

    Ok(())
}
