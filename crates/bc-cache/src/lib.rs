//! Three-tier recipient validation cache.
//!
//! L1 is an in-process `DashMap` (1h TTL), L2 is an optional shared KV
//! tier behind the `SharedCache` trait (24h TTL, no-op by default), L3 is
//! a durable sqlite-backed table (7d TTL) mirroring the durable-queue
//! idiom used elsewhere in this workspace. A lookup checks tiers in
//! order and warms the faster tiers on a hit further down.

pub mod shared;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bc_common::capability::ChatTransport;
use bc_common::types::{CacheLayer, CacheLookup};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::Rng;
use sqlx::{Row, SqlitePool};
use tracing::{debug, warn};

pub use shared::{NoopSharedCache, SharedCache};

const L1_TTL_SECS: i64 = 3_600;
const L2_TTL_SECS: i64 = 86_400;
const L3_TTL_SECS: i64 = 604_800;

/// One validated (or negatively validated) address, shared across all three
/// tiers.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub exists: bool,
    pub handle: Option<String>,
    pub validated_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, ttl_secs: i64, now: DateTime<Utc>) -> bool {
        (now - self.validated_at).num_seconds() >= ttl_secs
    }
}

pub struct PhoneValidationCache {
    l1: DashMap<String, CacheEntry>,
    l2: Arc<dyn SharedCache>,
    pool: SqlitePool,
    progressive_warm_active: AtomicBool,
}

impl PhoneValidationCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            l1: DashMap::new(),
            l2: Arc::new(NoopSharedCache),
            pool,
            progressive_warm_active: AtomicBool::new(false),
        }
    }

    pub fn with_shared_cache(pool: SqlitePool, l2: Arc<dyn SharedCache>) -> Self {
        Self {
            l1: DashMap::new(),
            l2,
            pool,
            progressive_warm_active: AtomicBool::new(false),
        }
    }

    pub async fn create_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS phone_validation_cache (
                address TEXT PRIMARY KEY,
                exists_on_platform INTEGER NOT NULL,
                handle TEXT,
                validated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Checks L1, then L2, then L3, warming faster tiers on a hit below L1.
    /// Lazily deletes expired L3 rows as they're read.
    pub async fn lookup(&self, address: &str) -> CacheLookup {
        let now = Utc::now();

        if let Some(entry) = self.l1.get(address) {
            if !entry.is_expired(L1_TTL_SECS, now) {
                return CacheLookup::Hit { exists: entry.exists, handle: entry.handle.clone(), layer: CacheLayer::L1 };
            }
        }

        if let Some(entry) = self.l2.get(address).await {
            if !entry.is_expired(L2_TTL_SECS, now) {
                self.warm_l1(address, &entry);
                return CacheLookup::Hit { exists: entry.exists, handle: entry.handle.clone(), layer: CacheLayer::L2 };
            }
        }

        match self.read_l3(address, now).await {
            Ok(Some(entry)) => {
                self.warm_l1(address, &entry);
                self.l2.set(address, entry.clone(), L2_TTL_SECS as u64).await;
                CacheLookup::Hit { exists: entry.exists, handle: entry.handle, layer: CacheLayer::L3 }
            }
            Ok(None) => CacheLookup::Miss,
            Err(e) => {
                warn!(error = %e, address, "L3 cache read failed, treating as miss");
                CacheLookup::Miss
            }
        }
    }

    /// On miss, synchronously asks the transport and writes through all
    /// three layers. A transport failure is not cached; the caller sees
    /// `exists: false` and must classify the underlying error itself.
    pub async fn validate(&self, address: &str, transport: &dyn ChatTransport) -> CacheLookup {
        if let CacheLookup::Hit { exists, handle, layer } = self.lookup(address).await {
            return CacheLookup::Hit { exists, handle, layer };
        }

        match transport.exists_on_platform(address).await {
            Ok(result) => {
                let entry = CacheEntry { exists: result.exists, handle: result.handle.clone(), validated_at: Utc::now() };
                self.write_through(address, &entry).await;
                CacheLookup::Hit { exists: entry.exists, handle: entry.handle, layer: CacheLayer::L1 }
            }
            Err(e) => {
                debug!(error = %e, address, "transport validation failed, not caching");
                CacheLookup::Miss
            }
        }
    }

    async fn write_through(&self, address: &str, entry: &CacheEntry) {
        self.warm_l1(address, entry);
        self.l2.set(address, entry.clone(), L2_TTL_SECS as u64).await;
        if let Err(e) = self.write_l3(address, entry).await {
            warn!(error = %e, address, "failed to persist validation to L3, L1/L2 still updated");
        }
    }

    fn warm_l1(&self, address: &str, entry: &CacheEntry) {
        self.l1.insert(address.to_string(), entry.clone());
    }

    async fn read_l3(&self, address: &str, now: DateTime<Utc>) -> Result<Option<CacheEntry>, sqlx::Error> {
        let row = sqlx::query("SELECT exists_on_platform, handle, validated_at FROM phone_validation_cache WHERE address = ?")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else { return Ok(None) };

        let exists: i64 = row.get("exists_on_platform");
        let handle: Option<String> = row.get("handle");
        let validated_at: String = row.get("validated_at");
        let validated_at = DateTime::parse_from_rfc3339(&validated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);

        let entry = CacheEntry { exists: exists != 0, handle, validated_at };

        if entry.is_expired(L3_TTL_SECS, now) {
            sqlx::query("DELETE FROM phone_validation_cache WHERE address = ?")
                .bind(address)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        Ok(Some(entry))
    }

    async fn write_l3(&self, address: &str, entry: &CacheEntry) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO phone_validation_cache (address, exists_on_platform, handle, validated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                exists_on_platform = excluded.exists_on_platform,
                handle = excluded.handle,
                validated_at = excluded.validated_at
            "#,
        )
        .bind(address)
        .bind(entry.exists as i64)
        .bind(&entry.handle)
        .bind(entry.validated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts uncached addresses into a FIFO processed with a per-item
    /// delay of 3-5s, guaranteeing no concurrent burst against the
    /// transport.
    pub async fn enqueue_background(self: &Arc<Self>, addresses: Vec<String>, transport: Arc<dyn ChatTransport>) {
        let mut pending = VecDeque::new();
        for addr in addresses {
            if matches!(self.lookup(&addr).await, CacheLookup::Miss) {
                pending.push_back(addr);
            }
        }
        if pending.is_empty() {
            return;
        }

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(address) = pending.pop_front() {
                let _ = cache.validate(&address, transport.as_ref()).await;
                let delay_s = rand::thread_rng().gen_range(3.0..=5.0);
                tokio::time::sleep(Duration::from_secs_f64(delay_s)).await;
            }
        });
    }

    /// Distributes unvalidated addresses uniformly across `duration_ms`
    /// with ±20% per-item jitter. At most one progressive warm may be
    /// active per process; a second call while one is running is a no-op.
    pub async fn progressive_warm(self: &Arc<Self>, addresses: Vec<String>, transport: Arc<dyn ChatTransport>, duration_ms: u64) {
        if self
            .progressive_warm_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("progressive warm already active, skipping");
            return;
        }

        let mut uncached = Vec::new();
        for addr in addresses {
            if matches!(self.lookup(&addr).await, CacheLookup::Miss) {
                uncached.push(addr);
            }
        }

        if uncached.is_empty() {
            self.progressive_warm_active.store(false, Ordering::SeqCst);
            return;
        }

        let base_interval_ms = duration_ms as f64 / uncached.len() as f64;
        let cache = Arc::clone(self);

        tokio::spawn(async move {
            for address in uncached {
                let _ = cache.validate(&address, transport.as_ref()).await;
                let jitter = rand::thread_rng().gen_range(-0.20..=0.20);
                let interval_ms = (base_interval_ms * (1.0 + jitter)).max(0.0);
                tokio::time::sleep(Duration::from_millis(interval_ms as u64)).await;
            }
            cache.progressive_warm_active.store(false, Ordering::SeqCst);
        });
    }
}
