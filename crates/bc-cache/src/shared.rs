//! Optional L2 shared-KV tier. A real deployment would back this with
//! Redis; tests and single-node deployments use the no-op that always
//! misses, so the cache degrades gracefully to L1/L3 only.

use async_trait::async_trait;

use crate::CacheEntry;

#[async_trait]
pub trait SharedCache: Send + Sync {
    async fn get(&self, address: &str) -> Option<CacheEntry>;
    async fn set(&self, address: &str, entry: CacheEntry, ttl_secs: u64);
}

/// Always misses. `PhoneValidationCache` falls through to L3 unchanged;
/// write-through to this tier is simply a discard.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSharedCache;

#[async_trait]
impl SharedCache for NoopSharedCache {
    async fn get(&self, _address: &str) -> Option<CacheEntry> {
        None
    }

    async fn set(&self, _address: &str, _entry: CacheEntry, _ttl_secs: u64) {}
}
