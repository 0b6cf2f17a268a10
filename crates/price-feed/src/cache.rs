//! Snapshot cache
//!
//! In-memory last-known-good store keyed by (asset, window). Entries are
//! only ever superseded, never evicted; freshness is the caller's call.
//! Size is naturally bounded by tracked assets x window sizes.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use cryptodash_core::{AssetId, PriceSnapshot};

/// Key for snapshot lookups
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub asset: AssetId,
    pub window_days: u32,
}

impl CacheKey {
    pub fn new(asset: AssetId, window_days: u32) -> Self {
        Self { asset, window_days }
    }
}

/// Timestamped snapshot entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub snapshot: PriceSnapshot,
    pub inserted_at: Instant,
}

impl CacheEntry {
    pub fn age(&self) -> Duration {
        self.inserted_at.elapsed()
    }

    pub fn is_fresh(&self, freshness_window: Duration) -> bool {
        self.age() < freshness_window
    }
}

/// Process-wide snapshot store
///
/// Constructed explicitly and shared via Arc so tests get isolated
/// instances; restart loses everything, callers regenerate via the fetcher.
#[derive(Debug)]
pub struct SnapshotCache {
    entries: DashMap<CacheKey, CacheEntry>,
    insert_count: AtomicU64,
    last_insert: RwLock<Option<Instant>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            insert_count: AtomicU64::new(0),
            last_insert: RwLock::new(None),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|r| r.value().clone())
    }

    /// Insert or overwrite the entry for this key
    pub fn put(&self, key: CacheKey, snapshot: PriceSnapshot) {
        let entry = CacheEntry {
            snapshot,
            inserted_at: Instant::now(),
        };

        self.entries.insert(key, entry);
        self.insert_count.fetch_add(1, Ordering::Relaxed);
        *self.last_insert.write() = Some(Instant::now());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entry_count: self.entries.len(),
            insert_count: self.insert_count.load(Ordering::Relaxed),
            last_insert_age: self.last_insert.read().map(|t| t.elapsed()),
        }
    }
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about the cache
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub entry_count: usize,
    pub insert_count: u64,
    pub last_insert_age: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use cryptodash_core::Provenance;

    fn snapshot(price: f64) -> PriceSnapshot {
        PriceSnapshot {
            asset: "bitcoin".into(),
            price_usd: price,
            change_24h_pct: 0.0,
            volume_24h_usd: 0.0,
            market_cap_usd: 0.0,
            historical_series: vec![],
            fetched_at_ms: 0,
            provenance: Provenance::Live,
        }
    }

    #[test]
    fn test_put_then_get() {
        let cache = SnapshotCache::new();
        let key = CacheKey::new("bitcoin".into(), 30);

        assert!(cache.get(&key).is_none());

        cache.put(key.clone(), snapshot(50_000.0));
        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.snapshot.price_usd, 50_000.0);
        assert_eq!(cache.stats().insert_count, 1);
    }

    #[test]
    fn test_put_supersedes() {
        let cache = SnapshotCache::new();
        let key = CacheKey::new("bitcoin".into(), 30);

        cache.put(key.clone(), snapshot(50_000.0));
        cache.put(key.clone(), snapshot(51_000.0));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key).unwrap().snapshot.price_usd, 51_000.0);
        assert_eq!(cache.stats().insert_count, 2);
    }

    #[test]
    fn test_windows_are_distinct_keys() {
        let cache = SnapshotCache::new();
        cache.put(CacheKey::new("bitcoin".into(), 7), snapshot(1.0));
        cache.put(CacheKey::new("bitcoin".into(), 30), snapshot(2.0));

        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_window() {
        let cache = SnapshotCache::new();
        let key = CacheKey::new("bitcoin".into(), 30);
        cache.put(key.clone(), snapshot(50_000.0));

        let window = Duration::from_secs(30);
        assert!(cache.get(&key).unwrap().is_fresh(window));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!cache.get(&key).unwrap().is_fresh(window));

        // Stale entries remain readable; they are superseded, not evicted
        assert!(cache.get(&key).is_some());
    }
}
