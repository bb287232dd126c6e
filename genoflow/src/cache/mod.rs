//! Optional result cache for expensive stages.
//!
//! Keys are namespaced by [`CacheType`]; each type carries a default TTL.
//! [`MemoryCache`] is the in-process implementation: per-entry TTL and a
//! size bound, both enforced by `moka`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of cached data. Determines the default TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheType {
    ApiResponse,
    ComputationResult,
    LiteratureSearch,
    ProteinStructure,
    DrugCandidate,
    GenomicsAnalysis,
}

impl CacheType {
    pub fn default_ttl(&self) -> Duration {
        const HOUR: u64 = 3600;
        match self {
            Self::ApiResponse => Duration::from_secs(HOUR),
            Self::ComputationResult => Duration::from_secs(2 * HOUR),
            Self::LiteratureSearch => Duration::from_secs(24 * HOUR),
            Self::ProteinStructure => Duration::from_secs(7 * 24 * HOUR),
            Self::DrugCandidate => Duration::from_secs(24 * HOUR),
            Self::GenomicsAnalysis => Duration::from_secs(HOUR),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ApiResponse => "api_response",
            Self::ComputationResult => "computation_result",
            Self::LiteratureSearch => "literature_search",
            Self::ProteinStructure => "protein_structure",
            Self::DrugCandidate => "drug_candidate",
            Self::GenomicsAnalysis => "genomics_analysis",
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cache port consumed by [`crate::agent::CachedAgent`].
pub trait StageCache: Send + Sync {
    /// Look up a live entry. Expired entries are treated as missing.
    fn get(&self, key: &str, cache_type: CacheType) -> Option<Value>;

    /// Store a value. `None` uses the type's default TTL.
    fn put(&self, key: &str, value: Value, cache_type: CacheType, ttl: Option<Duration>);

    /// Drop an entry. Returns whether it existed.
    fn invalidate(&self, key: &str, cache_type: CacheType) -> bool;

    fn stats(&self) -> CacheStats;
}

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Cached value plus the TTL it was stored with.
#[derive(Debug)]
struct Entry {
    value: Value,
    ttl: Duration,
}

/// Per-entry expiry: each write restarts the entry's own TTL.
struct EntryExpiry;

impl Expiry<(CacheType, String), Arc<Entry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &(CacheType, String),
        entry: &Arc<Entry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &(CacheType, String),
        entry: &Arc<Entry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(entry.ttl)
    }
}

/// In-memory [`StageCache`] backed by `moka`, bounded by entry count.
pub struct MemoryCache {
    cache: Cache<(CacheType, String), Arc<Entry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl MemoryCache {
    pub const DEFAULT_MAX_ENTRIES: u64 = 1024;

    /// Longest TTL an entry may carry. Longer requests are capped.
    pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 3600);

    pub fn new(max_entries: u64) -> Self {
        let evictions = Arc::new(AtomicU64::new(0));
        let listener_evictions = Arc::clone(&evictions);
        let cache: Cache<(CacheType, String), Arc<Entry>> = Cache::builder()
            .max_capacity(max_entries.max(1))
            .expire_after(EntryExpiry)
            .eviction_listener(move |key: Arc<(CacheType, String)>, _entry: Arc<Entry>, cause| {
                if cause == RemovalCause::Size {
                    listener_evictions.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(cache_type = %key.0, key = %key.1, "Evicted cache entry");
                }
            })
            .build();

        Self {
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions,
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

impl StageCache for MemoryCache {
    fn get(&self, key: &str, cache_type: CacheType) -> Option<Value> {
        let hit = self
            .cache
            .get(&(cache_type, key.to_string()))
            .map(|entry| entry.value.clone());

        if hit.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        hit
    }

    fn put(&self, key: &str, value: Value, cache_type: CacheType, ttl: Option<Duration>) {
        let ttl = ttl
            .unwrap_or_else(|| cache_type.default_ttl())
            .min(Self::MAX_TTL);
        self.cache
            .insert((cache_type, key.to_string()), Arc::new(Entry { value, ttl }));
    }

    fn invalidate(&self, key: &str, cache_type: CacheType) -> bool {
        self.cache.remove(&(cache_type, key.to_string())).is_some()
    }

    fn stats(&self) -> CacheStats {
        // Apply pending writes and evictions so the entry count is current.
        self.cache.run_pending_tasks();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.cache.entry_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_default_ttls() {
        assert_eq!(CacheType::ApiResponse.default_ttl(), Duration::from_secs(3600));
        assert_eq!(
            CacheType::ProteinStructure.default_ttl(),
            Duration::from_secs(604_800)
        );
        assert_eq!(
            CacheType::LiteratureSearch.default_ttl(),
            Duration::from_secs(86_400)
        );
    }

    #[test]
    fn test_put_get_and_stats() {
        let cache = MemoryCache::default();
        assert!(cache.get("k", CacheType::DrugCandidate).is_none());

        cache.put("k", json!({"hits": 2}), CacheType::DrugCandidate, None);
        assert_eq!(cache.get("k", CacheType::DrugCandidate), Some(json!({"hits": 2})));
        // Same key in another namespace is distinct.
        assert!(cache.get("k", CacheType::ApiResponse).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 2);
        assert_eq!(stats.entries, 1);
        assert!((stats.hit_rate() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_expired_entry_is_missing() {
        let cache = MemoryCache::default();
        cache.put("k", json!(1), CacheType::ApiResponse, Some(Duration::ZERO));
        assert!(cache.get("k", CacheType::ApiResponse).is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn test_size_bound_evicts() {
        let cache = MemoryCache::new(4);
        for i in 0..32 {
            cache.put(&format!("k{}", i), json!(i), CacheType::ComputationResult, None);
        }

        let stats = cache.stats();
        assert!(stats.entries <= 4, "entries = {}", stats.entries);
        assert!(stats.evictions > 0);
    }

    #[test]
    fn test_invalidate() {
        let cache = MemoryCache::default();
        cache.put("a", json!(1), CacheType::GenomicsAnalysis, None);
        assert!(cache.invalidate("a", CacheType::GenomicsAnalysis));
        assert!(!cache.invalidate("a", CacheType::GenomicsAnalysis));
        assert!(cache.get("a", CacheType::GenomicsAnalysis).is_none());
    }

    #[test]
    fn test_unbounded_ttl_is_capped() {
        let cache = MemoryCache::default();
        cache.put("k", json!("forever"), CacheType::ProteinStructure, Some(Duration::MAX));
        assert_eq!(
            cache.get("k", CacheType::ProteinStructure),
            Some(json!("forever"))
        );
    }

    #[test]
    fn test_rewrite_replaces_ttl() {
        let cache = MemoryCache::default();
        cache.put("k", json!(1), CacheType::ApiResponse, Some(Duration::ZERO));
        cache.put("k", json!(2), CacheType::ApiResponse, None);
        assert_eq!(cache.get("k", CacheType::ApiResponse), Some(json!(2)));
    }
}
