//! Memoizing wrapper around an [`Agent`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};

use super::{Agent, StageError, StageInput};
use crate::cache::{CacheType, StageCache};

/// Wraps an agent and serves repeated inputs from a [`StageCache`].
///
/// The key covers the stage name, the workflow input and the upstream
/// results, but not the workflow id, so identical analyses in different
/// workflows share entries. Only successful results are cached.
pub struct CachedAgent<A> {
    inner: A,
    cache: Arc<dyn StageCache>,
    cache_type: CacheType,
    ttl: Option<Duration>,
}

impl<A: Agent> CachedAgent<A> {
    pub fn new(inner: A, cache: Arc<dyn StageCache>, cache_type: CacheType) -> Self {
        Self {
            inner,
            cache,
            cache_type,
            ttl: None,
        }
    }

    /// Override the cache type's default TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Hex SHA-256 of the stage name and its deterministic inputs.
    pub fn cache_key(input: &StageInput) -> Result<String, StageError> {
        let payload = serde_json::to_vec(&(&input.input_data, &input.upstream))
            .map_err(|e| StageError::new("CacheKeyError", e.to_string()))?;

        let mut hasher = Sha256::new();
        hasher.update(input.stage.as_bytes());
        hasher.update([0u8]);
        hasher.update(&payload);
        Ok(hex::encode(hasher.finalize()))
    }
}

impl<A: Agent> Agent for CachedAgent<A> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn invoke(&self, input: &StageInput) -> Result<Value, StageError> {
        let key = match Self::cache_key(input) {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!(stage = %input.stage, error = %e, "Bypassing cache");
                return self.inner.invoke(input);
            }
        };

        if let Some(hit) = self.cache.get(&key, self.cache_type) {
            tracing::debug!(
                workflow_id = %input.workflow_id,
                stage = %input.stage,
                cache_type = %self.cache_type,
                "Cache hit"
            );
            return Ok(hit);
        }

        let value = self.inner.invoke(input)?;
        self.cache
            .put(&key, value.clone(), self.cache_type, self.ttl);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl Agent for Counting {
        fn name(&self) -> &str {
            "literature"
        }

        fn invoke(&self, input: &StageInput) -> Result<Value, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(StageError::new("HttpError", "503"));
            }
            Ok(json!({"query": input.input_data["gene"]}))
        }
    }

    fn cached(fail: bool) -> (CachedAgent<Counting>, Arc<AtomicUsize>, Arc<MemoryCache>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = Arc::new(MemoryCache::default());
        let agent = CachedAgent::new(
            Counting {
                calls: Arc::clone(&calls),
                fail,
            },
            cache.clone(),
            CacheType::LiteratureSearch,
        );
        (agent, calls, cache)
    }

    #[test]
    fn test_repeat_input_served_from_cache() {
        let (agent, calls, cache) = cached(false);
        let first = StageInput::new("wf-1", "literature", json!({"gene": "TP53"}));
        let second = StageInput::new("wf-2", "literature", json!({"gene": "TP53"}));

        assert_eq!(agent.invoke(&first).unwrap(), json!({"query": "TP53"}));
        assert_eq!(agent.invoke(&second).unwrap(), json!({"query": "TP53"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn test_different_upstream_misses() {
        let (agent, calls, _cache) = cached(false);
        let a = StageInput::new("wf", "literature", json!({"gene": "TP53"}));
        let b = a.clone().with_upstream("genomics", json!({"variants": 4}));

        agent.invoke(&a).unwrap();
        agent.invoke(&b).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_ne!(
            CachedAgent::<Counting>::cache_key(&a).unwrap(),
            CachedAgent::<Counting>::cache_key(&b).unwrap()
        );
    }

    #[test]
    fn test_failures_not_cached() {
        let (agent, calls, cache) = cached(true);
        let input = StageInput::new("wf", "literature", json!({"gene": "EGFR"}));
        assert!(agent.invoke(&input).is_err());
        assert!(agent.invoke(&input).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_max_ttl_override_still_caches() {
        let (agent, calls, _cache) = cached(false);
        let agent = agent.with_ttl(Duration::MAX);
        let input = StageInput::new("wf", "literature", json!({"gene": "BRCA1"}));

        agent.invoke(&input).unwrap();
        agent.invoke(&input).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_key_is_hex_sha256() {
        let input = StageInput::new("wf", "drug", json!({}));
        let key = CachedAgent::<Counting>::cache_key(&input).unwrap();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
