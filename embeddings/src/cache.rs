//! Content-addressed embedding cache.
//!
//! [`CachedEmbedder`] wraps any [`Embedder`] and remembers every successful
//! result under the SHA-256 digest of the raw input text. Entries never
//! expire by time. When the cache is full, the oldest half of the entries
//! (by insertion order) is evicted in one sweep.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::embedder::{Embedder, ModelInfo};
use crate::result::EmbeddingResult;

/// Default maximum number of cached results.
pub const DEFAULT_MAX_CACHE_SIZE: usize = 10_000;

/// Cache key: SHA-256 digest of the input text.
pub type CacheKey = [u8; 32];

/// Compute the cache key for a text.
pub fn cache_key(text: &str) -> CacheKey {
    Sha256::digest(text.as_bytes()).into()
}

/// Statistics about the embedding cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in cache.
    pub size: usize,

    /// Maximum cache size.
    pub capacity: usize,

    /// Lookups answered from the cache.
    pub hits: u64,

    /// Lookups that went to the wrapped embedder.
    pub misses: u64,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<CacheKey, EmbeddingResult>,
    order: VecDeque<CacheKey>,
}

impl CacheState {
    fn insert(&mut self, key: CacheKey, result: EmbeddingResult, capacity: usize) {
        if capacity == 0 {
            return;
        }
        if let Some(existing) = self.entries.get_mut(&key) {
            *existing = result;
            return;
        }

        if self.entries.len() >= capacity {
            let evict = (self.entries.len() / 2).max(1);
            for old in self.order.drain(..evict.min(self.order.len())) {
                self.entries.remove(&old);
            }
            info!("Evicted {evict} cached embeddings (capacity {capacity})");
        }

        self.order.push_back(key);
        self.entries.insert(key, result);
    }
}

/// A wrapper that provides cached embedding generation.
pub struct CachedEmbedder<E> {
    inner: E,
    state: Mutex<CacheState>,
    max_cache_size: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<E: Embedder> CachedEmbedder<E> {
    /// Create a new cached embedder.
    pub fn new(inner: E, max_cache_size: usize) -> Self {
        Self {
            inner,
            state: Mutex::new(CacheState::default()),
            max_cache_size,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the wrapped embedder.
    pub fn inner(&self) -> &E {
        &self.inner
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            size: self.lock().entries.len(),
            capacity: self.max_cache_size,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of cached results.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if a result for `text` is cached.
    pub fn contains(&self, text: &str) -> bool {
        self.lock().entries.contains_key(&cache_key(text))
    }

    /// Clear the entire cache.
    pub fn clear(&self) {
        let mut state = self.lock();
        state.entries.clear();
        state.order.clear();
        info!("Cleared embedding cache");
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lookup(&self, key: &CacheKey) -> Option<EmbeddingResult> {
        let found = self.lock().entries.get(key).cloned();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn store(&self, key: CacheKey, result: &EmbeddingResult) {
        if result.is_success() {
            self.lock().insert(key, result.clone(), self.max_cache_size);
        }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        let key = cache_key(text);
        if let Some(result) = self.lookup(&key) {
            debug!("Cache hit for embedding");
            return result;
        }

        let result = self.inner.embed_text(text).await;
        self.store(key, &result);
        result
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        let keys: Vec<CacheKey> = texts.iter().map(|text| cache_key(text)).collect();
        let mut slots: Vec<Option<EmbeddingResult>> =
            keys.iter().map(|key| self.lookup(key)).collect();

        // Each distinct uncached text is sent once.
        let mut seen = HashSet::new();
        let mut miss_indices = Vec::new();
        for (index, slot) in slots.iter().enumerate() {
            if slot.is_none() && seen.insert(keys[index]) {
                miss_indices.push(index);
            }
        }

        debug!(
            "Cache batch: {} hits, {} to compute",
            texts.len() - slots.iter().filter(|slot| slot.is_none()).count(),
            miss_indices.len()
        );

        if !miss_indices.is_empty() {
            let miss_texts: Vec<String> = miss_indices.iter().map(|&i| texts[i].clone()).collect();
            let mut computed = self.inner.embed_batch(&miss_texts).await.into_iter();

            let mut fresh: HashMap<CacheKey, EmbeddingResult> = HashMap::new();
            for &index in &miss_indices {
                let result = computed.next().unwrap_or_else(|| {
                    EmbeddingResult::failure(
                        texts[index].as_str(),
                        self.inner.model_info().model,
                        "wrapped embedder returned fewer results than requested",
                    )
                });
                self.store(keys[index], &result);
                fresh.insert(keys[index], result);
            }

            for (index, slot) in slots.iter_mut().enumerate() {
                if slot.is_none() {
                    *slot = fresh.get(&keys[index]).cloned();
                }
            }
        }

        slots
            .into_iter()
            .zip(texts)
            .map(|(slot, text)| {
                slot.unwrap_or_else(|| {
                    EmbeddingResult::failure(
                        text.as_str(),
                        self.inner.model_info().model,
                        "no result computed",
                    )
                })
            })
            .collect()
    }

    fn max_tokens(&self) -> usize {
        self.inner.max_tokens()
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            cache: Some(self.stats()),
            ..self.inner.model_info()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::AtomicUsize;

    /// Counts calls and fails any text starting with "bad".
    struct CountingEmbedder {
        text_calls: AtomicUsize,
        batch_calls: AtomicUsize,
        texts_embedded: AtomicUsize,
    }

    impl CountingEmbedder {
        fn new() -> Self {
            Self {
                text_calls: AtomicUsize::new(0),
                batch_calls: AtomicUsize::new(0),
                texts_embedded: AtomicUsize::new(0),
            }
        }

        fn embed(&self, text: &str) -> EmbeddingResult {
            self.texts_embedded.fetch_add(1, Ordering::SeqCst);
            if text.starts_with("bad") {
                EmbeddingResult::failure(text, "counting", "invalid input")
            } else {
                EmbeddingResult::success(text, vec![text.len() as f32, 1.0], "counting", 1, 0.0, 0.0)
            }
        }
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed_text(&self, text: &str) -> EmbeddingResult {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            self.embed(text)
        }

        async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);
            texts.iter().map(|text| self.embed(text)).collect()
        }

        fn max_tokens(&self) -> usize {
            100
        }

        fn model_info(&self) -> ModelInfo {
            ModelInfo {
                provider: "counting".to_string(),
                model: "counting".to_string(),
                dimension: 2,
                max_tokens: 100,
                price_per_1k_tokens: 0.0,
                supports_batch: true,
                supports_retry: false,
                max_batch_size: 16,
                rate_limits: None,
                cache: None,
            }
        }
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|text| (*text).to_string()).collect()
    }

    #[tokio::test]
    async fn test_cache_round_trip() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 100);

        let first = cache.embed_text("hello").await;
        let second = cache.embed_text("hello").await;

        assert_eq!(first.embedding(), second.embedding());
        assert_eq!(cache.inner().text_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test]
    async fn test_failures_not_cached() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 100);

        assert!(!cache.embed_text("bad input").await.is_success());
        assert!(!cache.contains("bad input"));
        cache.embed_text("bad input").await;
        assert_eq!(cache.inner().text_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_batch_preserves_order_with_mixed_hits() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 100);
        cache.embed_text("bb").await;
        cache.embed_text("dddd").await;

        let texts = strings(&["a", "bb", "bad", "dddd", "eeeee", "a"]);
        let results = cache.embed_batch(&texts).await;

        assert_eq!(results.len(), texts.len());
        for (result, text) in results.iter().zip(&texts) {
            assert_eq!(result.text(), text);
        }
        assert!(!results[2].is_success());
        assert_eq!(results[4].embedding(), &[5.0, 1.0]);
        assert_eq!(results[0], results[5]);

        // "a", "bad" and "eeeee" only; the repeated "a" is sent once.
        assert_eq!(cache.inner().batch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.inner().texts_embedded.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_batch_all_cached_skips_inner() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 100);
        let texts = strings(&["x", "y"]);
        cache.embed_batch(&texts).await;
        let again = cache.embed_batch(&texts).await;

        assert_eq!(again.len(), 2);
        assert_eq!(cache.inner().batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_and_batch_agree() {
        let single = CachedEmbedder::new(CountingEmbedder::new(), 100);
        let batch = CachedEmbedder::new(CountingEmbedder::new(), 100);

        let from_single = single.embed_text("same text").await;
        let from_batch = batch.embed_batch(&strings(&["same text"])).await;

        assert_eq!(from_batch, vec![from_single]);
    }

    #[tokio::test]
    async fn test_eviction_bounds_size_and_keeps_newest() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 4);
        for i in 0..5 {
            cache.embed_text(&format!("text {i}")).await;
        }

        assert!(cache.len() <= 4);
        assert!(cache.contains("text 4"));
        assert!(!cache.contains("text 0"));
        assert!(!cache.contains("text 1"));
        assert!(cache.contains("text 2"));
    }

    #[tokio::test]
    async fn test_eviction_with_capacity_one() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 1);
        cache.embed_text("first").await;
        cache.embed_text("second").await;

        assert_eq!(cache.len(), 1);
        assert!(cache.contains("second"));
    }

    #[tokio::test]
    async fn test_zero_capacity_disables_storage() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 0);
        cache.embed_text("hello").await;
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_model_info_includes_stats() {
        let cache = CachedEmbedder::new(CountingEmbedder::new(), 10);
        cache.embed_text("hello").await;
        cache.embed_text("hello").await;

        let info = cache.model_info();
        assert_eq!(info.provider, "counting");
        assert_eq!(
            info.cache,
            Some(CacheStats {
                size: 1,
                capacity: 10,
                hits: 1,
                misses: 1,
            })
        );

        cache.clear();
        assert!(cache.is_empty());
    }
}
