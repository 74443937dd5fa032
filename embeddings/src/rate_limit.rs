//! Sliding-window admission control for provider requests and tokens.
//!
//! Each provider instance owns one [`RateLimiter`]. Before every outbound
//! call the limiter prunes its ledger to the trailing minute and, if either
//! ceiling would be crossed, sleeps the calling task until the oldest entry
//! leaves the window. Only calls routed through the limiter are throttled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::embedder::{Embedder, ModelInfo, estimate_tokens};
use crate::result::EmbeddingResult;

/// Length of the trailing usage window.
pub const WINDOW: Duration = Duration::from_secs(60);

/// Extra wait past the moment the oldest entry expires.
const SAFETY_MARGIN: Duration = Duration::from_secs(1);

/// Per-minute ceilings. A zero ceiling disables that check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    /// Maximum requests in any 60 second window.
    pub requests_per_minute: usize,

    /// Maximum tokens in any 60 second window.
    pub tokens_per_minute: usize,
}

impl RateLimits {
    pub const fn new(requests_per_minute: usize, tokens_per_minute: usize) -> Self {
        Self {
            requests_per_minute,
            tokens_per_minute,
        }
    }
}

/// Token usage of one admitted request.
#[derive(Debug)]
struct TokenEntry {
    id: u64,
    at: Instant,
    tokens: usize,
}

/// Request and token usage within the trailing window, oldest first.
#[derive(Debug, Default)]
pub struct Ledger {
    requests: VecDeque<Instant>,
    tokens: VecDeque<TokenEntry>,
    token_total: usize,
    next_id: u64,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every entry that is at least [`WINDOW`] old at `now`.
    pub fn prune(&mut self, now: Instant) {
        while let Some(&at) = self.requests.front() {
            if now.saturating_duration_since(at) < WINDOW {
                break;
            }
            self.requests.pop_front();
        }
        while let Some(entry) = self.tokens.front() {
            if now.saturating_duration_since(entry.at) < WINDOW {
                break;
            }
            self.token_total = self.token_total.saturating_sub(entry.tokens);
            self.tokens.pop_front();
        }
    }

    /// Append a request admitted at `at` holding `tokens`, and return its id.
    pub fn reserve(&mut self, at: Instant, tokens: usize) -> u64 {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.requests.push_back(at);
        self.tokens.push_back(TokenEntry { id, at, tokens });
        self.token_total = self.token_total.saturating_add(tokens);
        id
    }

    /// Replace the tokens held by reservation `id`.
    ///
    /// Returns `false` if the reservation already left the window.
    pub fn settle(&mut self, id: u64, tokens: usize) -> bool {
        let Some(entry) = self.tokens.iter_mut().rev().find(|entry| entry.id == id) else {
            return false;
        };
        self.token_total = self
            .token_total
            .saturating_sub(entry.tokens)
            .saturating_add(tokens);
        entry.tokens = tokens;
        true
    }

    /// How long a call estimated at `estimated_tokens` must wait at `now`.
    ///
    /// Returns `None` when the call can proceed immediately.
    pub fn wait_time(
        &mut self,
        now: Instant,
        estimated_tokens: usize,
        limits: &RateLimits,
    ) -> Option<Duration> {
        self.prune(now);

        if limits.requests_per_minute > 0 && self.requests.len() >= limits.requests_per_minute {
            if let Some(&oldest) = self.requests.front() {
                return Some((oldest + WINDOW + SAFETY_MARGIN).saturating_duration_since(now));
            }
        }

        if limits.tokens_per_minute > 0
            && self.token_total.saturating_add(estimated_tokens) >= limits.tokens_per_minute
        {
            if let Some(oldest) = self.tokens.front() {
                return Some((oldest.at + WINDOW + SAFETY_MARGIN).saturating_duration_since(now));
            }
        }

        None
    }

    /// Requests currently inside the window, as of the last prune.
    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    /// Tokens currently inside the window, as of the last prune.
    pub fn token_total(&self) -> usize {
        self.token_total
    }
}

/// A request slot granted by [`RateLimiter::acquire`].
///
/// Pass it back to [`RateLimiter::record`] once the call finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct Reservation {
    id: u64,
    waited: Duration,
}

impl Reservation {
    /// Time spent waiting before the slot was granted.
    pub fn waited(&self) -> Duration {
        self.waited
    }
}

/// Cooperative per-provider rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    limits: RateLimits,
    ledger: Mutex<Ledger>,
    total_wait_ms: AtomicU64,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            ledger: Mutex::new(Ledger::new()),
            total_wait_ms: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> RateLimits {
        self.limits
    }

    /// Wait until a call estimated at `estimated_tokens` fits both ceilings,
    /// then reserve its slot.
    ///
    /// The check and the reservation happen under one lock, so tasks sharing
    /// this limiter are admitted one at a time. The ledger is checked again
    /// after every sleep.
    pub async fn acquire(&self, estimated_tokens: usize) -> Reservation {
        if self.limits.tokens_per_minute > 0 && estimated_tokens >= self.limits.tokens_per_minute
        {
            warn!(
                "Estimated {estimated_tokens} tokens exceeds the {} tokens/minute ceiling",
                self.limits.tokens_per_minute
            );
        }

        let mut waited = Duration::ZERO;
        let id = loop {
            let wait = {
                let mut ledger = self.ledger.lock().await;
                let now = Instant::now();
                match ledger.wait_time(now, estimated_tokens, &self.limits) {
                    Some(wait) => wait,
                    None => break ledger.reserve(now, estimated_tokens),
                }
            };

            info!("Rate limit reached, waiting {:.1}s", wait.as_secs_f64());
            tokio::time::sleep(wait).await;
            waited += wait;
        };

        if !waited.is_zero() {
            let millis = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
            self.total_wait_ms.fetch_add(millis, Ordering::Relaxed);
        }
        Reservation { id, waited }
    }

    /// Settle `reservation` with the provider-reported token usage.
    pub async fn record(&self, reservation: Reservation, actual_tokens: usize) {
        let mut ledger = self.ledger.lock().await;
        if !ledger.settle(reservation.id, actual_tokens) {
            debug!("Reservation {} already left the window", reservation.id);
            return;
        }
        debug!(
            "Recorded request using {actual_tokens} tokens ({} requests, {} tokens in window)",
            ledger.request_count(),
            ledger.token_total()
        );
    }

    /// Requests and tokens inside the trailing window right now.
    pub async fn usage(&self) -> (usize, usize) {
        let mut ledger = self.ledger.lock().await;
        ledger.prune(Instant::now());
        (ledger.request_count(), ledger.token_total())
    }

    /// Total time callers have spent waiting on this limiter.
    pub fn total_wait(&self) -> Duration {
        Duration::from_millis(self.total_wait_ms.load(Ordering::Relaxed))
    }
}

/// Decorator that throttles any [`Embedder`] through a [`RateLimiter`].
pub struct RateLimitedEmbedder<E> {
    inner: E,
    limiter: RateLimiter,
}

impl<E: Embedder> RateLimitedEmbedder<E> {
    pub fn new(inner: E, limits: RateLimits) -> Self {
        Self {
            inner,
            limiter: RateLimiter::new(limits),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RateLimitedEmbedder<E> {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        let reservation = self.limiter.acquire(estimate_tokens(text)).await;
        let result = self.inner.embed_text(text).await;
        self.limiter.record(reservation, result.token_count()).await;
        result
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        if texts.is_empty() {
            return Vec::new();
        }
        let estimated: usize = texts.iter().map(|text| estimate_tokens(text)).sum();
        let reservation = self.limiter.acquire(estimated).await;
        let results = self.inner.embed_batch(texts).await;
        let actual = results.iter().map(EmbeddingResult::token_count).sum();
        self.limiter.record(reservation, actual).await;
        results
    }

    fn max_tokens(&self) -> usize {
        self.inner.max_tokens()
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            rate_limits: Some(self.limiter.limits()),
            ..self.inner.model_info()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::null::NullEmbedder;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_ledger_request_ceiling() {
        let limits = RateLimits::new(2, 1_000_000);
        let t0 = Instant::now();
        let mut ledger = Ledger::new();
        ledger.reserve(t0, 0);
        ledger.reserve(t0 + Duration::from_secs(10), 0);

        let wait = ledger.wait_time(t0 + Duration::from_secs(15), 0, &limits);
        assert_eq!(wait, Some(Duration::from_secs(46)));

        let wait = ledger.wait_time(t0 + Duration::from_secs(61), 0, &limits);
        assert_eq!(wait, None);
        assert_eq!(ledger.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_token_ceiling() {
        let limits = RateLimits::new(100, 100);
        let t0 = Instant::now();
        let mut ledger = Ledger::new();
        ledger.reserve(t0, 60);

        assert_eq!(ledger.wait_time(t0, 39, &limits), None);
        assert_eq!(
            ledger.wait_time(t0 + Duration::from_secs(5), 40, &limits),
            Some(Duration::from_secs(56))
        );
        assert_eq!(
            ledger.wait_time(t0 + Duration::from_secs(60), 40, &limits),
            None
        );
        assert_eq!(ledger.token_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_estimate_admitted_on_empty_ledger() {
        let limits = RateLimits::new(10, 100);
        let mut ledger = Ledger::new();
        assert_eq!(ledger.wait_time(Instant::now(), 500, &limits), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_settle_replaces_estimate() {
        let limits = RateLimits::new(100, 100);
        let t0 = Instant::now();
        let mut ledger = Ledger::new();
        let first = ledger.reserve(t0, 90);
        let second = ledger.reserve(t0, 5);

        assert!(ledger.wait_time(t0, 10, &limits).is_some());
        assert!(ledger.settle(first, 20));
        assert_eq!(ledger.token_total(), 25);
        assert_eq!(ledger.wait_time(t0, 10, &limits), None);

        ledger.prune(t0 + WINDOW);
        assert!(!ledger.settle(second, 50));
        assert_eq!(ledger.token_total(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_blocks_until_oldest_expires() {
        let limiter = RateLimiter::new(RateLimits::new(2, 1_000_000));
        let start = Instant::now();

        let first = limiter.acquire(5).await;
        limiter.record(first, 5).await;
        tokio::time::advance(Duration::from_secs(10)).await;
        let second = limiter.acquire(5).await;
        limiter.record(second, 5).await;
        tokio::time::advance(Duration::from_secs(5)).await;

        let third = limiter.acquire(5).await;

        assert!(start.elapsed() >= Duration::from_secs(61));
        assert_eq!(third.waited(), Duration::from_secs(46));
        assert_eq!(limiter.total_wait(), Duration::from_secs(46));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_without_pressure_is_immediate() {
        let limiter = RateLimiter::new(RateLimits::new(5, 1000));
        let reservation = limiter.acquire(10).await;
        limiter.record(reservation, 10).await;
        assert_eq!(limiter.acquire(10).await.waited(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_replaces_reserved_estimate() {
        let limiter = RateLimiter::new(RateLimits::new(10, 1000));
        let reservation = limiter.acquire(2).await;
        assert_eq!(limiter.usage().await, (1, 2));

        limiter.record(reservation, 21).await;
        assert_eq!(limiter.usage().await, (1, 21));

        tokio::time::advance(WINDOW).await;
        assert_eq!(limiter.usage().await, (0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_ceiling() {
        let limiter = Arc::new(RateLimiter::new(RateLimits::new(2, 0)));
        let start = Instant::now();

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..5 {
            let limiter = Arc::clone(&limiter);
            tasks.spawn(async move {
                let reservation = limiter.acquire(1).await;
                let admitted = start.elapsed();
                tokio::time::sleep(Duration::from_millis(100)).await;
                limiter.record(reservation, 1).await;
                admitted
            });
        }

        let mut admitted = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            admitted.push(joined.unwrap());
        }
        admitted.sort();

        let in_first_window = admitted.iter().filter(|at| **at < WINDOW).count();
        assert_eq!(in_first_window, 2);
        for pair in admitted.windows(3) {
            assert!(pair[2] - pair[0] >= WINDOW, "{admitted:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_embedder_throttles() {
        let embedder = RateLimitedEmbedder::new(NullEmbedder::new(4), RateLimits::new(1, 0));
        let start = Instant::now();

        assert!(embedder.embed_text("first").await.is_success());
        assert!(embedder.embed_text("second").await.is_success());

        assert!(start.elapsed() >= Duration::from_secs(61));
        assert_eq!(
            embedder.model_info().rate_limits,
            Some(RateLimits::new(1, 0))
        );
    }
}
