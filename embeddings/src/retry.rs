//! Exponential backoff with jitter for transient provider failures.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{debug, warn};

use crate::embedder::{Embedder, ModelInfo};
use crate::error::is_transient_error;
use crate::result::EmbeddingResult;

/// Jitter multiplies each delay by a factor drawn from this range.
const JITTER_RANGE: std::ops::RangeInclusive<f64> = 1.1..=1.3;

/// Retry tuning shared by providers and [`RetryingEmbedder`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Upper bound on the un-jittered delay.
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a policy with the default tuning.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Total attempts including the first one.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Un-jittered delay before retry `attempt` (0-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = secs.clamp(0.0, self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// Delay before retry `attempt`, inflated by a random jitter factor.
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let factor = rand::rng().random_range(JITTER_RANGE);
        self.delay_for(attempt).mul_f64(factor)
    }

    /// Run `operation` until it succeeds, fails permanently, or retries run out.
    ///
    /// Only errors whose message looks transient are retried. The last error
    /// is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, operation: F) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
    {
        self.run_with_floor(operation, |_| None).await
    }

    /// Like [`run`](Self::run), but never sleeps less than `min_delay(&err)`
    /// before retrying `err`.
    pub async fn run_with_floor<T, E, F, Fut, M>(
        &self,
        mut operation: F,
        min_delay: M,
    ) -> std::result::Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: fmt::Display,
        M: Fn(&E) -> Option<Duration>,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let message = err.to_string();
            if !is_transient_error(&message) {
                debug!("Not retrying permanent error: {message}");
                return Err(err);
            }
            if attempt >= self.max_retries {
                warn!(
                    "Giving up after {} attempts: {message}",
                    self.max_attempts()
                );
                return Err(err);
            }

            let delay = self.jittered_delay(attempt);
            let delay = min_delay(&err).map_or(delay, |floor| delay.max(floor));
            warn!(
                "Transient error (attempt {}/{}), retrying in {:.2}s: {message}",
                attempt + 1,
                self.max_attempts(),
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

/// A failed result carried through [`RetryPolicy::run`] as an error.
struct FailedEmbedding(EmbeddingResult);

impl fmt::Display for FailedEmbedding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.error().unwrap_or("embedding failed"))
    }
}

fn is_retryable(result: &EmbeddingResult) -> bool {
    !result.is_success() && result.error().is_some_and(is_transient_error)
}

/// Decorator that re-runs transiently failed embeds of any [`Embedder`].
pub struct RetryingEmbedder<E> {
    inner: E,
    policy: RetryPolicy,
}

impl<E: Embedder> RetryingEmbedder<E> {
    pub fn new(inner: E, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }
}

#[async_trait]
impl<E: Embedder> Embedder for RetryingEmbedder<E> {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        let outcome = self
            .policy
            .run(|| async move {
                let result = self.inner.embed_text(text).await;
                if result.is_success() {
                    Ok(result)
                } else {
                    Err(FailedEmbedding(result))
                }
            })
            .await;

        match outcome {
            Ok(result) | Err(FailedEmbedding(result)) => result,
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        let mut results = self.inner.embed_batch(texts).await;

        let mut attempt = 0;
        loop {
            let pending: Vec<usize> = results
                .iter()
                .enumerate()
                .filter(|(index, result)| *index < texts.len() && is_retryable(result))
                .map(|(index, _)| index)
                .collect();

            if pending.is_empty() || attempt >= self.policy.max_retries {
                return results;
            }

            let delay = self.policy.jittered_delay(attempt);
            warn!(
                "Retrying {} transiently failed texts in {:.2}s",
                pending.len(),
                delay.as_secs_f64()
            );
            tokio::time::sleep(delay).await;
            attempt += 1;

            let retry_texts: Vec<String> = pending.iter().map(|&i| texts[i].clone()).collect();
            let retried = self.inner.embed_batch(&retry_texts).await;
            for (index, result) in pending.into_iter().zip(retried) {
                results[index] = result;
            }
        }
    }

    fn max_tokens(&self) -> usize {
        self.inner.max_tokens()
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            supports_retry: true,
            ..self.inner.model_info()
        }
    }
}
