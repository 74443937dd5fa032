//! Embedding providers.
//!
//! A provider is an [`EmbeddingBackend`] (one HTTP round trip: model plus
//! texts in, one vector per text plus token usage out) driven by
//! [`ProviderEmbedder`], which adds truncation, batch splitting, rate
//! limiting, retries and cost accounting on top of it.

mod http;
pub mod null;
pub mod openai;
pub mod voyage;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::Embedding;
use crate::config::ProviderConfig;
use crate::embedder::{Embedder, ModelInfo, estimate_tokens, truncate_text};
use crate::error::{EmbeddingError, Result};
use crate::rate_limit::{RateLimiter, RateLimits};
use crate::result::EmbeddingResult;
use crate::retry::RetryPolicy;

pub use null::NullEmbedder;
pub use openai::{OpenAiBackend, OpenAiEmbedder};
pub use voyage::{VoyageBackend, VoyageEmbedder};

/// Static facts about one model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelDescriptor {
    /// Length of the vectors the model produces.
    pub dimension: usize,

    /// Maximum input tokens.
    pub max_tokens: usize,

    /// Price per 1000 tokens.
    pub price_per_1k_tokens: f64,
}

impl ModelDescriptor {
    pub const fn new(dimension: usize, max_tokens: usize, price_per_1k_tokens: f64) -> Self {
        Self {
            dimension,
            max_tokens,
            price_per_1k_tokens,
        }
    }

    /// Cost of `tokens` tokens.
    pub fn cost(&self, tokens: usize) -> f64 {
        tokens as f64 * (self.price_per_1k_tokens / 1000.0)
    }
}

/// Static facts about one provider.
#[derive(Debug)]
pub struct ProviderProfile {
    /// Provider name.
    pub name: &'static str,

    /// API base URL used when none is configured.
    pub default_base_url: &'static str,

    /// Model used when none is configured.
    pub default_model: &'static str,

    /// Supported models.
    pub models: &'static [(&'static str, ModelDescriptor)],

    /// Largest number of inputs accepted in one request.
    pub max_batch_size: usize,

    /// Rate limits used when none are configured.
    pub default_limits: RateLimits,
}

impl ProviderProfile {
    /// Look up a model by name.
    pub fn model(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models
            .iter()
            .find(|(model, _)| *model == name)
            .map(|(_, descriptor)| descriptor)
    }

    /// Names of all supported models.
    pub fn model_names(&self) -> Vec<String> {
        self.models
            .iter()
            .map(|(model, _)| (*model).to_string())
            .collect()
    }
}

/// Response of one backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendResponse {
    /// One vector per input, in input order.
    pub embeddings: Vec<Embedding>,

    /// Total tokens reported by the provider, if any.
    pub total_tokens: Option<usize>,
}

/// A single round trip to an embedding API.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Embed `inputs` with `model` in one request.
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<BackendResponse>;
}

/// An [`Embedder`] backed by a remote provider.
pub struct ProviderEmbedder<B> {
    backend: B,
    profile: &'static ProviderProfile,
    model: String,
    descriptor: ModelDescriptor,
    retry: RetryPolicy,
    limiter: RateLimiter,
}

impl<B: EmbeddingBackend> ProviderEmbedder<B> {
    /// Validate `config` against `profile` and wrap `backend`.
    pub fn from_backend(
        backend: B,
        profile: &'static ProviderProfile,
        config: &ProviderConfig,
    ) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(EmbeddingError::MissingCredential {
                provider: profile.name.to_string(),
            });
        }

        let model = config
            .model
            .clone()
            .unwrap_or_else(|| profile.default_model.to_string());
        let descriptor =
            *profile
                .model(&model)
                .ok_or_else(|| EmbeddingError::UnknownModel {
                    provider: profile.name.to_string(),
                    model: model.clone(),
                    known: profile.model_names(),
                })?;

        let limits = config.rate_limits.unwrap_or(profile.default_limits);
        debug!(
            "Configured {} provider with model {model} ({} rpm, {} tpm)",
            profile.name, limits.requests_per_minute, limits.tokens_per_minute
        );

        Ok(Self {
            backend,
            profile,
            model,
            descriptor,
            retry: config.retry_policy(),
            limiter: RateLimiter::new(limits),
        })
    }

    /// Model in use.
    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    pub fn profile(&self) -> &'static ProviderProfile {
        self.profile
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Embed one sub-batch of non-empty, already truncated texts.
    async fn embed_chunk(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        let count = texts.len();
        let estimated: usize = texts.iter().map(|text| estimate_tokens(text)).sum();
        let start = Instant::now();

        let outcome = self
            .retry
            .run_with_floor(
                || async move {
                    let reservation = self.limiter.acquire(estimated).await;
                    let response = self
                        .backend
                        .embed(&self.model, texts)
                        .await
                        .and_then(|response| check_response_len(response, count));
                    let used = match &response {
                        Ok(response) => response.total_tokens.unwrap_or(estimated),
                        Err(_) => 0,
                    };
                    self.limiter.record(reservation, used).await;
                    response
                },
                EmbeddingError::retry_after,
            )
            .await;

        let elapsed = start.elapsed().as_secs_f64();
        let per_item_time = elapsed / count as f64;

        let response = match outcome {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    "{} request for {count} texts failed: {err}",
                    self.profile.name
                );
                let message = err.to_string();
                return texts
                    .iter()
                    .map(|text| {
                        EmbeddingResult::failure(text.as_str(), self.model.as_str(), message.as_str())
                            .with_processing_time(per_item_time)
                    })
                    .collect();
            }
        };

        let actual_tokens = response.total_tokens.unwrap_or(estimated);
        let per_item_cost = self.descriptor.cost(actual_tokens) / count as f64;
        let base_tokens = actual_tokens / count;
        let remainder = actual_tokens % count;

        texts
            .iter()
            .zip(response.embeddings)
            .enumerate()
            .map(|(index, (text, embedding))| {
                let tokens = base_tokens + usize::from(index < remainder);
                EmbeddingResult::success(
                    text.as_str(),
                    embedding,
                    self.model.as_str(),
                    tokens,
                    per_item_time,
                    per_item_cost,
                )
            })
            .collect()
    }
}

fn check_response_len(response: BackendResponse, expected: usize) -> Result<BackendResponse> {
    if response.embeddings.len() == expected {
        Ok(response)
    } else {
        Err(EmbeddingError::InvalidResponse(format!(
            "expected {expected} embeddings, got {}",
            response.embeddings.len()
        )))
    }
}

#[async_trait]
impl<B: EmbeddingBackend> Embedder for ProviderEmbedder<B> {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        self.embed_batch(&[text.to_string()])
            .await
            .into_iter()
            .next()
            .unwrap_or_else(|| EmbeddingResult::failure(text, self.model.as_str(), "no result computed"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        if texts.is_empty() {
            return Vec::new();
        }

        let prepared: Vec<String> = texts
            .iter()
            .map(|text| truncate_text(text, self.descriptor.max_tokens))
            .collect();

        let mut results: Vec<Option<EmbeddingResult>> = vec![None; prepared.len()];
        let mut pending = Vec::with_capacity(prepared.len());
        for (index, text) in prepared.iter().enumerate() {
            if text.is_empty() {
                results[index] = Some(EmbeddingResult::failure(
                    "",
                    self.model.as_str(),
                    "cannot embed empty text",
                ));
            } else {
                pending.push(index);
            }
        }

        let mut requests = 0;
        for chunk in pending.chunks(self.profile.max_batch_size.max(1)) {
            let chunk_texts: Vec<String> = chunk.iter().map(|&i| prepared[i].clone()).collect();
            let chunk_results = self.embed_chunk(&chunk_texts).await;
            for (&index, result) in chunk.iter().zip(chunk_results) {
                results[index] = Some(result);
            }
            requests += 1;
        }

        let results: Vec<EmbeddingResult> = results
            .into_iter()
            .zip(prepared)
            .map(|(result, text)| {
                result.unwrap_or_else(|| {
                    EmbeddingResult::failure(text, self.model.as_str(), "no result computed")
                })
            })
            .collect();

        let succeeded = results.iter().filter(|result| result.is_success()).count();
        info!(
            "Embedded {succeeded}/{} texts with {} in {requests} requests",
            results.len(),
            self.model
        );
        results
    }

    fn max_tokens(&self) -> usize {
        self.descriptor.max_tokens
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.profile.name.to_string(),
            model: self.model.clone(),
            dimension: self.descriptor.dimension,
            max_tokens: self.descriptor.max_tokens,
            price_per_1k_tokens: self.descriptor.price_per_1k_tokens,
            supports_batch: true,
            supports_retry: true,
            max_batch_size: self.profile.max_batch_size,
            rate_limits: Some(self.limiter.limits()),
            cache: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static TEST_PROFILE: ProviderProfile = ProviderProfile {
        name: "test",
        default_base_url: "http://localhost",
        default_model: "small",
        models: &[
            ("small", ModelDescriptor::new(3, 8, 0.02)),
            ("large", ModelDescriptor::new(6, 8, 0.1)),
        ],
        max_batch_size: 2,
        default_limits: RateLimits::new(1000, 1_000_000),
    };

    /// Reports 10 tokens per input and fails requests containing "fail".
    #[derive(Default)]
    struct ScriptedBackend {
        calls: AtomicUsize,
        batches: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl EmbeddingBackend for ScriptedBackend {
        async fn embed(&self, _model: &str, inputs: &[String]) -> Result<BackendResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.batches
                .lock()
                .unwrap()
                .push(inputs.to_vec());
            if inputs.iter().any(|input| input.contains("fail")) {
                return Err(EmbeddingError::ApiRequest {
                    status: 400,
                    message: "bad input".to_string(),
                });
            }
            Ok(BackendResponse {
                embeddings: inputs
                    .iter()
                    .map(|input| vec![input.len() as f32, 0.0, 1.0])
                    .collect(),
                total_tokens: Some(10 * inputs.len() + 1),
            })
        }
    }

    fn embedder() -> ProviderEmbedder<ScriptedBackend> {
        ProviderEmbedder::from_backend(
            ScriptedBackend::default(),
            &TEST_PROFILE,
            &ProviderConfig::new("key"),
        )
        .unwrap()
    }

    fn strings(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|text| (*text).to_string()).collect()
    }

    #[test]
    fn test_rejects_missing_key() {
        let result = ProviderEmbedder::from_backend(
            ScriptedBackend::default(),
            &TEST_PROFILE,
            &ProviderConfig::new("  "),
        );
        assert!(matches!(result, Err(EmbeddingError::MissingCredential { .. })));
    }

    #[test]
    fn test_rejects_unknown_model() {
        let result = ProviderEmbedder::from_backend(
            ScriptedBackend::default(),
            &TEST_PROFILE,
            &ProviderConfig::new("key").with_model("huge"),
        );
        let Err(err) = result else {
            panic!("expected an error");
        };
        assert_eq!(
            err.to_string(),
            "unknown model 'huge' for provider 'test', known models: small, large"
        );
    }

    #[tokio::test]
    async fn test_batch_split_and_distribution() {
        let embedder = embedder();
        let texts = strings(&["a", "bb", "ccc"]);
        let results = embedder.embed_batch(&texts).await;

        assert_eq!(results.len(), 3);
        assert_eq!(embedder.backend().calls.load(Ordering::SeqCst), 2);
        assert_eq!(
            *embedder.backend().batches.lock().unwrap(),
            vec![strings(&["a", "bb"]), strings(&["ccc"])]
        );

        // First chunk reports 21 tokens over two texts.
        assert_eq!(results[0].token_count(), 11);
        assert_eq!(results[1].token_count(), 10);
        assert!((results[0].cost_estimate() - 21.0 * 0.02 / 1000.0 / 2.0).abs() < 1e-12);
        assert_eq!(results[2].token_count(), 11);
        assert_eq!(results[2].embedding(), &[3.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_failed_chunk_keeps_other_chunks() {
        let embedder = embedder();
        let texts = strings(&["ok", "fine", "fail", "also"]);
        let results = embedder.embed_batch(&texts).await;

        assert_eq!(results.len(), 4);
        assert!(results[0].is_success());
        assert!(results[1].is_success());
        assert!(!results[2].is_success());
        assert!(!results[3].is_success());
        assert_eq!(
            results[3].error(),
            Some("API request failed with status 400: bad input")
        );
        // Permanent errors are not retried.
        assert_eq!(embedder.backend().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_ledger_holds_reported_tokens() {
        let embedder = embedder();
        let results = embedder.embed_batch(&strings(&["a", "bb"])).await;
        assert!(results.iter().all(EmbeddingResult::is_success));

        // Estimated at 2 tokens, reported as 21.
        assert_eq!(embedder.rate_limiter().usage().await, (1, 21));
    }

    #[tokio::test]
    async fn test_failed_attempt_records_zero_tokens() {
        let embedder = embedder();
        let result = embedder.embed_text("fail now").await;
        assert!(!result.is_success());

        assert_eq!(embedder.rate_limiter().usage().await, (1, 0));
    }

    #[tokio::test]
    async fn test_empty_text_skips_provider() {
        let embedder = embedder();
        let results = embedder.embed_batch(&strings(&["", "x"])).await;

        assert!(!results[0].is_success());
        assert!(results[1].is_success());
        assert_eq!(
            *embedder.backend().batches.lock().unwrap(),
            vec![strings(&["x"])]
        );
    }

    #[tokio::test]
    async fn test_truncates_before_sending() {
        let embedder = embedder();
        let long = "word ".repeat(40);
        let result = embedder.embed_text(&long).await;

        assert!(result.text().len() <= 32);
        assert_eq!(result.text(), truncate_text(&long, 8));
    }

    #[tokio::test]
    async fn test_single_matches_batch_of_one() {
        let embedder = embedder();
        let single = embedder.embed_text("hello").await;
        let batch = embedder.embed_batch(&strings(&["hello"])).await;

        assert_eq!(single.embedding(), batch[0].embedding());
        assert_eq!(single.token_count(), batch[0].token_count());
        assert_eq!(single.cost_estimate(), batch[0].cost_estimate());
        assert_eq!(single.text(), batch[0].text());
    }

    #[test]
    fn test_model_info() {
        let info = embedder().model_info();
        assert_eq!(info.provider, "test");
        assert_eq!(info.model, "small");
        assert_eq!(info.dimension, 3);
        assert_eq!(info.max_batch_size, 2);
        assert!(info.supports_batch);
    }
}
