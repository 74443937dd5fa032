//! The capability contract shared by providers and decorators.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::rate_limit::RateLimits;
use crate::result::EmbeddingResult;

/// Rough characters-per-token ratio used wherever no tokenizer is available.
pub const CHARS_PER_TOKEN: usize = 4;

/// Appended to text that had to be cut.
pub const TRUNCATION_MARKER: &str = "...";

/// A word boundary is only used if it keeps at least this share of the budget.
const WORD_BOUNDARY_MIN_RATIO: f64 = 0.8;

/// Converts text into embedding vectors.
///
/// Implementations never surface provider faults as errors: a failed embed
/// comes back as an [`EmbeddingResult`] with its error set.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text.
    async fn embed_text(&self, text: &str) -> EmbeddingResult;

    /// Embed many texts. The output is positionally aligned with `texts`.
    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult>;

    /// Maximum input size in tokens.
    fn max_tokens(&self) -> usize;

    /// Describe the provider and model behind this embedder.
    fn model_info(&self) -> ModelInfo;

    /// Fit `text` into `max_tokens` (defaults to [`Embedder::max_tokens`]).
    fn truncate_text(&self, text: &str, max_tokens: Option<usize>) -> String {
        truncate_text(text, max_tokens.unwrap_or_else(|| self.max_tokens()))
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Arc<E> {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        (**self).embed_text(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        (**self).embed_batch(texts).await
    }

    fn max_tokens(&self) -> usize {
        (**self).max_tokens()
    }

    fn model_info(&self) -> ModelInfo {
        (**self).model_info()
    }
}

#[async_trait]
impl<E: Embedder + ?Sized> Embedder for Box<E> {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        (**self).embed_text(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        (**self).embed_batch(texts).await
    }

    fn max_tokens(&self) -> usize {
        (**self).max_tokens()
    }

    fn model_info(&self) -> ModelInfo {
        (**self).model_info()
    }
}

/// Metadata describing an embedder, e.g. for sizing a vector collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Provider name (`openai`, `voyage`, ...).
    pub provider: String,

    /// Model identifier.
    pub model: String,

    /// Length of the vectors this model produces.
    pub dimension: usize,

    /// Maximum input tokens.
    pub max_tokens: usize,

    /// Price per 1000 tokens.
    pub price_per_1k_tokens: f64,

    pub supports_batch: bool,

    pub supports_retry: bool,

    /// Largest number of texts sent in one request.
    pub max_batch_size: usize,

    /// Rate-limit ceilings, when the embedder enforces any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limits: Option<RateLimits>,

    /// Cache statistics, when wrapped by a cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
}

impl ModelInfo {
    /// Key/value view of this info.
    pub fn to_map(&self) -> serde_json::Map<String, serde_json::Value> {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        }
    }
}

/// Estimate token usage with the characters-per-token heuristic.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        0
    } else {
        (text.len() / CHARS_PER_TOKEN).max(1)
    }
}

/// Fit text into a token budget without calling any provider.
///
/// Text that already fits is returned unchanged. Longer text is cut so that
/// the result, marker included, stays within the budget. The cut moves back to
/// the previous whitespace when that loses less than a fifth of the budget.
pub fn truncate_text(text: &str, max_tokens: usize) -> String {
    let budget = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if text.len() <= budget {
        return text.to_string();
    }

    let mut cut = floor_char_boundary(text, budget.saturating_sub(TRUNCATION_MARKER.len()));
    let min_cut = budget as f64 * WORD_BOUNDARY_MIN_RATIO;
    if let Some(space) = text[..cut]
        .rfind(char::is_whitespace)
        .filter(|&space| space as f64 >= min_cut)
    {
        cut = space;
    }

    let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
    truncated.push_str(&text[..cut]);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    (0..=index)
        .rev()
        .find(|&i| text.is_char_boundary(i))
        .unwrap_or(0)
}
