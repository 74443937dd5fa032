//! No-op embedder for flows that need the interface but no network calls.

use async_trait::async_trait;
use tracing::debug;

use crate::DEFAULT_DIMENSION;
use crate::embedder::{Embedder, ModelInfo, estimate_tokens};
use crate::result::EmbeddingResult;

const NULL_MODEL: &str = "null";

/// Returns zero vectors of a fixed dimension. Never fails and never costs.
#[derive(Debug, Clone)]
pub struct NullEmbedder {
    dimension: usize,
}

impl NullEmbedder {
    /// Create a null embedder producing vectors of `dimension` (at least 1).
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn zero_result(&self, text: &str) -> EmbeddingResult {
        EmbeddingResult::success(
            text,
            vec![0.0; self.dimension],
            NULL_MODEL,
            estimate_tokens(text),
            0.0,
            0.0,
        )
    }
}

impl Default for NullEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_DIMENSION)
    }
}

#[async_trait]
impl Embedder for NullEmbedder {
    async fn embed_text(&self, text: &str) -> EmbeddingResult {
        self.zero_result(text)
    }

    async fn embed_batch(&self, texts: &[String]) -> Vec<EmbeddingResult> {
        debug!("Null embedder returning {} zero vectors", texts.len());
        texts.iter().map(|text| self.zero_result(text)).collect()
    }

    fn max_tokens(&self) -> usize {
        usize::MAX / crate::embedder::CHARS_PER_TOKEN
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: NULL_MODEL.to_string(),
            model: NULL_MODEL.to_string(),
            dimension: self.dimension,
            max_tokens: self.max_tokens(),
            price_per_1k_tokens: 0.0,
            supports_batch: true,
            supports_retry: false,
            max_batch_size: usize::MAX,
            rate_limits: None,
            cache: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_zero_vectors() {
        let embedder = NullEmbedder::new(4);
        let result = tokio_test::block_on(embedder.embed_text("anything"));

        assert!(result.is_success());
        assert_eq!(result.embedding(), &[0.0; 4]);
        assert_eq!(result.cost_estimate(), 0.0);
        assert_eq!(result.token_count(), 2);
    }

    #[tokio::test]
    async fn test_batch_and_empty_input() {
        let embedder = NullEmbedder::default();
        let texts = vec![String::new(), "x".to_string()];
        let results = embedder.embed_batch(&texts).await;

        assert_eq!(results.len(), 2);
        assert!(results.iter().all(EmbeddingResult::is_success));
        assert_eq!(results[0].dimension(), DEFAULT_DIMENSION);
        assert_eq!(embedder.model_info().dimension, DEFAULT_DIMENSION);
    }

    #[test]
    fn test_model_info_map() {
        let map = NullEmbedder::new(4).model_info().to_map();
        assert_eq!(map["provider"], serde_json::json!("null"));
        assert_eq!(map["dimension"], serde_json::json!(4));
        assert!(!map.contains_key("cache"));
    }
}
