//! The outcome of a single embed operation.

use serde::{Deserialize, Serialize};

use crate::Embedding;

/// One embedding outcome, successful or not, with cost and latency metadata.
///
/// Results are immutable once built. Layers that need a different result
/// construct a new one instead of editing an existing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingResult {
    text: String,
    embedding: Embedding,
    model: String,
    token_count: usize,
    processing_time: f64,
    cost_estimate: f64,
    error: Option<String>,
}

impl EmbeddingResult {
    /// Build a successful result.
    ///
    /// An empty vector is never a success, so it is recorded as a failure.
    pub fn success(
        text: impl Into<String>,
        embedding: Embedding,
        model: impl Into<String>,
        token_count: usize,
        processing_time: f64,
        cost_estimate: f64,
    ) -> Self {
        let error = embedding
            .is_empty()
            .then(|| "provider returned an empty embedding".to_string());
        Self {
            text: text.into(),
            embedding,
            model: model.into(),
            token_count,
            processing_time: processing_time.max(0.0),
            cost_estimate: cost_estimate.max(0.0),
            error,
        }
    }

    /// Build a failed result carrying the error description.
    pub fn failure(
        text: impl Into<String>,
        model: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            text: text.into(),
            embedding: Vec::new(),
            model: model.into(),
            token_count: 0,
            processing_time: 0.0,
            cost_estimate: 0.0,
            error: Some(error.into()),
        }
    }

    /// Record how long the failed attempt took.
    pub fn with_processing_time(self, processing_time: f64) -> Self {
        Self {
            processing_time: processing_time.max(0.0),
            ..self
        }
    }

    /// The input text, after truncation.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    pub fn into_embedding(self) -> Embedding {
        self.embedding
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Provider-reported tokens when available, otherwise the estimate.
    pub fn token_count(&self) -> usize {
        self.token_count
    }

    /// Wall-clock seconds spent producing this result.
    pub fn processing_time(&self) -> f64 {
        self.processing_time
    }

    pub fn cost_estimate(&self) -> f64 {
        self.cost_estimate
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// True when there is no error and the embedding is non-empty.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && !self.embedding.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.embedding.len()
    }
}
