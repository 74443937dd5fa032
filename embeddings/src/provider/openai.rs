//! OpenAI-compatible embedding provider.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::{EmbeddingError, Result};
use crate::provider::http::{build_client, embeddings_url, post_embeddings};
use crate::provider::{
    BackendResponse, EmbeddingBackend, ModelDescriptor, ProviderEmbedder, ProviderProfile,
};
use crate::rate_limit::RateLimits;

/// OpenAI models, limits and pricing.
pub static PROFILE: ProviderProfile = ProviderProfile {
    name: "openai",
    default_base_url: "https://api.openai.com/v1",
    default_model: "text-embedding-3-small",
    models: &[
        ("text-embedding-3-small", ModelDescriptor::new(1536, 8191, 0.00002)),
        ("text-embedding-3-large", ModelDescriptor::new(3072, 8191, 0.00013)),
        ("text-embedding-ada-002", ModelDescriptor::new(1536, 8191, 0.0001)),
    ],
    max_batch_size: 2048,
    default_limits: RateLimits::new(3000, 1_000_000),
};

/// An OpenAI-backed [`ProviderEmbedder`].
pub type OpenAiEmbedder = ProviderEmbedder<OpenAiBackend>;

/// HTTP backend for OpenAI-compatible `/embeddings` endpoints.
pub struct OpenAiBackend {
    /// API key.
    api_key: String,

    /// API base URL.
    base_url: String,

    /// HTTP client.
    client: reqwest::Client,

    /// Output dimensions (if supported by the model).
    dimensions: Option<usize>,
}

impl OpenAiBackend {
    /// Create a backend from provider configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| PROFILE.default_base_url.to_string()),
            client: build_client(config.timeout())?,
            dimensions: config.dimensions,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[async_trait]
impl EmbeddingBackend for OpenAiBackend {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<BackendResponse> {
        debug!(
            "Requesting {} OpenAI embeddings with model: {model}",
            inputs.len()
        );

        let body = OpenAiRequest {
            model,
            input: inputs,
            encoding_format: "float",
            dimensions: self.dimensions,
        };
        post_embeddings(
            &self.client,
            &embeddings_url(&self.base_url),
            &self.api_key,
            &body,
        )
        .await
    }
}

impl OpenAiEmbedder {
    /// Create a validated OpenAI embedder.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let backend = OpenAiBackend::new(config)?;
        let mut embedder = ProviderEmbedder::from_backend(backend, &PROFILE, config)?;

        if let Some(dimensions) = config.dimensions {
            if !embedder.model.starts_with("text-embedding-3") {
                return Err(EmbeddingError::Config(format!(
                    "model '{}' does not support custom dimensions",
                    embedder.model
                )));
            }
            if dimensions == 0 || dimensions > embedder.descriptor.dimension {
                return Err(EmbeddingError::Config(format!(
                    "dimensions must be between 1 and {}, got {dimensions}",
                    embedder.descriptor.dimension
                )));
            }
            embedder.descriptor.dimension = dimensions;
        }

        Ok(embedder)
    }
}
