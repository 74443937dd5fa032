//! Voyage-compatible embedding provider.

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

/// Accepted values for Voyage's `input_type`.
const INPUT_TYPES: &[&str] = &["document", "query"];

/// Voyage models, limits and pricing.
pub static PROFILE: ProviderProfile = ProviderProfile {
    name: "voyage",
    default_base_url: "https://api.voyageai.com/v1",
    default_model: "voyage-3",
    models: &[
        ("voyage-3", ModelDescriptor::new(1024, 32000, 0.00006)),
        ("voyage-3-lite", ModelDescriptor::new(512, 32000, 0.00002)),
        ("voyage-code-3", ModelDescriptor::new(1024, 32000, 0.00018)),
        ("voyage-large-2", ModelDescriptor::new(1536, 16000, 0.00012)),
        ("voyage-code-2", ModelDescriptor::new(1536, 16000, 0.00012)),
    ],
    max_batch_size: 128,
    default_limits: RateLimits::new(300, 1_000_000),
};

/// A Voyage-backed [`ProviderEmbedder`].
pub type VoyageEmbedder = ProviderEmbedder<VoyageBackend>;

/// HTTP backend for Voyage-compatible `/embeddings` endpoints.
pub struct VoyageBackend {
    api_key: String,
    base_url: String,
    client: reqwest::Client,
    input_type: Option<String>,
}

impl VoyageBackend {
    /// Create a backend from provider configuration.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        if let Some(input_type) = config.input_type.as_deref() {
            if !INPUT_TYPES.contains(&input_type) {
                return Err(EmbeddingError::Config(format!(
                    "invalid voyage input_type '{input_type}', expected one of: {}",
                    INPUT_TYPES.join(", ")
                )));
            }
        }

        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| PROFILE.default_base_url.to_string()),
            client: build_client(config.timeout())?,
            input_type: config.input_type.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Serialize)]
struct VoyageRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'a str>,
}

#[async_trait]
impl EmbeddingBackend for VoyageBackend {
    async fn embed(&self, model: &str, inputs: &[String]) -> Result<BackendResponse> {
        debug!(
            "Requesting {} Voyage embeddings with model: {model}",
            inputs.len()
        );

        let body = VoyageRequest {
            model,
            input: inputs,
            input_type: self.input_type.as_deref(),
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

impl VoyageEmbedder {
    /// Create a validated Voyage embedder.
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let backend = VoyageBackend::new(config)?;
        ProviderEmbedder::from_backend(backend, &PROFILE, config)
    }
}
