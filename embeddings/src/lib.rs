//! # Embeddings
//!
//! This crate turns text into vector embeddings through remote providers
//! while shielding callers from transient failures, provider rate limits
//! and redundant computation.
//!
//! ## Features
//!
//! - **Provider-agnostic interface**: every provider and decorator implements [`Embedder`]
//! - **Retries**: exponential backoff with jitter for transient errors
//! - **Rate limiting**: per-provider sliding-window request and token ceilings
//! - **Caching**: content-addressed results with bulk FIFO eviction
//! - **Multiple Providers**: OpenAI-compatible, Voyage-compatible and a no-op embedder
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embedding Pipeline                           │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  caller ──► CachedEmbedder ──► ProviderEmbedder                 │
//! │                                   │                             │
//! │                                   ▼                             │
//! │                 RetryPolicy ──► RateLimiter ──► Backend (HTTP)  │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Provider faults never escape as errors: they come back as failed
//! [`EmbeddingResult`]s. Only construction (bad credential, unknown model or
//! provider) returns [`EmbeddingError`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use embedkit_embeddings::{EmbeddingConfig, ProviderConfig, create_embedder};
//!
//! let config = EmbeddingConfig::new("openai", ProviderConfig::new(api_key));
//! let embedder = create_embedder(&config)?;
//! let result = embedder.embed_text("hello world").await;
//! if result.is_success() {
//!     store(result.embedding());
//! }
//! ```

pub mod cache;
pub mod config;
pub mod embedder;
pub mod error;
pub mod provider;
pub mod rate_limit;
pub mod registry;
pub mod result;
pub mod retry;

pub use cache::{CacheStats, CachedEmbedder};
pub use config::{CacheConfig, EmbeddingConfig, ProviderConfig};
pub use embedder::{Embedder, ModelInfo, estimate_tokens, truncate_text};
pub use error::{EmbeddingError, Result, is_transient_error};
pub use provider::{
    BackendResponse, EmbeddingBackend, ModelDescriptor, NullEmbedder, OpenAiEmbedder,
    ProviderEmbedder, ProviderProfile, VoyageEmbedder,
};
pub use rate_limit::{RateLimitedEmbedder, RateLimiter, RateLimits, Reservation};
pub use registry::{EmbedderRegistry, create_embedder};
pub use result::EmbeddingResult;
pub use retry::{RetryPolicy, RetryingEmbedder};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings (varies by model).
pub const DEFAULT_DIMENSION: usize = 1536; // OpenAI text-embedding-3-small
