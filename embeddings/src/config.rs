//! Configuration for embedding providers and the cache layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_MAX_CACHE_SIZE;
use crate::rate_limit::RateLimits;
use crate::retry::RetryPolicy;

/// Configuration for a single embedding provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API key. Only checked for being non-empty, since custom endpoints
    /// may use arbitrary formats.
    pub api_key: String,

    /// Model to use; must be in the provider's model table.
    pub model: Option<String>,

    /// Alternate API base URL.
    pub base_url: Option<String>,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Delay before the first retry, in seconds.
    pub base_delay_secs: f64,

    /// Upper bound on a single retry delay, in seconds.
    pub max_delay_secs: f64,

    /// Growth factor between retry delays.
    pub backoff_factor: f64,

    /// Per-request HTTP timeout, in seconds.
    pub timeout_secs: f64,

    /// Override the provider's default rate limits.
    pub rate_limits: Option<RateLimits>,

    /// Requested output dimensions (OpenAI `text-embedding-3-*` only).
    pub dimensions: Option<usize>,

    /// Voyage `input_type` (`document` or `query`).
    pub input_type: Option<String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: None,
            base_url: None,
            max_retries: 3,
            base_delay_secs: 1.0,
            max_delay_secs: 60.0,
            backoff_factor: 2.0,
            timeout_secs: 30.0,
            rate_limits: None,
            dimensions: None,
            input_type: None,
        }
    }
}

impl ProviderConfig {
    /// Create a configuration with the given API key and default values.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Self::default()
        }
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the base URL.
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay_secs = base_delay.as_secs_f64();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_rate_limits(mut self, limits: RateLimits) -> Self {
        self.rate_limits = Some(limits);
        self
    }

    /// Set the output dimensions.
    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }

    pub fn with_input_type(mut self, input_type: impl Into<String>) -> Self {
        self.input_type = Some(input_type.into());
        self
    }

    /// Retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: secs_or(self.base_delay_secs, defaults.base_delay),
            max_delay: secs_or(self.max_delay_secs, defaults.max_delay),
            backoff_factor: self.backoff_factor,
        }
    }

    /// HTTP timeout for a single request.
    pub fn timeout(&self) -> Duration {
        secs_or(self.timeout_secs, Duration::from_secs(30))
    }
}

fn secs_or(secs: f64, fallback: Duration) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(fallback)
}

/// Configuration for the result cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Whether to cache embeddings.
    pub enabled: bool,

    /// Maximum cache size.
    pub max_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
        }
    }
}

/// Everything needed to build a fully decorated embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Registered provider name (`openai`, `voyage`, `null`).
    pub provider: String,

    /// Provider settings.
    #[serde(flatten)]
    pub provider_config: ProviderConfig,

    /// Cache settings.
    pub cache: CacheConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            provider_config: ProviderConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Create a configuration for the named provider.
    pub fn new(provider: impl Into<String>, provider_config: ProviderConfig) -> Self {
        Self {
            provider: provider.into(),
            provider_config,
            cache: CacheConfig::default(),
        }
    }

    /// Set the cache configuration.
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Disable the result cache.
    pub fn without_cache(mut self) -> Self {
        self.cache.enabled = false;
        self
    }
}
