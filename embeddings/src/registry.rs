//! Provider registry for building fully decorated embedders.
//!
//! The registry maps provider names to constructors and wraps the result in
//! a [`CachedEmbedder`] when caching is enabled.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::DEFAULT_DIMENSION;
use crate::cache::CachedEmbedder;
use crate::config::{EmbeddingConfig, ProviderConfig};
use crate::embedder::Embedder;
use crate::error::{EmbeddingError, Result};
use crate::provider::{NullEmbedder, OpenAiEmbedder, VoyageEmbedder};

/// Builds an embedder from provider configuration.
pub type EmbedderConstructor = fn(&ProviderConfig) -> Result<Arc<dyn Embedder>>;

/// Runtime registry of embedding providers.
#[derive(Clone)]
pub struct EmbedderRegistry {
    constructors: BTreeMap<String, EmbedderConstructor>,
}

impl EmbedderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    /// Create a registry with the built-in providers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("openai", build_openai);
        registry.register("voyage", build_voyage);
        registry.register("null", build_null);
        registry
    }

    /// Register (or replace) a provider constructor.
    pub fn register(&mut self, name: impl Into<String>, constructor: EmbedderConstructor) {
        self.constructors.insert(name.into(), constructor);
    }

    /// Names of all registered providers, sorted.
    pub fn providers(&self) -> Vec<String> {
        self.constructors.keys().cloned().collect()
    }

    /// Build the named provider without any cache.
    pub fn create(&self, name: &str, config: &ProviderConfig) -> Result<Arc<dyn Embedder>> {
        let constructor =
            self.constructors
                .get(name)
                .ok_or_else(|| EmbeddingError::UnknownProvider {
                    name: name.to_string(),
                    known: self.providers(),
                })?;
        constructor(config)
    }

    /// Build the configured provider, wrapped in a cache when enabled.
    pub fn build(&self, config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
        let embedder = self.create(&config.provider, &config.provider_config)?;
        let info = embedder.model_info();

        if config.cache.enabled {
            info!(
                "Created {} embedder ({}) with cache of {} entries",
                info.provider, info.model, config.cache.max_cache_size
            );
            Ok(Arc::new(CachedEmbedder::new(
                embedder,
                config.cache.max_cache_size,
            )))
        } else {
            info!("Created {} embedder ({})", info.provider, info.model);
            Ok(embedder)
        }
    }
}

impl Default for EmbedderRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Build an embedder using the built-in providers.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    EmbedderRegistry::with_defaults().build(config)
}

fn build_openai(config: &ProviderConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(OpenAiEmbedder::new(config)?))
}

fn build_voyage(config: &ProviderConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(VoyageEmbedder::new(config)?))
}

fn build_null(config: &ProviderConfig) -> Result<Arc<dyn Embedder>> {
    Ok(Arc::new(NullEmbedder::new(
        config.dimensions.unwrap_or(DEFAULT_DIMENSION),
    )))
}
