//! Error types for the embeddings system.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Substrings that mark an error message as worth retrying.
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "timeout",
    "timed out",
    "connection",
    "temporary",
    "429",
    "502",
    "503",
];

/// Errors that can occur in the embeddings system.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// No credential was supplied for a provider that needs one.
    #[error("missing API key for provider '{provider}'")]
    MissingCredential { provider: String },

    /// Model name is not in the provider's model table.
    #[error("unknown model '{model}' for provider '{provider}', known models: {}", known.join(", "))]
    UnknownModel {
        provider: String,
        model: String,
        known: Vec<String>,
    },

    /// Provider name is not registered.
    #[error("unknown embedding provider '{name}', known providers: {}", known.join(", "))]
    UnknownProvider { name: String, known: Vec<String> },

    /// Any other invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded (HTTP 429), retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Request did not finish in time.
    #[error("request timeout: {0}")]
    Timeout(String),

    /// Could not reach the provider.
    #[error("connection error: {0}")]
    Connection(String),

    /// Provider answered with a non-success status.
    #[error("API request failed with status {status}: {message}")]
    ApiRequest { status: u16, message: String },

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(reqwest::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EmbeddingError {
    /// Whether a retry has a reasonable chance of succeeding.
    pub fn is_transient(&self) -> bool {
        is_transient_error(&self.to_string())
    }

    /// Minimum wait the provider asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            EmbeddingError::RateLimited { retry_after_secs } => {
                Some(Duration::from_secs(*retry_after_secs))
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for EmbeddingError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EmbeddingError::Timeout(err.to_string())
        } else if err.is_connect() {
            EmbeddingError::Connection(err.to_string())
        } else if err.is_decode() {
            EmbeddingError::InvalidResponse(err.to_string())
        } else {
            EmbeddingError::Http(err)
        }
    }
}

/// Classify an error message as transient by case-insensitive substring match.
pub fn is_transient_error(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
}
