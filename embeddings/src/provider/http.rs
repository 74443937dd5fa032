//! Shared HTTP plumbing for OpenAI-style `/embeddings` endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::provider::BackendResponse;

/// Retry-after used when a 429 response carries no usable header.
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Build an HTTP client with the given per-request timeout.
pub(crate) fn build_client(timeout: Duration) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|err| EmbeddingError::Config(format!("failed to build HTTP client: {err}")))
}

/// Join a base URL and the embeddings path.
pub(crate) fn embeddings_url(base_url: &str) -> String {
    format!("{}/embeddings", base_url.trim_end_matches('/'))
}

/// POST `body` to `url` with bearer auth and decode the embeddings response.
pub(crate) async fn post_embeddings<T: Serialize + ?Sized>(
    client: &reqwest::Client,
    url: &str,
    api_key: &str,
    body: &T,
) -> Result<BackendResponse> {
    let response = client
        .post(url)
        .bearer_auth(api_key)
        .json(body)
        .send()
        .await?;

    let status = response.status();
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);

        return Err(EmbeddingError::RateLimited {
            retry_after_secs: retry_after,
        });
    }

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(EmbeddingError::ApiRequest {
            status: status.as_u16(),
            message: error_message(&error_text),
        });
    }

    let result: EmbeddingsResponse = response.json().await?;
    debug!(
        "Received {} embeddings from {}",
        result.data.len(),
        result.model.as_deref().unwrap_or("unknown model")
    );
    Ok(result.into_backend_response())
}

/// Pull `error.message` out of a JSON error body, falling back to the raw text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ErrorResponse>(body)
        .map(|parsed| parsed.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

/// `/embeddings` response format shared by OpenAI and Voyage.
#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
    model: Option<String>,
    usage: Option<Usage>,
}

impl EmbeddingsResponse {
    fn into_backend_response(mut self) -> BackendResponse {
        self.data.sort_by_key(|item| item.index);
        BackendResponse {
            embeddings: self.data.into_iter().map(|item| item.embedding).collect(),
            total_tokens: self.usage.map(|usage| usage.total_tokens),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Embedding,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_response_reordered_by_index() {
        let response: EmbeddingsResponse = serde_json::from_str(
            r#"{
                "data": [
                    {"embedding": [2.0], "index": 1},
                    {"embedding": [1.0], "index": 0}
                ],
                "model": "m",
                "usage": {"prompt_tokens": 4, "total_tokens": 4}
            }"#,
        )
        .unwrap();

        assert_eq!(
            response.into_backend_response(),
            BackendResponse {
                embeddings: vec![vec![1.0], vec![2.0]],
                total_tokens: Some(4),
            }
        );
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"error": {"message": "Invalid API key", "type": "auth"}}"#),
            "Invalid API key"
        );
        assert_eq!(error_message(" plain failure \n"), "plain failure");
    }

    #[test]
    fn test_embeddings_url() {
        assert_eq!(
            embeddings_url("https://api.openai.com/v1/"),
            "https://api.openai.com/v1/embeddings"
        );
    }
}
