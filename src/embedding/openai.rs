/// OpenAI-compatible embedding provider
///
/// Calls an OpenAI-style Embeddings API using reqwest.
/// Supports text-embedding-3-small (1536 dimensions) by default; base_url is
/// configurable so any compatible endpoint works.
/// Requires MAILRANK_EMBEDDING__OPENAI_API_KEY env var or openai_api_key in config.

use async_trait::async_trait;

use super::{EmbeddingError, Embedder};

/// Request body for the Embeddings API
#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    input: &'a str,
    model: &'a str,
}

/// Response from the Embeddings API
#[derive(serde::Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

/// Single embedding result
#[derive(serde::Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

/// OpenAI-backed embedding provider.
///
/// The API key is checked on construction, not at embed time.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAIEmbedder.
    ///
    /// # Arguments
    /// * `base_url` - API base URL (e.g., "https://api.openai.com/v1")
    /// * `api_key` - API key (must be non-empty)
    /// * `model` - Embedding model name
    ///
    /// # Errors
    /// Returns `EmbeddingError::NotConfigured` if api_key is empty.
    pub fn new(base_url: String, api_key: String, model: String) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "OpenAI API key is required when using the openai embedding provider. \
                 Set MAILRANK_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in mailrank.toml"
                    .to_string(),
            ));
        }

        let dim = known_dimension(&model);
        Ok(OpenAIEmbedder {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dim,
        })
    }
}

fn known_dimension(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let request = EmbedRequest {
            input: text,
            model: &self.model,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(EmbeddingError::Api {
                status,
                message: body,
            });
        }

        let embed_response: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Generation(format!("Failed to parse API response: {}", e)))?;

        embed_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbeddingError::Generation("API returned empty embedding list".to_string()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_api_key_is_rejected() {
        let result = OpenAIEmbedder::new(
            "https://api.openai.com/v1".into(),
            "   ".into(),
            "text-embedding-3-small".into(),
        );
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }

    #[test]
    fn test_dimension_follows_model() {
        let small = OpenAIEmbedder::new("http://x/".into(), "k".into(), "text-embedding-3-small".into()).unwrap();
        let large = OpenAIEmbedder::new("http://x".into(), "k".into(), "text-embedding-3-large".into()).unwrap();
        assert_eq!(small.dimension(), 1536);
        assert_eq!(large.dimension(), 3072);
        assert_eq!(small.base_url, "http://x");
    }
}
