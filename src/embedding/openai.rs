//! OpenAI-compatible embedding client
//!
//! Calls any OpenAI-compatible Embeddings API using reqwest.
//! Requires an API key; validated on construction, not at embed time.

use async_trait::async_trait;

use super::{Embedding, EmbeddingClient, EmbeddingError};

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

#[derive(serde::Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

pub struct OpenAIEmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dim: usize,
}

impl OpenAIEmbeddingClient {
    /// # Errors
    /// Returns `EmbeddingError::NotConfigured` if api_key is empty.
    pub fn new(
        base_url: String,
        api_key: String,
        model: String,
        dim: usize,
    ) -> Result<Self, EmbeddingError> {
        if api_key.trim().is_empty() {
            return Err(EmbeddingError::NotConfigured(
                "OpenAI API key is required when using the openai embedding provider. \
                 Set EVIDENCE_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in evidence.toml"
                    .to_string(),
            ));
        }

        Ok(OpenAIEmbeddingClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dim,
        })
    }
}

#[async_trait]
impl EmbeddingClient for OpenAIEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
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

        let embed_response: EmbedResponse = response.json().await.map_err(|e| {
            EmbeddingError::Generation(format!("Failed to parse API response: {}", e))
        })?;

        let vector = embed_response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| {
                EmbeddingError::Generation("API returned empty embedding list".to_string())
            })?;

        Embedding::new(vector)?.expect_dimension(self.dim)
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
    fn test_blank_api_key_rejected() {
        let result = OpenAIEmbeddingClient::new(
            "https://api.openai.com/v1".to_string(),
            "   ".to_string(),
            "text-embedding-3-small".to_string(),
            1536,
        );
        assert!(matches!(result, Err(EmbeddingError::NotConfigured(_))));
    }
}
