//! Ollama generation client
//!
//! Calls the Ollama /api/generate endpoint with streaming disabled.
//! No API key required; works against any self-hosted Ollama deployment.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{GenerationClient, GenerationError};

// --- HTTP request/response structs ---

#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Ollama-backed generation client.
pub struct OllamaGenerationClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl OllamaGenerationClient {
    /// # Arguments
    /// * `base_url` - Ollama server base URL (e.g., "http://localhost:11434")
    /// * `model` - Model name (e.g., "llama3.2:3b")
    /// * `max_tokens` - Upper bound on generated tokens (num_predict)
    pub fn new(base_url: String, model: String, max_tokens: u32) -> Self {
        OllamaGenerationClient {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            max_tokens,
        }
    }
}

#[async_trait]
impl GenerationClient for OllamaGenerationClient {
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let request = OllamaGenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: OllamaOptions {
                temperature,
                num_predict: self.max_tokens,
            },
        };

        let url = format!("{}/api/generate", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::Generation(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(GenerationError::Api {
                status,
                message: body,
            });
        }

        let generated: OllamaGenerateResponse = response.json().await.map_err(|e| {
            GenerationError::Generation(format!("Failed to parse Ollama response: {}", e))
        })?;

        Ok(generated.response)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
