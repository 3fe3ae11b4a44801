//! Generation client trait and supporting types
//!
//! Provides a pluggable interface for LLM text generation, used to write
//! hypothetical documents for HyDE retrieval.
//! Supports Ollama (local, default, no API key) and OpenAI-compatible APIs.

pub mod hyde;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::errors::EvidenceError;

/// Errors that can occur during text generation.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Inference, transport or response parse failure
    #[error("Generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key or model)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Model answered, but nothing usable was left after cleaning
    #[error("Malformed output: {0}")]
    Malformed(String),

    /// Attempt exceeded its latency budget (milliseconds)
    #[error("Generation timed out after {0} ms")]
    Timeout(u64),
}

/// Core trait for LLM text generation.
///
/// Implementations must be Send + Sync and hold no per-call mutable state:
/// several hypothetical documents are generated concurrently from one instance.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a completion for `prompt` at the given sampling temperature.
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError>;

    /// Return the model name identifier used by this client.
    fn model_name(&self) -> &str;
}

/// Create the generation client selected by configuration.
pub fn create_client(
    config: &GenerationConfig,
) -> Result<Arc<dyn GenerationClient>, EvidenceError> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EvidenceError::Config(
                    "OpenAI API key required when generation provider is 'openai'. \
                     Set EVIDENCE_GENERATION__OPENAI_API_KEY or generation.openai_api_key in evidence.toml"
                        .to_string(),
                )
            })?;
            let client = openai::OpenAIGenerationClient::new(
                config.openai_base_url.clone(),
                api_key,
                config.openai_model.clone(),
                config.max_tokens,
            )
            .map_err(|e| EvidenceError::Config(e.to_string()))?;
            Ok(Arc::new(client))
        }
        "ollama" => Ok(Arc::new(ollama::OllamaGenerationClient::new(
            config.ollama_base_url.clone(),
            config.ollama_model.clone(),
            config.max_tokens,
        ))),
        other => Err(EvidenceError::Config(format!(
            "Unknown generation provider '{}' (expected 'ollama' or 'openai')",
            other
        ))),
    }
}
