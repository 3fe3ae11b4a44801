//! Embedding client trait and supporting types
//!
//! Provides a pluggable interface for turning text into vectors.
//! Supports Ollama (local, default, no API key) and OpenAI-compatible APIs.
//! The backend is chosen once from configuration by [`create_client`].

pub mod cache;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::errors::EvidenceError;

/// Errors that can occur during embedding operations.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// Embedding generation failure (transport or parse error)
    #[error("Embedding generation error: {0}")]
    Generation(String),

    /// API provider returned an HTTP error
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// Provider not configured (e.g., missing API key)
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    /// Backend produced a vector of an unexpected size
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// A vector tagged with its dimension.
///
/// Retrievers route on `dimension()`; fusion never looks at embeddings at all.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    dimension: usize,
    vector: Vec<f32>,
}

impl Embedding {
    pub fn new(vector: Vec<f32>) -> Result<Self, EmbeddingError> {
        if vector.is_empty() {
            return Err(EmbeddingError::Generation(
                "backend returned an empty vector".to_string(),
            ));
        }
        Ok(Embedding {
            dimension: vector.len(),
            vector,
        })
    }

    /// Check the vector against the dimension the client was configured for.
    pub fn expect_dimension(self, expected: usize) -> Result<Self, EmbeddingError> {
        if self.dimension != expected {
            return Err(EmbeddingError::DimensionMismatch {
                expected,
                actual: self.dimension,
            });
        }
        Ok(self)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.vector
    }

    pub fn into_vector(self) -> Vec<f32> {
        self.vector
    }
}

/// Core trait for embedding text into fixed-dimension float vectors.
///
/// Implementations must be Send + Sync; a single instance is shared by every
/// branch of a query (e.g., Arc<dyn EmbeddingClient>).
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError>;

    /// Return the model name identifier (e.g., "nomic-embed-text").
    fn model_name(&self) -> &str;

    /// Return the dimension of the vectors produced by this model.
    fn dimension(&self) -> usize;
}

/// Create the embedding client selected by configuration, wrapped in a cache
/// when `cache_capacity > 0`.
pub fn create_client(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingClient>, EvidenceError> {
    let client: Arc<dyn EmbeddingClient> = match config.provider.as_str() {
        "openai" => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EvidenceError::Config(
                    "OpenAI API key required when embedding provider is 'openai'. \
                     Set EVIDENCE_EMBEDDING__OPENAI_API_KEY or embedding.openai_api_key in evidence.toml"
                        .to_string(),
                )
            })?;
            let client = openai::OpenAIEmbeddingClient::new(
                config.openai_base_url.clone(),
                api_key,
                config.openai_model.clone(),
                config.dimension,
            )
            .map_err(|e| EvidenceError::Config(e.to_string()))?;
            Arc::new(client)
        }
        "ollama" => Arc::new(ollama::OllamaEmbeddingClient::new(
            config.ollama_base_url.clone(),
            config.ollama_model.clone(),
            config.dimension,
        )),
        other => {
            return Err(EvidenceError::Config(format!(
                "Unknown embedding provider '{}' (expected 'ollama' or 'openai')",
                other
            )))
        }
    };

    if config.cache_capacity == 0 {
        return Ok(client);
    }
    Ok(Arc::new(cache::CachedEmbeddingClient::new(
        client,
        config.cache_capacity,
    )))
}
