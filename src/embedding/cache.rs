//! Bounded in-client embedding cache using moka.
//!
//! The same claim is often searched repeatedly; caching lives here, inside a
//! client decorator, so the retrieval core stays free of global state.

use async_trait::async_trait;
use moka::sync::Cache;
use std::sync::Arc;

use super::{Embedding, EmbeddingClient, EmbeddingError};

/// Size-bounded cache in front of another embedding client, keyed by input text.
///
/// Failures are never cached. Concurrent misses for the same text may both call
/// the inner client; the later insert overwrites an identical value.
pub struct CachedEmbeddingClient {
    inner: Arc<dyn EmbeddingClient>,
    cache: Cache<String, Embedding>,
}

impl CachedEmbeddingClient {
    pub fn new(inner: Arc<dyn EmbeddingClient>, capacity: usize) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity.max(1) as u64)
            .build();

        CachedEmbeddingClient { inner, cache }
    }

    /// Number of cached embeddings, after pending evictions are applied.
    pub fn len(&self) -> u64 {
        self.cache.run_pending_tasks();
        self.cache.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingClient for CachedEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
        if let Some(hit) = self.cache.get(text) {
            tracing::trace!(model = self.inner.model_name(), "Embedding cache hit");
            return Ok(hit);
        }

        let embedding = self.inner.embed(text).await?;
        self.cache.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dimension(&self) -> usize {
        self.inner.dimension()
    }
}
