//! Retriever traits and the ranked-list data model shared by every strategy
//!
//! A `RetrievalList` is the output of exactly one retrieval call. It is validated
//! on construction and immutable afterwards; fusion is its only consumer.

pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

use crate::embedding::Embedding;
use crate::errors::EvidenceError;

/// Errors returned by vector or lexical index backends.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Query execution or connection failure
    #[error("Index backend error: {0}")]
    Backend(String),

    /// No index holds vectors of this dimension
    #[error("No vector index for dimension {0}")]
    UnsupportedDimension(usize),

    /// A configured table or column name is not a plain SQL identifier
    #[error("Invalid SQL identifier: {0}")]
    InvalidIdentifier(String),
}

/// Retrieval strategy that produced a ranked list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyTag {
    Semantic,
    Hyde,
    Keyword,
}

impl StrategyTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyTag::Semantic => "semantic",
            StrategyTag::Hyde => "hyde",
            StrategyTag::Keyword => "keyword",
        }
    }
}

impl fmt::Display for StrategyTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One concurrent retrieval call within a query's fan-out.
///
/// Ordered semantic, hyde#1..K, keyword; results and errors are reported in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Branch {
    Semantic,
    /// Search with the embedding of the hypothetical document at this 1-based index
    Hyde(usize),
    Keyword,
}

impl Branch {
    pub fn strategy(&self) -> StrategyTag {
        match self {
            Branch::Semantic => StrategyTag::Semantic,
            Branch::Hyde(_) => StrategyTag::Hyde,
            Branch::Keyword => StrategyTag::Keyword,
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Semantic => write!(f, "semantic"),
            Branch::Hyde(index) => write!(f, "hyde#{}", index),
            Branch::Keyword => write!(f, "keyword"),
        }
    }
}

/// A single hit returned by a retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalEntry {
    pub document_id: String,
    /// Backend-specific relevance (cosine similarity or text rank); never used for fusion
    pub score: f64,
}

impl RetrievalEntry {
    pub fn new(document_id: impl Into<String>, score: f64) -> Self {
        RetrievalEntry {
            document_id: document_id.into(),
            score,
        }
    }
}

/// Ranked output of one retrieval call. Position defines rank (index 0 = rank 1).
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalList {
    branch: Branch,
    entries: Vec<RetrievalEntry>,
}

impl RetrievalList {
    /// Build a list, rejecting duplicate document ids with a branch-scoped error.
    pub fn new(branch: Branch, entries: Vec<RetrievalEntry>) -> Result<Self, EvidenceError> {
        let mut seen = HashSet::with_capacity(entries.len());
        for (position, entry) in entries.iter().enumerate() {
            if !seen.insert(entry.document_id.as_str()) {
                return Err(EvidenceError::InvalidList {
                    branch,
                    message: format!(
                        "document {} appears twice (second time at rank {})",
                        entry.document_id,
                        position + 1
                    ),
                });
            }
        }
        Ok(RetrievalList { branch, entries })
    }

    /// Cap the backend output at `limit` entries, then validate.
    pub fn capped(
        branch: Branch,
        mut entries: Vec<RetrievalEntry>,
        limit: usize,
    ) -> Result<Self, EvidenceError> {
        entries.truncate(limit);
        Self::new(branch, entries)
    }

    /// Skip validation, so fusion's own ingestion check can be exercised.
    #[cfg(test)]
    pub(crate) fn new_unchecked(branch: Branch, entries: Vec<RetrievalEntry>) -> Self {
        RetrievalList { branch, entries }
    }

    pub fn branch(&self) -> Branch {
        self.branch
    }

    pub fn strategy(&self) -> StrategyTag {
        self.branch.strategy()
    }

    pub fn entries(&self) -> &[RetrievalEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries paired with their 1-based rank.
    pub fn ranked(&self) -> impl Iterator<Item = (usize, &RetrievalEntry)> {
        self.entries.iter().enumerate().map(|(i, e)| (i + 1, e))
    }
}

/// Nearest-neighbour search over document embeddings.
///
/// Implementations must be Send + Sync; one instance serves every branch of a query.
#[async_trait]
pub trait VectorRetriever: Send + Sync {
    /// Return at most `limit` documents with similarity >= `threshold`, best first.
    async fn search(
        &self,
        embedding: &Embedding,
        threshold: f32,
        limit: usize,
    ) -> Result<Vec<RetrievalEntry>, RetrievalError>;
}

/// Keyword search over document text.
#[async_trait]
pub trait LexicalRetriever: Send + Sync {
    /// Return at most `limit` documents matching `query_text`, best first.
    async fn search(
        &self,
        query_text: &str,
        limit: usize,
    ) -> Result<Vec<RetrievalEntry>, RetrievalError>;
}
