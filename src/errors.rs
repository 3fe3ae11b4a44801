//! Domain-specific error types for evidence retrieval
//!
//! Branch-scoped variants always name the branch that failed, so callers can log
//! partial failures and tell a degraded search apart from a total failure.

use crate::embedding::EmbeddingError;
use crate::generation::GenerationError;
use crate::retrieval::{Branch, RetrievalError};

#[derive(Debug, thiserror::Error)]
pub enum EvidenceError {
    #[error("Validation error: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    /// A single hypothetical document generation attempt failed.
    #[error("Hypothetical document {index} failed: {source}")]
    Generation {
        index: usize,
        #[source]
        source: GenerationError,
    },

    #[error("Embedding failed for branch {branch}: {source}")]
    Embedding {
        branch: Branch,
        #[source]
        source: EmbeddingError,
    },

    #[error("Retrieval failed for branch {branch}: {source}")]
    Retrieval {
        branch: Branch,
        #[source]
        source: RetrievalError,
    },

    #[error("Branch {branch} timed out after {timeout_ms} ms")]
    Timeout { branch: Branch, timeout_ms: u64 },

    #[error("Branch {branch} cancelled by the query deadline")]
    DeadlineExceeded { branch: Branch },

    #[error("Branch {branch} task aborted: {message}")]
    Aborted { branch: Branch, message: String },

    /// A backend returned a list that breaks the ranked-list contract.
    #[error("Branch {branch} returned an invalid list: {message}")]
    InvalidList { branch: Branch, message: String },

    /// A data-model contract was broken outside any single branch.
    #[error("Invariant violation: {0}")]
    Invariant(String),
}

impl EvidenceError {
    /// Helper to create validation errors with field names
    ///
    /// Example:
    /// ```
    /// use evidence_retrieval::errors::EvidenceError;
    /// let err = EvidenceError::validation("threshold", "must lie in [0, 1]");
    /// ```
    pub fn validation(field: &str, message: &str) -> Self {
        EvidenceError::Validation {
            message: format!("{}: {}", field, message),
            field: Some(field.to_string()),
        }
    }

    /// The retrieval branch this error belongs to, if it is branch-scoped.
    pub fn branch(&self) -> Option<Branch> {
        match self {
            EvidenceError::Generation { index, .. } => Some(Branch::Hyde(*index)),
            EvidenceError::Embedding { branch, .. }
            | EvidenceError::Retrieval { branch, .. }
            | EvidenceError::Timeout { branch, .. }
            | EvidenceError::DeadlineExceeded { branch }
            | EvidenceError::Aborted { branch, .. }
            | EvidenceError::InvalidList { branch, .. } => Some(*branch),
            _ => None,
        }
    }
}
