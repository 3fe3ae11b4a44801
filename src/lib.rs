//! Multi-strategy evidence retrieval
//!
//! Finds supporting documents for a claim by running semantic, HyDE and keyword
//! retrieval concurrently and merging the ranked lists with reciprocal rank fusion.

pub mod config;
pub mod embedding;
pub mod errors;
pub mod fusion;
pub mod generation;
pub mod logging;
pub mod pipeline;
pub mod query;
pub mod retrieval;
pub mod strategy;

pub use config::Config;
pub use errors::EvidenceError;
pub use fusion::{fuse, FusedEntry, FusedResult, FusionParams};
pub use pipeline::{EvidenceFinder, EvidenceSearch};
pub use query::{Query, QueryBuilder};
pub use retrieval::{Branch, RetrievalEntry, RetrievalList, StrategyTag};
