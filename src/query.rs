//! Immutable evidence query
//!
//! A `Query` can only be obtained from `QueryBuilder::build`, which validates every
//! field, so the pipeline never sees a malformed query.

use crate::config::RetrievalConfig;
use crate::errors::EvidenceError;

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    text: String,
    threshold: f64,
    similarity_floor: f32,
    max_results: usize,
    hyde_count: usize,
    temperature: f32,
}

impl Query {
    /// Start a query for `text` with library defaults.
    pub fn builder(text: impl Into<String>) -> QueryBuilder {
        QueryBuilder::from_config(text, &RetrievalConfig::default())
    }

    /// The claim or question as submitted.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Normalized fused-score cutoff in [0, 1].
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Raw similarity floor handed to the vector retriever.
    pub fn similarity_floor(&self) -> f32 {
        self.similarity_floor
    }

    pub fn max_results(&self) -> usize {
        self.max_results
    }

    /// Number of hypothetical documents (K); 0 disables HyDE.
    pub fn hyde_count(&self) -> usize {
        self.hyde_count
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    /// Number of retrieval branches this query fans out to once generation succeeds.
    pub fn branch_count(&self) -> usize {
        self.hyde_count + 2
    }
}

#[derive(Debug, Clone)]
pub struct QueryBuilder {
    text: String,
    threshold: f64,
    similarity_floor: f32,
    max_results: usize,
    hyde_count: usize,
    temperature: f32,
}

impl QueryBuilder {
    /// Seed every knob from the configured retrieval defaults.
    pub fn from_config(text: impl Into<String>, config: &RetrievalConfig) -> Self {
        QueryBuilder {
            text: text.into(),
            threshold: config.threshold,
            similarity_floor: config.similarity_floor,
            max_results: config.max_deduplicated,
            hyde_count: config.hyde_count,
            temperature: config.temperature,
        }
    }

    pub fn threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn similarity_floor(mut self, floor: f32) -> Self {
        self.similarity_floor = floor;
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn hyde_count(mut self, hyde_count: usize) -> Self {
        self.hyde_count = hyde_count;
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn build(self) -> Result<Query, EvidenceError> {
        let text = self.text.trim();
        if text.is_empty() {
            return Err(EvidenceError::validation("text", "query text cannot be empty"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(EvidenceError::validation("threshold", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.similarity_floor) {
            return Err(EvidenceError::validation("similarity_floor", "must lie in [0, 1]"));
        }
        if self.max_results == 0 {
            return Err(EvidenceError::validation(
                "max_results",
                "must be greater than zero",
            ));
        }
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(EvidenceError::validation(
                "temperature",
                "must be a non-negative number",
            ));
        }

        Ok(Query {
            text: text.to_string(),
            threshold: self.threshold,
            similarity_floor: self.similarity_floor,
            max_results: self.max_results,
            hyde_count: self.hyde_count,
            temperature: self.temperature,
        })
    }
}
