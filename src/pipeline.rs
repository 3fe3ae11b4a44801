//! Evidence search entry point
//!
//! Runs one query end to end: hypothetical document generation, concurrent
//! retrieval fan-out, then reciprocal rank fusion. Per-branch failures degrade the
//! result instead of failing it; only a query where every branch failed is a
//! total failure, and even then the caller receives every collected error.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{Config, RetrievalConfig};
use crate::embedding::{self, EmbeddingClient};
use crate::errors::EvidenceError;
use crate::fusion::{fuse, FusedResult, FusionParams};
use crate::generation::hyde::HypotheticalDocumentGenerator;
use crate::generation::{self, GenerationClient};
use crate::query::Query;
use crate::retrieval::postgres::PostgresIndex;
use crate::retrieval::{LexicalRetriever, StrategyTag, VectorRetriever};
use crate::strategy::{StrategyLimits, StrategyRunner};

/// Outcome of one evidence search.
#[derive(Debug)]
pub struct EvidenceSearch {
    /// Fused ranking; empty on total failure
    pub results: FusedResult,
    /// Every non-fatal and fatal error collected, in branch order
    pub errors: Vec<EvidenceError>,
    /// Number of ranked lists that reached fusion
    pub lists_fused: usize,
    /// Requested strategies that contributed no list
    pub unavailable: BTreeSet<StrategyTag>,
}

impl EvidenceSearch {
    /// Every backend call failed; distinct from "nothing matched" (no errors).
    pub fn is_total_failure(&self) -> bool {
        self.lists_fused == 0 && !self.errors.is_empty()
    }

    /// Some strategy dropped out but a result was still produced.
    pub fn is_degraded(&self) -> bool {
        !self.is_total_failure() && !self.unavailable.is_empty()
    }

    /// Requested strategies that contributed no list, in strategy order.
    pub fn unavailable_strategies(&self) -> impl Iterator<Item = StrategyTag> + '_ {
        self.unavailable.iter().copied()
    }

    /// Informational notes for partially degraded searches.
    pub fn notes(&self) -> Vec<String> {
        if self.is_total_failure() {
            return Vec::new();
        }
        self.unavailable
            .iter()
            .map(|strategy| {
                let label = match strategy {
                    StrategyTag::Semantic => "Semantic search",
                    StrategyTag::Hyde => "HyDE",
                    StrategyTag::Keyword => "Keyword search",
                };
                format!("{} unavailable for this query", label)
            })
            .collect()
    }

    pub fn into_parts(self) -> (FusedResult, Vec<EvidenceError>) {
        (self.results, self.errors)
    }
}

/// Owns the generator, the strategy runner and fusion settings for many queries.
///
/// Backends are fixed at construction; nothing is selected per call.
pub struct EvidenceFinder {
    generator: HypotheticalDocumentGenerator,
    runner: StrategyRunner,
    rrf_k: f64,
    query_deadline: Duration,
}

impl EvidenceFinder {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        embedder: Arc<dyn EmbeddingClient>,
        vector: Arc<dyn VectorRetriever>,
        lexical: Arc<dyn LexicalRetriever>,
        config: &RetrievalConfig,
    ) -> Result<Self, EvidenceError> {
        config.validate()?;

        Ok(EvidenceFinder {
            generator: HypotheticalDocumentGenerator::new(
                generation,
                Duration::from_millis(config.generation_timeout_ms),
            ),
            runner: StrategyRunner::new(
                embedder,
                vector,
                lexical,
                StrategyLimits::from_config(config),
                Duration::from_millis(config.branch_timeout_ms),
            ),
            rrf_k: config.rrf_k,
            query_deadline: Duration::from_millis(config.query_deadline_ms),
        })
    }

    /// Wire configured HTTP clients and the PostgreSQL index.
    pub async fn from_config(config: &Config) -> Result<Self, EvidenceError> {
        config.validate()?;

        let generation = generation::create_client(&config.generation)?;
        let embedder = embedding::create_client(&config.embedding)?;
        let index = Arc::new(PostgresIndex::connect(&config.index).await?);

        tracing::info!(
            generation_model = generation.model_name(),
            embedding_model = embedder.model_name(),
            dimension = embedder.dimension(),
            "Evidence finder initialized"
        );

        Self::new(generation, embedder, index.clone(), index, &config.retrieval)
    }

    /// Find and rank evidence for `query`.
    pub async fn find_evidence(&self, query: &Query) -> EvidenceSearch {
        let query_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "find_evidence",
            %query_id,
            hyde_count = query.hyde_count()
        );
        self.run(query).instrument(span).await
    }

    async fn run(&self, query: &Query) -> EvidenceSearch {
        let started = Instant::now();
        let deadline = started + self.query_deadline;

        let (hypotheticals, mut errors) = self
            .generator
            .generate(
                query.text(),
                query.hyde_count(),
                query.temperature(),
                Some(deadline),
            )
            .await;

        if query.hyde_count() > 0 && hypotheticals.is_empty() {
            tracing::info!(
                attempts = query.hyde_count(),
                "HyDE unavailable for this query: every generation attempt failed"
            );
        }

        let (lists, branch_errors) = self.runner.run(query, &hypotheticals, Some(deadline)).await;
        errors.extend(branch_errors);

        let mut requested: BTreeSet<StrategyTag> =
            [StrategyTag::Semantic, StrategyTag::Keyword].into_iter().collect();
        if query.hyde_count() > 0 {
            requested.insert(StrategyTag::Hyde);
        }
        let contributed: BTreeSet<StrategyTag> = lists.iter().map(|l| l.strategy()).collect();
        let unavailable: BTreeSet<StrategyTag> =
            requested.difference(&contributed).copied().collect();

        let params =
            FusionParams::new(query.threshold(), query.max_results()).with_rrf_k(self.rrf_k);
        let results = match fuse(&lists, &params) {
            Ok(results) => results,
            Err(e) => {
                tracing::error!(error = %e, "Fusion rejected its input");
                errors.push(e);
                FusedResult::default()
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if lists.is_empty() && !errors.is_empty() {
            tracing::error!(
                errors = errors.len(),
                elapsed_ms,
                "Evidence search failed: every retrieval branch failed"
            );
        } else {
            for strategy in &unavailable {
                tracing::info!(%strategy, "Strategy contributed no results for this query");
            }
            tracing::info!(
                results = results.len(),
                lists = lists.len(),
                errors = errors.len(),
                elapsed_ms,
                "Evidence search complete"
            );
        }

        EvidenceSearch {
            results,
            errors,
            lists_fused: lists.len(),
            unavailable,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search(lists_fused: usize, errors: usize, unavailable: &[StrategyTag]) -> EvidenceSearch {
        EvidenceSearch {
            results: FusedResult::default(),
            errors: (0..errors)
                .map(|i| EvidenceError::Invariant(format!("error {}", i)))
                .collect(),
            lists_fused,
            unavailable: unavailable.iter().copied().collect(),
        }
    }

    #[test]
    fn test_nothing_matched_is_not_a_failure() {
        let outcome = search(3, 0, &[]);
        assert!(!outcome.is_total_failure());
        assert!(!outcome.is_degraded());
        assert!(outcome.notes().is_empty());
    }

    #[test]
    fn test_degraded_search_reports_note() {
        let outcome = search(2, 3, &[StrategyTag::Hyde]);
        assert!(outcome.is_degraded());
        assert_eq!(
            outcome.unavailable_strategies().collect::<Vec<_>>(),
            vec![StrategyTag::Hyde]
        );
        assert_eq!(outcome.notes(), vec!["HyDE unavailable for this query".to_string()]);
    }

    #[test]
    fn test_total_failure_has_no_notes() {
        let outcome = search(0, 2, &[StrategyTag::Semantic, StrategyTag::Keyword]);
        assert!(outcome.is_total_failure());
        assert!(!outcome.is_degraded());
        assert!(outcome.notes().is_empty());
    }
}
