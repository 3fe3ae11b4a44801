//! Concurrent fan-out of retrieval branches for one query
//!
//! Branches: one semantic search on the query embedding, one semantic search per
//! hypothetical document (hyde), one lexical search on the raw text. Each runs as
//! its own tokio task under its own timeout; a query-level deadline aborts whatever
//! is still running. Nothing is shared mutably between branches.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingClient;
use crate::errors::EvidenceError;
use crate::generation::hyde::HypotheticalDocument;
use crate::query::Query;
use crate::retrieval::{Branch, LexicalRetriever, RetrievalList, VectorRetriever};

/// Per-strategy caps applied to every list before fusion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyLimits {
    pub semantic: usize,
    pub hyde: usize,
    pub keyword: usize,
}

impl StrategyLimits {
    pub fn from_config(config: &RetrievalConfig) -> Self {
        StrategyLimits {
            semantic: config.semantic_limit,
            hyde: config.hyde_limit,
            keyword: config.keyword_limit,
        }
    }

    fn for_branch(&self, branch: Branch) -> usize {
        match branch {
            Branch::Semantic => self.semantic,
            Branch::Hyde(_) => self.hyde,
            Branch::Keyword => self.keyword,
        }
    }
}

impl Default for StrategyLimits {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

/// Shared handles every branch task needs.
#[derive(Clone)]
struct Backends {
    embedder: Arc<dyn EmbeddingClient>,
    vector: Arc<dyn VectorRetriever>,
    lexical: Arc<dyn LexicalRetriever>,
}

pub struct StrategyRunner {
    backends: Backends,
    limits: StrategyLimits,
    branch_timeout: Duration,
}

impl StrategyRunner {
    pub fn new(
        embedder: Arc<dyn EmbeddingClient>,
        vector: Arc<dyn VectorRetriever>,
        lexical: Arc<dyn LexicalRetriever>,
        limits: StrategyLimits,
        branch_timeout: Duration,
    ) -> Self {
        StrategyRunner {
            backends: Backends {
                embedder,
                vector,
                lexical,
            },
            limits,
            branch_timeout,
        }
    }

    /// Run every branch concurrently and collect what settles.
    ///
    /// Each branch contributes exactly one list or exactly one error. Both vectors
    /// come back in branch order (semantic, hyde#1..K, keyword), never completion order.
    pub async fn run(
        &self,
        query: &Query,
        hypotheticals: &[HypotheticalDocument],
        deadline: Option<Instant>,
    ) -> (Vec<RetrievalList>, Vec<EvidenceError>) {
        let mut branches: Vec<(Branch, String)> = Vec::with_capacity(hypotheticals.len() + 2);
        branches.push((Branch::Semantic, query.text().to_string()));
        for doc in hypotheticals {
            branches.push((Branch::Hyde(doc.index), doc.text.clone()));
        }
        branches.push((Branch::Keyword, query.text().to_string()));

        tracing::debug!(branches = branches.len(), "Dispatching retrieval branches");

        let timeout = self.branch_timeout;
        let timeout_ms = timeout.as_millis() as u64;
        let floor = query.similarity_floor();
        let mut pending: BTreeSet<Branch> = BTreeSet::new();
        let mut tasks = JoinSet::new();

        for (branch, text) in branches {
            pending.insert(branch);
            let backends = self.backends.clone();
            let limit = self.limits.for_branch(branch);
            tasks.spawn(async move {
                let search = run_branch(&backends, branch, &text, floor, limit);
                let outcome = match tokio::time::timeout(timeout, search).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EvidenceError::Timeout { branch, timeout_ms }),
                };
                (branch, outcome)
            });
        }

        let deadline_reached = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline_reached);

        let mut lists = Vec::new();
        let mut errors = Vec::new();

        loop {
            tokio::select! {
                biased;

                joined = tasks.join_next() => {
                    let Some(joined) = joined else { break };
                    collect(joined, &mut pending, &mut lists, &mut errors);
                }
                _ = &mut deadline_reached => {
                    // Keep branches that settled before the deadline but were not yet joined.
                    while let Some(joined) = tasks.try_join_next() {
                        collect(joined, &mut pending, &mut lists, &mut errors);
                    }
                    tasks.abort_all();
                    for branch in std::mem::take(&mut pending) {
                        tracing::warn!(%branch, "Retrieval branch cancelled by query deadline");
                        errors.push(EvidenceError::DeadlineExceeded { branch });
                    }
                    break;
                }
            }
        }

        // Tasks that panicked never reported their branch.
        for branch in pending {
            errors.push(EvidenceError::Aborted {
                branch,
                message: "retrieval task panicked".to_string(),
            });
        }

        lists.sort_by_key(|l| l.branch());
        errors.sort_by_key(|e| e.branch());
        (lists, errors)
    }
}

type BranchOutcome = (Branch, Result<RetrievalList, EvidenceError>);

fn collect(
    joined: Result<BranchOutcome, JoinError>,
    pending: &mut BTreeSet<Branch>,
    lists: &mut Vec<RetrievalList>,
    errors: &mut Vec<EvidenceError>,
) {
    match joined {
        Ok((branch, Ok(list))) => {
            pending.remove(&branch);
            tracing::debug!(%branch, hits = list.len(), "Retrieval branch complete");
            lists.push(list);
        }
        Ok((branch, Err(e))) => {
            pending.remove(&branch);
            tracing::warn!(%branch, error = %e, "Retrieval branch failed");
            errors.push(e);
        }
        Err(e) => {
            tracing::error!(error = %e, "Retrieval branch task failed");
        }
    }
}

async fn run_branch(
    backends: &Backends,
    branch: Branch,
    text: &str,
    floor: f32,
    limit: usize,
) -> Result<RetrievalList, EvidenceError> {
    let entries = match branch {
        Branch::Keyword => backends
            .lexical
            .search(text, limit)
            .await
            .map_err(|source| EvidenceError::Retrieval { branch, source })?,
        Branch::Semantic | Branch::Hyde(_) => {
            let embedding = backends
                .embedder
                .embed(text)
                .await
                .map_err(|source| EvidenceError::Embedding { branch, source })?;
            backends
                .vector
                .search(&embedding, floor, limit)
                .await
                .map_err(|source| EvidenceError::Retrieval { branch, source })?
        }
    };

    RetrievalList::capped(branch, entries, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedding, EmbeddingError};
    use crate::retrieval::{RetrievalEntry, RetrievalError, StrategyTag};
    use async_trait::async_trait;

    struct LengthEmbedder;

    #[async_trait]
    impl EmbeddingClient for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Embedding, EmbeddingError> {
            if text.contains("unembeddable") {
                return Err(EmbeddingError::Generation("rejected".to_string()));
            }
            if text.contains("stall") {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Embedding::new(vec![text.len() as f32, 0.0])
        }

        fn model_name(&self) -> &str {
            "length"
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    /// Returns `hits` fixed documents regardless of the query.
    struct FixedVector {
        hits: usize,
    }

    #[async_trait]
    impl VectorRetriever for FixedVector {
        async fn search(
            &self,
            _embedding: &Embedding,
            _threshold: f32,
            _limit: usize,
        ) -> Result<Vec<RetrievalEntry>, RetrievalError> {
            Ok((0..self.hits)
                .map(|i| RetrievalEntry::new(format!("v{}", i), 1.0 - i as f64 / 100.0))
                .collect())
        }
    }

    struct SlowLexical {
        delay: Duration,
        duplicate: bool,
    }

    #[async_trait]
    impl LexicalRetriever for SlowLexical {
        async fn search(
            &self,
            _query_text: &str,
            _limit: usize,
        ) -> Result<Vec<RetrievalEntry>, RetrievalError> {
            tokio::time::sleep(self.delay).await;
            if self.duplicate {
                return Ok(vec![RetrievalEntry::new("k", 2.0), RetrievalEntry::new("k", 1.0)]);
            }
            Ok(vec![RetrievalEntry::new("k", 2.0)])
        }
    }

    fn runner(vector_hits: usize, lexical: SlowLexical, limits: StrategyLimits) -> StrategyRunner {
        StrategyRunner::new(
            Arc::new(LengthEmbedder),
            Arc::new(FixedVector { hits: vector_hits }),
            Arc::new(lexical),
            limits,
            Duration::from_millis(200),
        )
    }

    fn hypotheticals(texts: &[&str]) -> Vec<HypotheticalDocument> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| HypotheticalDocument {
                index: i + 1,
                text: t.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_all_branches_in_branch_order_and_capped() {
        let limits = StrategyLimits {
            semantic: 3,
            hyde: 2,
            keyword: 10,
        };
        let runner = runner(
            5,
            SlowLexical {
                delay: Duration::ZERO,
                duplicate: false,
            },
            limits,
        );
        let query = Query::builder("claim").build().unwrap();

        let (lists, errors) = runner
            .run(&query, &hypotheticals(&["first", "second"]), None)
            .await;

        assert!(errors.is_empty());
        let branches: Vec<Branch> = lists.iter().map(|l| l.branch()).collect();
        assert_eq!(
            branches,
            vec![Branch::Semantic, Branch::Hyde(1), Branch::Hyde(2), Branch::Keyword]
        );
        assert_eq!(lists[0].len(), 3);
        assert_eq!(lists[1].len(), 2);
        assert_eq!(lists[3].strategy(), StrategyTag::Keyword);
    }

    #[tokio::test]
    async fn test_embedding_failure_drops_only_that_branch() {
        let runner = runner(
            2,
            SlowLexical {
                delay: Duration::ZERO,
                duplicate: false,
            },
            StrategyLimits::default(),
        );
        let query = Query::builder("claim").build().unwrap();

        let (lists, errors) = runner
            .run(&query, &hypotheticals(&["fine", "unembeddable text"]), None)
            .await;

        assert_eq!(lists.len(), 3);
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            errors[0],
            EvidenceError::Embedding {
                branch: Branch::Hyde(2),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_slow_branch_times_out_without_blocking_others() {
        let runner = runner(
            2,
            SlowLexical {
                delay: Duration::from_secs(10),
                duplicate: false,
            },
            StrategyLimits::default(),
        );
        let query = Query::builder("claim").build().unwrap();

        let started = Instant::now();
        let (lists, errors) = runner.run(&query, &[], None).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(lists.len(), 1);
        assert!(matches!(
            errors.as_slice(),
            [EvidenceError::Timeout {
                branch: Branch::Keyword,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_deadline_cancels_stragglers() {
        let runner = runner(
            2,
            SlowLexical {
                delay: Duration::from_secs(10),
                duplicate: false,
            },
            StrategyLimits::default(),
        );
        let query = Query::builder("claim").build().unwrap();
        let deadline = Instant::now() + Duration::from_millis(30);

        let (lists, errors) = runner.run(&query, &[], Some(deadline)).await;

        assert_eq!(lists.len(), 1);
        assert!(matches!(
            errors.as_slice(),
            [EvidenceError::DeadlineExceeded {
                branch: Branch::Keyword
            }]
        ));
    }

    #[tokio::test]
    async fn test_duplicate_ids_from_backend_drop_branch() {
        let runner = runner(
            1,
            SlowLexical {
                delay: Duration::ZERO,
                duplicate: true,
            },
            StrategyLimits::default(),
        );
        let query = Query::builder("claim").build().unwrap();

        let (lists, errors) = runner.run(&query, &[], None).await;

        assert_eq!(lists.len(), 1);
        assert!(matches!(
            errors.as_slice(),
            [EvidenceError::InvalidList {
                branch: Branch::Keyword,
                ..
            }]
        ));
    }

    #[tokio::test]
    async fn test_mixed_errors_reported_in_branch_order() {
        let runner = runner(
            1,
            SlowLexical {
                delay: Duration::ZERO,
                duplicate: true,
            },
            StrategyLimits::default(),
        );
        let query = Query::builder("unembeddable claim").build().unwrap();

        let (lists, errors) = runner.run(&query, &[], None).await;

        assert!(lists.is_empty());
        let branches: Vec<Option<Branch>> = errors.iter().map(|e| e.branch()).collect();
        assert_eq!(branches, vec![Some(Branch::Semantic), Some(Branch::Keyword)]);
        assert!(matches!(errors[0], EvidenceError::Embedding { .. }));
        assert!(matches!(errors[1], EvidenceError::InvalidList { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_branch_settled_before_deadline_is_kept() {
        let runner = StrategyRunner::new(
            Arc::new(LengthEmbedder),
            Arc::new(FixedVector { hits: 2 }),
            Arc::new(SlowLexical {
                delay: Duration::from_millis(40),
                duplicate: false,
            }),
            StrategyLimits::default(),
            Duration::from_secs(10),
        );
        let query = Query::builder("claim").build().unwrap();
        let deadline = Instant::now() + Duration::from_millis(50);

        let (lists, errors) = runner
            .run(&query, &hypotheticals(&["stall"]), Some(deadline))
            .await;

        // keyword settles at 40ms, hyde#1 is still embedding at 50ms
        let branches: Vec<Branch> = lists.iter().map(|l| l.branch()).collect();
        assert_eq!(branches, vec![Branch::Semantic, Branch::Keyword]);
        assert!(matches!(
            errors.as_slice(),
            [EvidenceError::DeadlineExceeded {
                branch: Branch::Hyde(1)
            }]
        ));
    }
}
