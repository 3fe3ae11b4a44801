//! Reciprocal Rank Fusion across every ranked list of one query
//!
//! RRF score for each document = sum of 1/(k + rank_i) over each list i it appears in.
//! Deduplication and provenance tracking happen in the same per-document grouping.
//! Output depends only on list content: permuting the input never changes the result.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::errors::EvidenceError;
use crate::retrieval::{RetrievalList, StrategyTag};

/// Literature-standard smoothing constant; discounts low ranks gently.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// Number of distinct retrieval strategies a document can be found by.
pub const STRATEGY_COUNT: usize = 3;

/// Parameters for one fusion pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionParams {
    pub rrf_k: f64,
    /// Normalized-score cutoff; entries strictly below it are dropped
    pub threshold: f64,
    pub max_results: usize,
}

impl FusionParams {
    pub fn new(threshold: f64, max_results: usize) -> Self {
        FusionParams {
            rrf_k: DEFAULT_RRF_K,
            threshold,
            max_results,
        }
    }

    pub fn with_rrf_k(mut self, rrf_k: f64) -> Self {
        self.rrf_k = rrf_k;
        self
    }

    fn validate(&self) -> Result<(), EvidenceError> {
        if !self.rrf_k.is_finite() || self.rrf_k <= 0.0 {
            return Err(EvidenceError::Invariant(format!(
                "rrf_k must be a positive number, got {}",
                self.rrf_k
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(EvidenceError::Invariant(format!(
                "fusion threshold must lie in [0, 1], got {}",
                self.threshold
            )));
        }
        if self.max_results == 0 {
            return Err(EvidenceError::Invariant(
                "max_results must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// One deduplicated document in the fused ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedEntry {
    pub document_id: String,
    /// Raw sum of reciprocal-rank contributions
    pub rrf_score: f64,
    /// Min-max normalized `rrf_score` in [0, 1]
    pub normalized_score: f64,
    /// Every strategy whose list contained this document
    pub found_by: BTreeSet<StrategyTag>,
    /// Number of lists that contained this document (several hyde lists count separately)
    pub appearances: usize,
}

impl FusedEntry {
    /// Found by at least two different strategies.
    pub fn is_corroborated(&self) -> bool {
        self.found_by.len() >= 2
    }

    pub fn found_by_all(&self) -> bool {
        self.found_by.len() == STRATEGY_COUNT
    }
}

/// Final, immutable output of a fusion pass, best first.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FusedResult {
    entries: Vec<FusedEntry>,
}

impl FusedResult {
    pub fn entries(&self) -> &[FusedEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<FusedEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, FusedEntry> {
        self.entries.iter()
    }

    pub fn document_ids(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.document_id.as_str()).collect()
    }

    pub fn get(&self, document_id: &str) -> Option<&FusedEntry> {
        self.entries.iter().find(|e| e.document_id == document_id)
    }

    /// Entries found by every strategy, a strong convergence signal.
    pub fn corroborated_by_all(&self) -> impl Iterator<Item = &FusedEntry> {
        self.entries.iter().filter(|e| e.found_by_all())
    }
}

impl<'a> IntoIterator for &'a FusedResult {
    type Item = &'a FusedEntry;
    type IntoIter = std::slice::Iter<'a, FusedEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[derive(Default)]
struct Accumulator {
    ranks: Vec<usize>,
    found_by: BTreeSet<StrategyTag>,
}

/// Presentation order: normalized desc, rrf desc, document id asc.
fn output_order(a: &FusedEntry, b: &FusedEntry) -> Ordering {
    b.normalized_score
        .total_cmp(&a.normalized_score)
        .then_with(|| b.rrf_score.total_cmp(&a.rrf_score))
        .then_with(|| a.document_id.cmp(&b.document_id))
}

/// Cut order: like `output_order`, but score ties favour wider corroboration.
fn truncation_order(a: &FusedEntry, b: &FusedEntry) -> Ordering {
    b.normalized_score
        .total_cmp(&a.normalized_score)
        .then_with(|| b.rrf_score.total_cmp(&a.rrf_score))
        .then_with(|| b.found_by.len().cmp(&a.found_by.len()))
        .then_with(|| a.document_id.cmp(&b.document_id))
}

/// Fuse ranked lists into one deduplicated, thresholded, sorted result.
///
/// An empty `lists` slice yields an empty result. A document listed twice in the
/// same list is rejected rather than counted twice.
pub fn fuse(lists: &[RetrievalList], params: &FusionParams) -> Result<FusedResult, EvidenceError> {
    params.validate()?;

    let mut accumulators: HashMap<&str, Accumulator> = HashMap::new();
    for list in lists {
        let mut seen: HashSet<&str> = HashSet::with_capacity(list.len());
        for (rank, entry) in list.ranked() {
            let id = entry.document_id.as_str();
            if !seen.insert(id) {
                return Err(EvidenceError::Invariant(format!(
                    "document {} appears twice in the {} list",
                    id,
                    list.branch()
                )));
            }
            let acc = accumulators.entry(id).or_default();
            acc.ranks.push(rank);
            acc.found_by.insert(list.strategy());
        }
    }

    if accumulators.is_empty() {
        return Ok(FusedResult::default());
    }

    let mut candidates: Vec<FusedEntry> = accumulators
        .into_iter()
        .map(|(id, mut acc)| {
            // Summing in rank order keeps the float result independent of list order.
            acc.ranks.sort_unstable();
            let rrf_score = acc
                .ranks
                .iter()
                .map(|&rank| 1.0 / (params.rrf_k + rank as f64))
                .sum();
            FusedEntry {
                document_id: id.to_string(),
                rrf_score,
                normalized_score: 0.0,
                found_by: acc.found_by,
                appearances: acc.ranks.len(),
            }
        })
        .collect();

    let (min, max) = candidates.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| {
        (lo.min(e.rrf_score), hi.max(e.rrf_score))
    });
    let range = max - min;
    for entry in &mut candidates {
        entry.normalized_score = if range > 0.0 {
            ((entry.rrf_score - min) / range).clamp(0.0, 1.0)
        } else {
            1.0
        };
    }

    candidates.retain(|e| e.normalized_score >= params.threshold);

    if candidates.len() > params.max_results {
        candidates.sort_by(truncation_order);
        candidates.truncate(params.max_results);
    }
    candidates.sort_by(output_order);

    Ok(FusedResult {
        entries: candidates,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Branch, RetrievalEntry};

    fn list(branch: Branch, ids: &[&str]) -> RetrievalList {
        let entries = ids
            .iter()
            .map(|id| RetrievalEntry::new(*id, 0.5))
            .collect();
        RetrievalList::new(branch, entries).unwrap()
    }

    fn tags(tags: &[StrategyTag]) -> BTreeSet<StrategyTag> {
        tags.iter().copied().collect()
    }

    /// semantic [A, B, C], hyde [B, A], keyword [C, x, A]
    fn scenario_lists() -> Vec<RetrievalList> {
        vec![
            list(Branch::Semantic, &["A", "B", "C"]),
            list(Branch::Hyde(1), &["B", "A"]),
            list(Branch::Keyword, &["C", "x", "A"]),
        ]
    }

    #[test]
    fn test_rrf_concrete_scenario() {
        let fused = fuse(&scenario_lists(), &FusionParams::new(0.0, 10)).unwrap();

        assert_eq!(fused.document_ids(), vec!["A", "B", "C", "x"]);

        let a = fused.get("A").unwrap();
        let expected_a = 1.0 / 61.0 + 1.0 / 62.0 + 1.0 / 63.0;
        assert!((a.rrf_score - expected_a).abs() < 1e-12);
        assert_eq!(
            a.found_by,
            tags(&[StrategyTag::Semantic, StrategyTag::Hyde, StrategyTag::Keyword])
        );
        assert!(a.found_by_all());
        assert_eq!(a.normalized_score, 1.0);

        let b = fused.get("B").unwrap();
        assert!((b.rrf_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        let c = fused.get("C").unwrap();
        assert!((c.rrf_score - (1.0 / 63.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!(b.rrf_score > c.rrf_score);

        assert_eq!(fused.get("x").unwrap().normalized_score, 0.0);
        assert_eq!(fused.corroborated_by_all().count(), 1);
    }

    #[test]
    fn test_permuting_lists_does_not_change_output() {
        let lists = scenario_lists();
        let expected = fuse(&lists, &FusionParams::new(0.0, 10)).unwrap();

        let orders = [[0, 2, 1], [1, 0, 2], [1, 2, 0], [2, 0, 1], [2, 1, 0]];
        for order in orders {
            let permuted: Vec<RetrievalList> = order.iter().map(|&i| lists[i].clone()).collect();
            assert_eq!(fuse(&permuted, &FusionParams::new(0.0, 10)).unwrap(), expected);
        }
    }

    #[test]
    fn test_empty_input_yields_empty_result() {
        let fused = fuse(&[], &FusionParams::new(0.5, 10)).unwrap();
        assert!(fused.is_empty());

        let fused = fuse(&[list(Branch::Keyword, &[])], &FusionParams::new(0.0, 10)).unwrap();
        assert!(fused.is_empty());
    }

    #[test]
    fn test_normalized_scores_bounded_with_a_top_score() {
        let lists = vec![
            list(Branch::Semantic, &["a", "b", "c", "d", "e"]),
            list(Branch::Hyde(1), &["e", "d", "f"]),
            list(Branch::Hyde(2), &["g", "a"]),
        ];
        let fused = fuse(&lists, &FusionParams::new(0.0, 100)).unwrap();

        assert!(fused
            .iter()
            .all(|e| (0.0..=1.0).contains(&e.normalized_score)));
        assert!(fused.iter().any(|e| e.normalized_score == 1.0));
        assert!(fused.iter().any(|e| e.normalized_score == 0.0));
    }

    #[test]
    fn test_degenerate_scores_normalize_to_one() {
        let fused = fuse(&[list(Branch::Semantic, &["only"])], &FusionParams::new(1.0, 5)).unwrap();
        assert_eq!(fused.len(), 1);
        assert_eq!(fused.entries()[0].normalized_score, 1.0);

        // Equal contributions from disjoint lists
        let lists = vec![list(Branch::Semantic, &["p"]), list(Branch::Keyword, &["q"])];
        let fused = fuse(&lists, &FusionParams::new(1.0, 5)).unwrap();
        assert_eq!(fused.document_ids(), vec!["p", "q"]);
        assert!(fused.iter().all(|e| e.normalized_score == 1.0));
    }

    #[test]
    fn test_dedup_unions_provenance_and_counts_appearances() {
        let lists = vec![
            list(Branch::Hyde(1), &["d1", "d2"]),
            list(Branch::Hyde(2), &["d1"]),
            list(Branch::Keyword, &["d2", "d1"]),
        ];
        let fused = fuse(&lists, &FusionParams::new(0.0, 10)).unwrap();

        assert_eq!(fused.len(), 2);
        let d1 = fused.get("d1").unwrap();
        assert_eq!(d1.found_by, tags(&[StrategyTag::Hyde, StrategyTag::Keyword]));
        assert_eq!(d1.appearances, 3);
        assert!(d1.is_corroborated());
    }

    #[test]
    fn test_threshold_drops_only_entries_strictly_below() {
        let lists = scenario_lists();
        let all = fuse(&lists, &FusionParams::new(0.0, 10)).unwrap();
        let cutoff = all.get("C").unwrap().normalized_score;

        let fused = fuse(&lists, &FusionParams::new(cutoff, 10)).unwrap();

        assert!(fused.iter().all(|e| e.normalized_score >= cutoff));
        let expected: Vec<&str> = all
            .iter()
            .filter(|e| e.normalized_score >= cutoff)
            .map(|e| e.document_id.as_str())
            .collect();
        assert_eq!(fused.document_ids(), expected);
        assert!(fused.get("C").is_some());
    }

    #[test]
    fn test_threshold_and_cap_apply_together() {
        let lists = scenario_lists();
        let all = fuse(&lists, &FusionParams::new(0.0, 10)).unwrap();
        let cutoff = all.get("C").unwrap().normalized_score;
        assert!(cutoff > 0.0);

        // Threshold removes "x"; the cap then removes "C", the weakest survivor.
        let fused = fuse(&lists, &FusionParams::new(cutoff, 2)).unwrap();
        assert_eq!(fused.document_ids(), vec!["A", "B"]);
        assert!(fused.iter().all(|e| e.normalized_score >= cutoff));

        let uncapped = fuse(&lists, &FusionParams::new(cutoff, 3)).unwrap();
        assert_eq!(uncapped.document_ids(), vec!["A", "B", "C"]);
    }

    #[test]
    fn test_truncation_prefers_wider_provenance_on_ties() {
        // "b": semantic #1 + keyword #1; "a": hyde#1 #1 + hyde#2 #1: identical rrf
        let lists = vec![
            list(Branch::Semantic, &["b"]),
            list(Branch::Hyde(1), &["a"]),
            list(Branch::Hyde(2), &["a", "z"]),
            list(Branch::Keyword, &["b"]),
        ];

        let both = fuse(&lists, &FusionParams::new(0.0, 2)).unwrap();
        assert_eq!(both.document_ids(), vec!["a", "b"]);

        let one = fuse(&lists, &FusionParams::new(0.0, 1)).unwrap();
        assert_eq!(one.document_ids(), vec!["b"]);
    }

    #[test]
    fn test_rrf_k_is_configurable() {
        let lists = vec![list(Branch::Semantic, &["a", "b"])];
        let fused = fuse(&lists, &FusionParams::new(0.0, 5).with_rrf_k(1.0)).unwrap();
        assert!((fused.get("a").unwrap().rrf_score - 0.5).abs() < 1e-12);
        assert!(fuse(&lists, &FusionParams::new(0.0, 5).with_rrf_k(0.0)).is_err());
    }

    #[test]
    fn test_duplicate_within_one_list_rejected() {
        let bad = RetrievalList::new_unchecked(
            Branch::Semantic,
            vec![RetrievalEntry::new("a", 0.9), RetrievalEntry::new("a", 0.8)],
        );
        let err = fuse(&[bad], &FusionParams::new(0.0, 5)).unwrap_err();
        assert!(matches!(err, EvidenceError::Invariant(_)));
    }

    #[test]
    fn test_serializes_found_by_as_tags() {
        let fused = fuse(&[list(Branch::Keyword, &["a"])], &FusionParams::new(0.0, 5)).unwrap();
        let json = serde_json::to_value(&fused).unwrap();
        assert_eq!(json[0]["document_id"], "a");
        assert_eq!(json[0]["found_by"], serde_json::json!(["keyword"]));
    }
}
