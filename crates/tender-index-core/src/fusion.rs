//! Reciprocal Rank Fusion over the lexical and vector candidate lists.
//!
//! RRF is rank-based, not score-based: a segment at 1-based rank `r` in a
//! list contributes `1 / (k + r)` to its fused score, and the fused score
//! is the sum of contributions across all lists it appears in. Absence
//! from a list contributes nothing (no penalty). `k` defaults to 60, which
//! de-emphasizes rank-1 dominance while still rewarding top positions.
//!
//! Ordering is descending fused score; ties break by first-seen insertion
//! order (lexical list first, then vector), via a stable sort — repeated
//! fusion of the same inputs is byte-identical.

use serde::Serialize;
use std::collections::HashMap;

use crate::models::{SourceContribution, SourceIndex};

/// Default RRF constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// A candidate from one index's ranked list, in rank order.
#[derive(Debug, Clone)]
pub struct RankedCandidate {
    pub segment_id: String,
    pub version_id: String,
    pub doc_type: String,
    pub segment_index: i64,
    /// The backend's native score (bm25 rank or cosine similarity).
    /// Carried for provenance only; fusion ignores it.
    pub raw_score: f64,
    pub snippet: String,
}

/// One index's ranked candidate list.
#[derive(Debug, Clone)]
pub struct RankedList {
    pub source: SourceIndex,
    pub candidates: Vec<RankedCandidate>,
}

/// A segment after fusion, with full per-source provenance.
#[derive(Debug, Clone, Serialize)]
pub struct FusedCandidate {
    pub segment_id: String,
    pub version_id: String,
    pub doc_type: String,
    pub segment_index: i64,
    pub score: f64,
    pub snippet: String,
    pub provenance: Vec<SourceContribution>,
}

/// Fuse ranked lists with Reciprocal Rank Fusion.
///
/// Deterministic: same inputs, same output, including tie order.
pub fn rrf_fuse(lists: &[RankedList], k: f64) -> Vec<FusedCandidate> {
    // insertion order doubles as the tie-break key
    let mut order: Vec<String> = Vec::new();
    let mut fused: HashMap<String, FusedCandidate> = HashMap::new();

    for list in lists {
        for (i, cand) in list.candidates.iter().enumerate() {
            let rank = i + 1;
            let contribution = 1.0 / (k + rank as f64);

            let entry = fused.entry(cand.segment_id.clone()).or_insert_with(|| {
                order.push(cand.segment_id.clone());
                FusedCandidate {
                    segment_id: cand.segment_id.clone(),
                    version_id: cand.version_id.clone(),
                    doc_type: cand.doc_type.clone(),
                    segment_index: cand.segment_index,
                    score: 0.0,
                    snippet: cand.snippet.clone(),
                    provenance: Vec::new(),
                }
            });

            entry.score += contribution;
            entry.provenance.push(SourceContribution {
                source_index: list.source,
                rank,
                contribution,
            });
        }
    }

    let mut results: Vec<FusedCandidate> = order
        .into_iter()
        .filter_map(|id| fused.remove(&id))
        .collect();

    // stable sort preserves insertion order among equal scores
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    results
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cand(segment_id: &str) -> RankedCandidate {
        RankedCandidate {
            segment_id: segment_id.to_string(),
            version_id: "v1".to_string(),
            doc_type: "tender".to_string(),
            segment_index: 0,
            raw_score: 0.0,
            snippet: String::new(),
        }
    }

    fn list(source: SourceIndex, ids: &[&str]) -> RankedList {
        RankedList {
            source,
            candidates: ids.iter().map(|id| cand(id)).collect(),
        }
    }

    #[test]
    fn test_empty_lists() {
        let results = rrf_fuse(&[], DEFAULT_RRF_K);
        assert!(results.is_empty());

        let results = rrf_fuse(
            &[
                list(SourceIndex::Lexical, &[]),
                list(SourceIndex::Vector, &[]),
            ],
            DEFAULT_RRF_K,
        );
        assert!(results.is_empty());
    }

    #[test]
    fn test_dual_source_outranks_single_source() {
        // "A" is top-1 in both lists: 1/61 + 1/61.
        // "B" is top-1 only in... no list has B at rank 1; give B rank 2
        // lexical only: its fused score 1/62 < 2/61.
        let lists = [
            list(SourceIndex::Lexical, &["A", "B"]),
            list(SourceIndex::Vector, &["A"]),
        ];
        let results = rrf_fuse(&lists, DEFAULT_RRF_K);
        assert_eq!(results[0].segment_id, "A");
        let expected = 1.0 / 61.0 + 1.0 / 61.0;
        assert!((results[0].score - expected).abs() < 1e-12);
        assert_eq!(results[1].segment_id, "B");
        assert!((results[1].score - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_worked_example_from_fixed_constant() {
        // top-1 in both lists ≈ 0.0328; single-list top-1 ≈ 0.0164
        let lists = [
            list(SourceIndex::Lexical, &["both", "only_lex"]),
            list(SourceIndex::Vector, &["both"]),
        ];
        let results = rrf_fuse(&lists, 60.0);
        assert!((results[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert!(results[0].score > 1.0 / 61.0);
    }

    #[test]
    fn test_provenance_records_both_sources() {
        let lists = [
            list(SourceIndex::Lexical, &["A", "B"]),
            list(SourceIndex::Vector, &["B", "A"]),
        ];
        let results = rrf_fuse(&lists, DEFAULT_RRF_K);
        for r in &results {
            assert_eq!(r.provenance.len(), 2, "segment {}", r.segment_id);
        }
        let a = results.iter().find(|r| r.segment_id == "A").unwrap();
        let lex = a
            .provenance
            .iter()
            .find(|p| p.source_index == SourceIndex::Lexical)
            .unwrap();
        assert_eq!(lex.rank, 1);
        let vec = a
            .provenance
            .iter()
            .find(|p| p.source_index == SourceIndex::Vector)
            .unwrap();
        assert_eq!(vec.rank, 2);
    }

    #[test]
    fn test_ties_break_by_insertion_order() {
        // A and B each appear once at rank 1 of one list: equal scores.
        // A was inserted first (lexical list is processed first).
        let lists = [
            list(SourceIndex::Lexical, &["A"]),
            list(SourceIndex::Vector, &["B"]),
        ];
        let results = rrf_fuse(&lists, DEFAULT_RRF_K);
        assert_eq!(results[0].segment_id, "A");
        assert_eq!(results[1].segment_id, "B");
        assert!((results[0].score - results[1].score).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let lists = [
            list(SourceIndex::Lexical, &["A", "B", "C", "D"]),
            list(SourceIndex::Vector, &["C", "E", "A"]),
        ];
        let first = rrf_fuse(&lists, DEFAULT_RRF_K);
        for _ in 0..20 {
            let again = rrf_fuse(&lists, DEFAULT_RRF_K);
            assert_eq!(first.len(), again.len());
            for (a, b) in first.iter().zip(again.iter()) {
                assert_eq!(a.segment_id, b.segment_id);
                assert_eq!(a.score.to_bits(), b.score.to_bits());
            }
        }
    }

    #[test]
    fn test_configurable_k() {
        let lists = [list(SourceIndex::Lexical, &["A"])];
        let with_60 = rrf_fuse(&lists, 60.0);
        let with_10 = rrf_fuse(&lists, 10.0);
        assert!((with_60[0].score - 1.0 / 61.0).abs() < 1e-12);
        assert!((with_10[0].score - 1.0 / 11.0).abs() < 1e-12);
    }
}
