//! The two index abstractions behind ingestion and retrieval.
//!
//! The lexical index stores segment text with tenant/doc-type metadata and
//! answers ranked full-text queries; the vector index stores one dense
//! embedding per segment with the same metadata and answers similarity
//! queries. The two are joined only by `segment_id` at query time — never
//! by a cross-store transaction.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::fusion::RankedCandidate;
use crate::models::{DocumentVersion, Segment};

/// Optional query-time predicates, shared by both indexes.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    /// Restrict to these document types; empty means no restriction.
    pub doc_types: Vec<String>,
}

impl QueryFilter {
    pub fn matches(&self, doc_type: &str) -> bool {
        self.doc_types.is_empty() || self.doc_types.iter().any(|t| t == doc_type)
    }
}

/// A vector-index entry for one segment.
#[derive(Debug, Clone)]
pub struct VectorEntry {
    pub segment_id: String,
    pub segment_index: i64,
    pub vector: Vec<f32>,
    pub snippet: String,
}

/// The full-text side of the dual index.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Replace all lexical records for a version with the given segments
    /// (delete-then-insert; re-running with identical content is a no-op
    /// in effect). Returns the number of records written.
    async fn replace_version(&self, version: &DocumentVersion, segments: &[Segment])
        -> Result<u64>;

    /// Ranked full-text query, filtered by tenant and doc-type.
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
    ) -> Result<Vec<RankedCandidate>>;

    /// Number of lexical records for a version.
    async fn count_for_version(&self, version_id: &str) -> Result<u64>;

    /// Total segments indexed for a tenant (empty-tenant detection).
    async fn tenant_segment_count(&self, tenant_id: &str) -> Result<u64>;
}

/// The dense-vector side of the dual index.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Replace all vector records for a version. Returns the number written.
    async fn replace_version(&self, version: &DocumentVersion, entries: &[VectorEntry])
        -> Result<u64>;

    /// Cosine-similarity query, filtered by tenant and doc-type.
    async fn search(
        &self,
        query_vec: &[f32],
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
    ) -> Result<Vec<RankedCandidate>>;

    /// Number of vector records for a version.
    async fn count_for_version(&self, version_id: &str) -> Result<u64>;
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob.len(), 20);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_mismatched_lengths() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_filter_matches() {
        let any = QueryFilter::default();
        assert!(any.matches("tender"));

        let only = QueryFilter {
            doc_types: vec!["tender".to_string(), "annex".to_string()],
        };
        assert!(only.matches("annex"));
        assert!(!only.matches("review"));
    }
}
