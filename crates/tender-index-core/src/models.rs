//! Core data types that flow through ingestion and retrieval.
//!
//! A document has one or more immutable versions, content-addressed by
//! hash so re-ingestion is idempotent. Each version is split into an
//! ordered sequence of segments with stable ids; segments are the unit of
//! indexing, and both indexes key their records by `segment_id` so results
//! can be joined at query time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An immutable, content-addressed version of a tender document.
///
/// `(document_hash, version)` is the idempotency key for ingestion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentVersion {
    pub id: String,
    pub tenant_id: String,
    pub doc_type: String,
    pub document_hash: String,
    pub version: i64,
    pub created_at: i64,
}

impl DocumentVersion {
    /// The idempotency key for this version: `{document_hash}:{version}`.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.document_hash, self.version)
    }
}

/// A chunk of a document version — the atomic unit of indexing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    /// Stable id, `"{version_id}:{segment_index}"`. Shared by the lexical
    /// and vector index records for this segment.
    pub id: String,
    pub version_id: String,
    pub segment_index: i64,
    pub text: String,
    /// SHA-256 of the segment text, for staleness detection.
    pub hash: String,
}

impl Segment {
    pub fn new(version_id: &str, index: i64, text: &str) -> Self {
        Self {
            id: segment_id(version_id, index),
            version_id: version_id.to_string(),
            segment_index: index,
            text: text.to_string(),
            hash: content_hash(text.as_bytes()),
        }
    }
}

/// Deterministic segment id: `"{version_id}:{index}"`.
pub fn segment_id(version_id: &str, index: i64) -> String {
    format!("{}:{}", version_id, index)
}

/// Hex-encoded SHA-256 of arbitrary bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Content hash of an ordered list of segment texts.
///
/// Segment boundaries are part of the hash (a length prefix per segment),
/// so re-chunking the same text differently yields a different version.
pub fn document_hash(segments: &[String]) -> String {
    let mut hasher = Sha256::new();
    for text in segments {
        hasher.update((text.len() as u64).to_le_bytes());
        hasher.update(text.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Result of ingesting one document version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestResult {
    pub segment_count: u64,
    pub lexical_count: u64,
    pub vector_count: u64,
    /// Segments skipped at the vector stage because embeddings are disabled.
    pub vectors_pending: u64,
}

/// Which index contributed a candidate, and at what rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceIndex {
    Lexical,
    Vector,
}

impl std::fmt::Display for SourceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceIndex::Lexical => write!(f, "lexical"),
            SourceIndex::Vector => write!(f, "vector"),
        }
    }
}

/// Provenance entry: one index's contribution to a fused result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source_index: SourceIndex,
    /// 1-based rank within that index's candidate list.
    pub rank: usize,
    /// The RRF term `1 / (k + rank)`.
    pub contribution: f64,
}

/// A fused, ranked retrieval result. Constructed per query, not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub segment_id: String,
    pub version_id: String,
    pub doc_type: String,
    pub segment_index: i64,
    /// Fused RRF score.
    pub score: f64,
    pub snippet: String,
    pub provenance: Vec<SourceContribution>,
}

/// A write-once record of legacy-vs-new divergence from a SHADOW run.
///
/// Consumed by offline analysis only — never read on the online path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShadowDiffRecord {
    pub capability: String,
    pub tenant_id: String,
    pub correlation_id: String,
    /// JSON-encoded, bounded [`crate::diff::Summary`].
    pub legacy_summary: String,
    pub new_summary: String,
    pub similarity: f64,
    pub significant: bool,
    pub created_at: i64,
}

/// Per-version ingestion status, persisted for audit and selective retry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestStatus {
    pub version_id: String,
    pub lexical_count: u64,
    pub vector_count: u64,
    pub vectors_pending: u64,
    pub last_error: Option<String>,
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_stable() {
        assert_eq!(segment_id("v1", 0), "v1:0");
        assert_eq!(segment_id("v1", 12), "v1:12");
    }

    #[test]
    fn test_segment_new_hashes_text() {
        let a = Segment::new("v1", 0, "hello");
        let b = Segment::new("v1", 0, "hello");
        let c = Segment::new("v1", 0, "world");
        assert_eq!(a.hash, b.hash);
        assert_ne!(a.hash, c.hash);
        assert_eq!(a.id, "v1:0");
    }

    #[test]
    fn test_document_hash_order_sensitive() {
        let h1 = document_hash(&["a".to_string(), "b".to_string()]);
        let h2 = document_hash(&["b".to_string(), "a".to_string()]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_document_hash_boundary_sensitive() {
        // "ab" + "c" must differ from "a" + "bc"
        let h1 = document_hash(&["ab".to_string(), "c".to_string()]);
        let h2 = document_hash(&["a".to_string(), "bc".to_string()]);
        assert_ne!(h1, h2);
    }

    #[test]
    fn test_idempotency_key() {
        let v = DocumentVersion {
            id: "v1".to_string(),
            tenant_id: "t1".to_string(),
            doc_type: "tender".to_string(),
            document_hash: "abc".to_string(),
            version: 3,
            created_at: 0,
        };
        assert_eq!(v.idempotency_key(), "abc:3");
    }
}
