//! In-memory implementations of both indexes, for unit tests.
//!
//! Plain `Vec`s behind `std::sync::RwLock`. Vector search is
//! brute-force cosine over all stored vectors; lexical search is a naive
//! token-overlap score (no FTS engine), sufficient for exercising the
//! retrieval and gate paths deterministically.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::fusion::RankedCandidate;
use crate::models::{DocumentVersion, Segment};

use super::{cosine_similarity, LexicalIndex, QueryFilter, VectorEntry, VectorIndex};

#[derive(Clone)]
struct LexicalRecord {
    segment_id: String,
    version_id: String,
    tenant_id: String,
    doc_type: String,
    segment_index: i64,
    text: String,
}

#[derive(Clone)]
struct VectorRecord {
    segment_id: String,
    version_id: String,
    tenant_id: String,
    doc_type: String,
    segment_index: i64,
    vector: Vec<f32>,
    snippet: String,
}

/// In-memory dual index for tests.
#[derive(Default)]
pub struct InMemoryIndexes {
    lexical: RwLock<Vec<LexicalRecord>>,
    vectors: RwLock<Vec<VectorRecord>>,
}

impl InMemoryIndexes {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Count of query tokens appearing in the text, case-insensitive.
fn token_overlap(query: &str, text: &str) -> f64 {
    let haystack = text.to_lowercase();
    let tokens: Vec<String> = query
        .to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    tokens.iter().filter(|t| haystack.contains(t.as_str())).count() as f64
}

fn snippet_of(text: &str) -> String {
    text.chars().take(240).collect()
}

#[async_trait]
impl LexicalIndex for InMemoryIndexes {
    async fn replace_version(
        &self,
        version: &DocumentVersion,
        segments: &[Segment],
    ) -> Result<u64> {
        let mut records = self.lexical.write().unwrap();
        records.retain(|r| r.version_id != version.id);
        for seg in segments {
            records.push(LexicalRecord {
                segment_id: seg.id.clone(),
                version_id: version.id.clone(),
                tenant_id: version.tenant_id.clone(),
                doc_type: version.doc_type.clone(),
                segment_index: seg.segment_index,
                text: seg.text.clone(),
            });
        }
        Ok(segments.len() as u64)
    }

    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
    ) -> Result<Vec<RankedCandidate>> {
        let records = self.lexical.read().unwrap();
        let mut scored: Vec<(f64, RankedCandidate)> = records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(&r.doc_type))
            .filter_map(|r| {
                let score = token_overlap(query, &r.text);
                if score > 0.0 {
                    Some((
                        score,
                        RankedCandidate {
                            segment_id: r.segment_id.clone(),
                            version_id: r.version_id.clone(),
                            doc_type: r.doc_type.clone(),
                            segment_index: r.segment_index,
                            raw_score: score,
                            snippet: snippet_of(&r.text),
                        },
                    ))
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.segment_id.cmp(&b.1.segment_id))
        });
        scored.truncate(limit as usize);
        Ok(scored.into_iter().map(|(_, c)| c).collect())
    }

    async fn count_for_version(&self, version_id: &str) -> Result<u64> {
        let records = self.lexical.read().unwrap();
        Ok(records.iter().filter(|r| r.version_id == version_id).count() as u64)
    }

    async fn tenant_segment_count(&self, tenant_id: &str) -> Result<u64> {
        let records = self.lexical.read().unwrap();
        Ok(records.iter().filter(|r| r.tenant_id == tenant_id).count() as u64)
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndexes {
    async fn replace_version(
        &self,
        version: &DocumentVersion,
        entries: &[VectorEntry],
    ) -> Result<u64> {
        let mut records = self.vectors.write().unwrap();
        records.retain(|r| r.version_id != version.id);
        for entry in entries {
            records.push(VectorRecord {
                segment_id: entry.segment_id.clone(),
                version_id: version.id.clone(),
                tenant_id: version.tenant_id.clone(),
                doc_type: version.doc_type.clone(),
                segment_index: entry.segment_index,
                vector: entry.vector.clone(),
                snippet: entry.snippet.clone(),
            });
        }
        Ok(entries.len() as u64)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
    ) -> Result<Vec<RankedCandidate>> {
        let records = self.vectors.read().unwrap();
        let mut candidates: Vec<RankedCandidate> = records
            .iter()
            .filter(|r| r.tenant_id == tenant_id && filter.matches(&r.doc_type))
            .map(|r| RankedCandidate {
                segment_id: r.segment_id.clone(),
                version_id: r.version_id.clone(),
                doc_type: r.doc_type.clone(),
                segment_index: r.segment_index,
                raw_score: cosine_similarity(query_vec, &r.vector) as f64,
                snippet: r.snippet.clone(),
            })
            .collect();

        candidates.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.segment_id.cmp(&b.segment_id))
        });
        candidates.truncate(limit as usize);
        Ok(candidates)
    }

    async fn count_for_version(&self, version_id: &str) -> Result<u64> {
        let records = self.vectors.read().unwrap();
        Ok(records.iter().filter(|r| r.version_id == version_id).count() as u64)
    }
}
