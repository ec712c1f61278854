//! The pre-migration implementations wrapped by the gate.
//!
//! Legacy retrieval queries only the full-text index and ranks by bm25;
//! legacy ingestion writes only the lexical side. Both produce the same
//! result types as the new implementations so the gate can diff and swap
//! them freely.

use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use tender_index_core::models::{
    IngestResult, RetrievalResult, SourceContribution, SourceIndex,
};
use tender_index_core::store::{LexicalIndex, QueryFilter};

use crate::config::RetrievalConfig;
use crate::ingest::{IndexWriter, IngestRequest};
use crate::retrieve::RetrievalQuery;

/// Lexical-only retrieval in the legacy system's ranking.
pub struct LegacyRetriever {
    lexical: Arc<dyn LexicalIndex>,
    config: RetrievalConfig,
}

impl LegacyRetriever {
    pub fn new(lexical: Arc<dyn LexicalIndex>, config: RetrievalConfig) -> Self {
        Self { lexical, config }
    }

    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>> {
        let trimmed = crate::retrieve::validate_query(query)?;

        if self.lexical.tenant_segment_count(&query.tenant_id).await? == 0 {
            return Ok(Vec::new());
        }

        let filter = QueryFilter {
            doc_types: query.doc_types.clone(),
        };
        let top_k = query.top_k.unwrap_or(self.config.top_k).max(1) as usize;
        let candidates = self
            .lexical
            .search(trimmed, &query.tenant_id, &filter, top_k as i64)
            .await?;
        debug!(
            tenant_id = query.tenant_id,
            candidates = candidates.len(),
            "legacy lexical retrieval"
        );

        Ok(candidates
            .into_iter()
            .enumerate()
            .map(|(i, c)| RetrievalResult {
                segment_id: c.segment_id,
                version_id: c.version_id,
                doc_type: c.doc_type,
                segment_index: c.segment_index,
                score: c.raw_score,
                snippet: c.snippet,
                provenance: vec![SourceContribution {
                    source_index: SourceIndex::Lexical,
                    rank: i + 1,
                    contribution: c.raw_score,
                }],
            })
            .collect())
    }
}

/// Lexical-only ingestion, delegating to the shared writer.
pub struct LegacyIngester {
    writer: Arc<IndexWriter>,
}

impl LegacyIngester {
    pub fn new(writer: Arc<IndexWriter>) -> Self {
        Self { writer }
    }

    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResult> {
        self.writer.ingest_lexical_only(request).await
    }
}
