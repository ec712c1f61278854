//! Hybrid retrieval: lexical and vector queries fused with RRF.
//!
//! Both sub-queries run concurrently under the configured timeout. When the
//! embedding provider is disabled (or the query cannot be embedded because
//! no provider is configured) retrieval degrades to lexical-only through
//! the same fusion path, so result shape and provenance stay uniform.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::debug;

use tender_index_core::errors::{InvalidInput, RetrievalError};
use tender_index_core::fusion::{rrf_fuse, RankedList};
use tender_index_core::models::{RetrievalResult, SourceIndex};
use tender_index_core::store::{LexicalIndex, QueryFilter, VectorIndex};

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, EmbeddingProvider};

/// A retrieval query against one tenant's corpus.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub tenant_id: String,
    pub query: String,
    /// Restrict to these document types; empty means all.
    pub doc_types: Vec<String>,
    /// Final result count; `None` uses the configured default.
    pub top_k: Option<i64>,
}

/// The new retrieval implementation, fusing both indexes.
pub struct HybridRetriever {
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<dyn VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    config: RetrievalConfig,
}

impl HybridRetriever {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vectors: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            lexical,
            vectors,
            provider,
            config,
        }
    }

    pub async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<RetrievalResult>> {
        let trimmed = validate_query(query)?;

        // Empty corpus short-circuits before any index query.
        if self.lexical.tenant_segment_count(&query.tenant_id).await? == 0 {
            debug!(tenant_id = query.tenant_id, "tenant has no indexed segments");
            return Ok(Vec::new());
        }

        let filter = QueryFilter {
            doc_types: query.doc_types.clone(),
        };
        let timeout = Duration::from_secs(self.config.query_timeout_secs);
        let candidate_k = self.config.candidate_k;

        let lexical_fut = self.lexical_candidates(trimmed, &query.tenant_id, &filter, candidate_k, timeout);
        let vector_fut = self.vector_candidates(trimmed, &query.tenant_id, &filter, candidate_k, timeout);
        let (lexical_list, vector_list) = tokio::join!(lexical_fut, vector_fut);

        let mut lists = vec![RankedList {
            source: SourceIndex::Lexical,
            candidates: lexical_list?,
        }];
        if let Some(candidates) = vector_list? {
            lists.push(RankedList {
                source: SourceIndex::Vector,
                candidates,
            });
        }

        let top_k = query.top_k.unwrap_or(self.config.top_k).max(1) as usize;
        let fused = rrf_fuse(&lists, self.config.rrf_k);
        debug!(
            tenant_id = query.tenant_id,
            fused = fused.len(),
            top_k,
            "fused candidate lists"
        );

        Ok(fused
            .into_iter()
            .take(top_k)
            .map(|c| RetrievalResult {
                segment_id: c.segment_id,
                version_id: c.version_id,
                doc_type: c.doc_type,
                segment_index: c.segment_index,
                score: c.score,
                snippet: c.snippet,
                provenance: c.provenance,
            })
            .collect())
    }

    async fn lexical_candidates(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
        timeout: Duration,
    ) -> Result<Vec<tender_index_core::fusion::RankedCandidate>> {
        let fut = self.lexical.search(query, tenant_id, filter, limit);
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(candidates)) => Ok(candidates),
            Ok(Err(e)) => Err(RetrievalError::Backend {
                index: "lexical",
                cause: e,
            }
            .into()),
            Err(_) => Err(RetrievalError::Timeout {
                index: "lexical",
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }

    /// Vector candidates, or `None` when embeddings are disabled.
    async fn vector_candidates(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
        timeout: Duration,
    ) -> Result<Option<Vec<tender_index_core::fusion::RankedCandidate>>> {
        if !self.provider.is_enabled() {
            return Ok(None);
        }
        let fut = async {
            let query_vec = embed_query(self.provider.as_ref(), query).await?;
            self.vectors.search(&query_vec, tenant_id, filter, limit).await
        };
        match tokio::time::timeout(timeout, fut).await {
            Ok(Ok(candidates)) => Ok(Some(candidates)),
            Ok(Err(e)) => Err(RetrievalError::Backend {
                index: "vector",
                cause: e,
            }
            .into()),
            Err(_) => Err(RetrievalError::Timeout {
                index: "vector",
                timeout_ms: timeout.as_millis() as u64,
            }
            .into()),
        }
    }
}

/// Rejects queries that would never match anything, before any index work.
pub(crate) fn validate_query(query: &RetrievalQuery) -> Result<&str> {
    if query.tenant_id.is_empty() {
        return Err(InvalidInput::new("tenant_id must not be empty").into());
    }
    let trimmed = query.query.trim();
    if trimmed.is_empty() {
        return Err(InvalidInput::new("query must not be empty").into());
    }
    Ok(trimmed)
}
