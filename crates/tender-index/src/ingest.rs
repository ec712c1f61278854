//! The write path of the new dual index.
//!
//! Ingestion is idempotent on `(tenant_id, document_hash, version)`:
//! re-submitting an already-indexed version is a no-op, and a version whose
//! earlier attempt failed partway resumes at the missing stages. The key is
//! tenant-scoped so two tenants submitting byte-identical content each get
//! their own version row and index entries. Concurrent submissions of the
//! same key are serialized through a per-key async mutex so the
//! delete-then-insert writes never interleave.
//!
//! Stages run in a fixed order (version row, lexical, vectors) and every
//! failure is tagged with its stage via [`IngestError`] so the caller knows
//! what a retry will redo.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::{debug, info};
use uuid::Uuid;

use tender_index_core::errors::{IngestError, IngestStage, InvalidInput};
use tender_index_core::models::{self, DocumentVersion, IngestResult, IngestStatus, Segment};
use tender_index_core::store::{LexicalIndex, VectorEntry, VectorIndex};

use crate::embedding::EmbeddingProvider;

const SNIPPET_CHARS: usize = 240;

/// One document version submitted for indexing.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub tenant_id: String,
    pub doc_type: String,
    pub document_id: String,
    pub version: i64,
    /// Content hash of the segment texts; computed when absent.
    pub document_hash: Option<String>,
    /// Pre-chunked segment texts, in document order.
    pub segments: Vec<String>,
}

/// Writes one document version into both indexes.
pub struct IndexWriter {
    pool: SqlitePool,
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<dyn VectorIndex>,
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IndexWriter {
    pub fn new(
        pool: SqlitePool,
        lexical: Arc<dyn LexicalIndex>,
        vectors: Arc<dyn VectorIndex>,
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
    ) -> Self {
        Self {
            pool,
            lexical,
            vectors,
            provider,
            batch_size: batch_size.max(1),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Ingest one document version into both indexes.
    ///
    /// Returns the counts actually written, or the stored counts when the
    /// version is already fully indexed.
    pub async fn ingest(&self, request: IngestRequest) -> Result<IngestResult> {
        validate(&request)?;

        let document_hash = match &request.document_hash {
            Some(h) => h.clone(),
            None => models::document_hash(&request.segments),
        };
        let key = ingest_key(&request.tenant_id, &document_hash, request.version);
        let _guard = self.key_lock(&key).lock_owned().await;

        // A re-submit of identical content by the same tenant carries the
        // same key and lands here.
        if let Some((version_id, status)) = self
            .existing(&request.tenant_id, &document_hash, request.version)
            .await?
        {
            let expected = request.segments.len() as u64;
            if let Some(status) = &status {
                if status.last_error.is_none() && status.lexical_count == expected {
                    let vectors_done = !self.provider.is_enabled() || status.vector_count == expected;
                    if vectors_done {
                        debug!(version_id, key, "version already indexed, skipping");
                        return Ok(IngestResult {
                            segment_count: expected,
                            lexical_count: status.lexical_count,
                            vector_count: status.vector_count,
                            vectors_pending: status.vectors_pending,
                        });
                    }
                }
            }
            info!(version_id, key, "resuming partially indexed version");
            let version = self.load_version(&version_id).await?;
            return self.index_version(&version, &request.segments).await;
        }

        let version = DocumentVersion {
            id: Uuid::new_v4().to_string(),
            tenant_id: request.tenant_id.clone(),
            doc_type: request.doc_type.clone(),
            document_hash,
            version: request.version,
            created_at: chrono::Utc::now().timestamp(),
        };
        sqlx::query(
            "INSERT INTO document_versions (id, tenant_id, doc_type, document_id, document_hash, version, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&version.id)
        .bind(&version.tenant_id)
        .bind(&version.doc_type)
        .bind(&request.document_id)
        .bind(&version.document_hash)
        .bind(version.version)
        .bind(version.created_at)
        .execute(&self.pool)
        .await
        .context("inserting document version")?;

        info!(
            version_id = version.id,
            tenant_id = version.tenant_id,
            doc_type = version.doc_type,
            segments = request.segments.len(),
            key,
            "ingesting new document version"
        );
        self.index_version(&version, &request.segments).await
    }

    /// Re-run the vector stage for an already-ingested version, reading the
    /// segment texts back from storage. Used after enabling embeddings or
    /// after a vector-stage failure.
    pub async fn reingest_vectors(&self, version_id: &str) -> Result<IngestResult> {
        let version = self.load_version(version_id).await?;
        let texts: Vec<String> = sqlx::query_scalar(
            "SELECT text FROM segments WHERE version_id = ? ORDER BY segment_index",
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await
        .context("loading segments for reingest")?;
        anyhow::ensure!(
            !texts.is_empty(),
            "no stored segments for version '{version_id}'"
        );

        let key = ingest_key(&version.tenant_id, &version.document_hash, version.version);
        let _guard = self.key_lock(&key).lock_owned().await;

        let segments = segments_of(&version, &texts);
        let lexical_count = self.lexical.count_for_version(version_id).await?;
        let result = self
            .vector_stage(&version, &segments, lexical_count)
            .await?;
        info!(
            version_id,
            vector_count = result.vector_count,
            "vector reingest complete"
        );
        Ok(result)
    }

    /// Write only the lexical index, leaving all vectors pending.
    ///
    /// This is the pre-migration write path; the gate routes here when the
    /// ingest capability resolves to the legacy implementation.
    pub async fn ingest_lexical_only(&self, request: IngestRequest) -> Result<IngestResult> {
        validate(&request)?;

        let document_hash = match &request.document_hash {
            Some(h) => h.clone(),
            None => models::document_hash(&request.segments),
        };
        let key = ingest_key(&request.tenant_id, &document_hash, request.version);
        let _guard = self.key_lock(&key).lock_owned().await;

        let version = match self
            .existing(&request.tenant_id, &document_hash, request.version)
            .await?
        {
            Some((version_id, _)) => self.load_version(&version_id).await?,
            None => {
                let version = DocumentVersion {
                    id: Uuid::new_v4().to_string(),
                    tenant_id: request.tenant_id.clone(),
                    doc_type: request.doc_type.clone(),
                    document_hash,
                    version: request.version,
                    created_at: chrono::Utc::now().timestamp(),
                };
                sqlx::query(
                    "INSERT INTO document_versions (id, tenant_id, doc_type, document_id, document_hash, version, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(&version.id)
                .bind(&version.tenant_id)
                .bind(&version.doc_type)
                .bind(&request.document_id)
                .bind(&version.document_hash)
                .bind(version.version)
                .bind(version.created_at)
                .execute(&self.pool)
                .await
                .context("inserting document version")?;
                version
            }
        };

        let segments = segments_of(&version, &request.segments);
        let lexical_count = self.lexical_stage(&version, &segments).await?;
        let result = IngestResult {
            segment_count: segments.len() as u64,
            lexical_count,
            vector_count: 0,
            vectors_pending: segments.len() as u64,
        };
        self.write_status(&version.id, &result, None).await?;
        Ok(result)
    }

    /// Load per-version status rows for operator inspection.
    pub async fn status(&self, version_id: &str) -> Result<Option<IngestStatus>> {
        let row: Option<(i64, i64, i64, Option<String>, i64)> = sqlx::query_as(
            "SELECT lexical_count, vector_count, vectors_pending, last_error, updated_at
             FROM ingest_status WHERE version_id = ?",
        )
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(
            |(lexical_count, vector_count, vectors_pending, last_error, updated_at)| IngestStatus {
                version_id: version_id.to_string(),
                lexical_count: lexical_count as u64,
                vector_count: vector_count as u64,
                vectors_pending: vectors_pending as u64,
                last_error,
                updated_at,
            },
        ))
    }

    // Run lexical + vector stages for a version row that exists.
    async fn index_version(
        &self,
        version: &DocumentVersion,
        texts: &[String],
    ) -> Result<IngestResult> {
        let segments = segments_of(version, texts);

        let lexical_count = match self.lexical_stage(version, &segments).await {
            Ok(count) => count,
            Err(e) => {
                self.fail_status(&version.id, &e).await;
                return Err(e.into());
            }
        };

        match self.vector_stage(version, &segments, lexical_count).await {
            Ok(result) => Ok(result),
            Err(e) => {
                // lexical is committed; record the vector-stage failure so a
                // retry resumes there
                let partial = IngestResult {
                    segment_count: segments.len() as u64,
                    lexical_count,
                    vector_count: 0,
                    vectors_pending: segments.len() as u64,
                };
                self.write_status(&version.id, &partial, Some(&e.to_string()))
                    .await?;
                Err(e.into())
            }
        }
    }

    async fn lexical_stage(
        &self,
        version: &DocumentVersion,
        segments: &[Segment],
    ) -> std::result::Result<u64, IngestError> {
        self.lexical
            .replace_version(version, segments)
            .await
            .map_err(|e| IngestError::new(IngestStage::LexicalWrite, e))
    }

    async fn vector_stage(
        &self,
        version: &DocumentVersion,
        segments: &[Segment],
        lexical_count: u64,
    ) -> std::result::Result<IngestResult, IngestError> {
        let segment_count = segments.len() as u64;

        if !self.provider.is_enabled() {
            let result = IngestResult {
                segment_count,
                lexical_count,
                vector_count: 0,
                vectors_pending: segment_count,
            };
            self.write_status(&version.id, &result, None)
                .await
                .map_err(|e| IngestError::new(IngestStage::VectorWrite, e))?;
            debug!(
                version_id = version.id,
                pending = segment_count,
                "embeddings disabled, vectors left pending"
            );
            return Ok(result);
        }

        let mut entries = Vec::with_capacity(segments.len());
        for batch in segments.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|s| s.text.clone()).collect();
            let vectors = self
                .provider
                .embed(&texts)
                .await
                .map_err(|e| IngestError::new(IngestStage::Embedding, e))?;
            if vectors.len() != batch.len() {
                return Err(IngestError::new(
                    IngestStage::Embedding,
                    anyhow::anyhow!(
                        "provider returned {} vectors for {} inputs",
                        vectors.len(),
                        batch.len()
                    ),
                ));
            }
            for (segment, vector) in batch.iter().zip(vectors) {
                entries.push(VectorEntry {
                    segment_id: segment.id.clone(),
                    segment_index: segment.segment_index,
                    vector,
                    snippet: snippet_of(&segment.text),
                });
            }
        }

        let vector_count = self
            .vectors
            .replace_version(version, &entries)
            .await
            .map_err(|e| IngestError::new(IngestStage::VectorWrite, e))?;

        let result = IngestResult {
            segment_count,
            lexical_count,
            vector_count,
            vectors_pending: 0,
        };
        self.write_status(&version.id, &result, None)
            .await
            .map_err(|e| IngestError::new(IngestStage::VectorWrite, e))?;
        Ok(result)
    }

    async fn existing(
        &self,
        tenant_id: &str,
        document_hash: &str,
        version: i64,
    ) -> Result<Option<(String, Option<IngestStatus>)>> {
        let version_id: Option<String> = sqlx::query_scalar(
            "SELECT id FROM document_versions
             WHERE tenant_id = ? AND document_hash = ? AND version = ?",
        )
        .bind(tenant_id)
        .bind(document_hash)
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;
        match version_id {
            Some(id) => {
                let status = self.status(&id).await?;
                Ok(Some((id, status)))
            }
            None => Ok(None),
        }
    }

    async fn load_version(&self, version_id: &str) -> Result<DocumentVersion> {
        let row: Option<(String, String, String, i64, i64)> = sqlx::query_as(
            "SELECT tenant_id, doc_type, document_hash, version, created_at
             FROM document_versions WHERE id = ?",
        )
        .bind(version_id)
        .fetch_optional(&self.pool)
        .await?;
        let (tenant_id, doc_type, document_hash, version, created_at) =
            row.ok_or_else(|| anyhow::anyhow!("unknown version id '{version_id}'"))?;
        Ok(DocumentVersion {
            id: version_id.to_string(),
            tenant_id,
            doc_type,
            document_hash,
            version,
            created_at,
        })
    }

    async fn write_status(
        &self,
        version_id: &str,
        result: &IngestResult,
        last_error: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingest_status (version_id, lexical_count, vector_count, vectors_pending, last_error, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(version_id) DO UPDATE SET
                 lexical_count = excluded.lexical_count,
                 vector_count = excluded.vector_count,
                 vectors_pending = excluded.vectors_pending,
                 last_error = excluded.last_error,
                 updated_at = excluded.updated_at",
        )
        .bind(version_id)
        .bind(result.lexical_count as i64)
        .bind(result.vector_count as i64)
        .bind(result.vectors_pending as i64)
        .bind(last_error)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .context("writing ingest status")?;
        Ok(())
    }

    async fn fail_status(&self, version_id: &str, error: &IngestError) {
        let zero = IngestResult {
            segment_count: 0,
            lexical_count: 0,
            vector_count: 0,
            vectors_pending: 0,
        };
        if let Err(e) = self
            .write_status(version_id, &zero, Some(&error.to_string()))
            .await
        {
            tracing::warn!(version_id, error = %e, "failed to record ingest failure");
        }
    }

    fn key_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        // drop locks no longer held by any in-flight ingest
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

fn validate(request: &IngestRequest) -> Result<()> {
    if request.tenant_id.is_empty() {
        return Err(InvalidInput::new("tenant_id must not be empty").into());
    }
    if request.segments.is_empty() {
        return Err(InvalidInput::new("segments must not be empty").into());
    }
    Ok(())
}

fn ingest_key(tenant_id: &str, document_hash: &str, version: i64) -> String {
    format!("{tenant_id}:{document_hash}:{version}")
}

fn segments_of(version: &DocumentVersion, texts: &[String]) -> Vec<Segment> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| Segment::new(&version.id, i as i64, t))
        .collect()
}

fn snippet_of(text: &str) -> String {
    if text.chars().count() <= SNIPPET_CHARS {
        text.to_string()
    } else {
        text.chars().take(SNIPPET_CHARS).collect()
    }
}
