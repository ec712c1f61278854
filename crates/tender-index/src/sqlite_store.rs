//! SQLite-backed implementations of the two index traits.
//!
//! The lexical index is the `segments` table plus the `segments_fts` FTS5
//! virtual table (BM25 ranking); the vector index is the `segment_vectors`
//! table storing little-endian f32 BLOBs, searched by brute-force cosine.
//! Both live in the same database file but are written independently —
//! there is no cross-index transaction, by design.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use tender_index_core::fusion::RankedCandidate;
use tender_index_core::models::{DocumentVersion, Segment};
use tender_index_core::store::{
    blob_to_vec, cosine_similarity, vec_to_blob, LexicalIndex, QueryFilter, VectorEntry,
    VectorIndex,
};

/// Dual index over one SQLite database.
#[derive(Clone)]
pub struct SqliteIndexes {
    pool: SqlitePool,
}

impl SqliteIndexes {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn doc_type_predicate(filter: &QueryFilter) -> Option<String> {
    if filter.doc_types.is_empty() {
        return None;
    }
    // bound separately; this builds the placeholder list
    let placeholders = vec!["?"; filter.doc_types.len()].join(", ");
    Some(placeholders)
}

#[async_trait]
impl LexicalIndex for SqliteIndexes {
    async fn replace_version(
        &self,
        version: &DocumentVersion,
        segments: &[Segment],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM segments_fts WHERE version_id = ?")
            .bind(&version.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM segments WHERE version_id = ?")
            .bind(&version.id)
            .execute(&mut *tx)
            .await?;

        for seg in segments {
            sqlx::query(
                "INSERT INTO segments (id, version_id, segment_index, text, hash) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&seg.id)
            .bind(&seg.version_id)
            .bind(seg.segment_index)
            .bind(&seg.text)
            .bind(&seg.hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "INSERT INTO segments_fts (segment_id, version_id, tenant_id, doc_type, text) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&seg.id)
            .bind(&seg.version_id)
            .bind(&version.tenant_id)
            .bind(&version.doc_type)
            .bind(&seg.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(segments.len() as u64)
    }

    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
    ) -> Result<Vec<RankedCandidate>> {
        let mut sql = String::from(
            r#"
            SELECT f.segment_id, f.version_id, f.doc_type, s.segment_index, f.rank,
                   snippet(segments_fts, 4, '>>>', '<<<', '...', 48) AS snippet
            FROM segments_fts f
            JOIN segments s ON s.id = f.segment_id
            WHERE segments_fts MATCH ? AND f.tenant_id = ?
            "#,
        );
        if let Some(placeholders) = doc_type_predicate(filter) {
            sql.push_str(&format!(" AND f.doc_type IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY rank LIMIT ?");

        let mut q = sqlx::query(&sql).bind(query).bind(tenant_id);
        for dt in &filter.doc_types {
            q = q.bind(dt);
        }
        let rows = q.bind(limit).fetch_all(&self.pool).await?;

        let candidates: Vec<RankedCandidate> = rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                RankedCandidate {
                    segment_id: row.get("segment_id"),
                    version_id: row.get("version_id"),
                    doc_type: row.get("doc_type"),
                    segment_index: row.get("segment_index"),
                    // FTS5 bm25 rank is lower-is-better; flip the sign
                    raw_score: -rank,
                    snippet: row.get("snippet"),
                }
            })
            .collect();

        Ok(candidates)
    }

    async fn count_for_version(&self, version_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM segments_fts WHERE version_id = ?")
                .bind(version_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn tenant_segment_count(&self, tenant_id: &str) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM segments_fts WHERE tenant_id = ?")
                .bind(tenant_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}

#[async_trait]
impl VectorIndex for SqliteIndexes {
    async fn replace_version(
        &self,
        version: &DocumentVersion,
        entries: &[VectorEntry],
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM segment_vectors WHERE version_id = ?")
            .bind(&version.id)
            .execute(&mut *tx)
            .await?;

        for entry in entries {
            let blob = vec_to_blob(&entry.vector);
            sqlx::query(
                r#"
                INSERT INTO segment_vectors (segment_id, version_id, tenant_id, doc_type, segment_index, snippet, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(segment_id) DO UPDATE SET
                    version_id = excluded.version_id,
                    tenant_id = excluded.tenant_id,
                    doc_type = excluded.doc_type,
                    segment_index = excluded.segment_index,
                    snippet = excluded.snippet,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&entry.segment_id)
            .bind(&version.id)
            .bind(&version.tenant_id)
            .bind(&version.doc_type)
            .bind(entry.segment_index)
            .bind(&entry.snippet)
            .bind(&blob)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(entries.len() as u64)
    }

    async fn search(
        &self,
        query_vec: &[f32],
        tenant_id: &str,
        filter: &QueryFilter,
        limit: i64,
    ) -> Result<Vec<RankedCandidate>> {
        let mut sql = String::from(
            r#"
            SELECT segment_id, version_id, doc_type, segment_index, snippet, embedding
            FROM segment_vectors
            WHERE tenant_id = ?
            "#,
        );
        if let Some(placeholders) = doc_type_predicate(filter) {
            sql.push_str(&format!(" AND doc_type IN ({})", placeholders));
        }

        let mut q = sqlx::query(&sql).bind(tenant_id);
        for dt in &filter.doc_types {
            q = q.bind(dt);
        }
        let rows = q.fetch_all(&self.pool).await?;

        let mut candidates: Vec<RankedCandidate> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let vec = blob_to_vec(&blob);
                RankedCandidate {
                    segment_id: row.get("segment_id"),
                    version_id: row.get("version_id"),
                    doc_type: row.get("doc_type"),
                    segment_index: row.get("segment_index"),
                    raw_score: cosine_similarity(query_vec, &vec) as f64,
                    snippet: row.get("snippet"),
                }
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
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM segment_vectors WHERE version_id = ?")
                .bind(version_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }
}
