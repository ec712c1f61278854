//! Schema creation. Idempotent — `tdx init` can run any number of times.

use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Document versions: content-addressed per tenant,
    // (tenant_id, document_hash, version) is the ingestion idempotency key.
    // Two tenants submitting byte-identical content get separate rows.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_versions (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            document_id TEXT NOT NULL,
            document_hash TEXT NOT NULL,
            version INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(tenant_id, document_hash, version)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segments (
            id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            hash TEXT NOT NULL,
            UNIQUE(version_id, segment_index),
            FOREIGN KEY (version_id) REFERENCES document_versions(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // FTS5 CREATE is not idempotent natively, so we check first
    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='segments_fts'",
    )
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE segments_fts USING fts5(
                segment_id UNINDEXED,
                version_id UNINDEXED,
                tenant_id UNINDEXED,
                doc_type UNINDEXED,
                text
            )
            "#,
        )
        .execute(pool)
        .await?;
    }

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS segment_vectors (
            segment_id TEXT PRIMARY KEY,
            version_id TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            doc_type TEXT NOT NULL,
            segment_index INTEGER NOT NULL,
            snippet TEXT NOT NULL DEFAULT '',
            embedding BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ingest_status (
            version_id TEXT PRIMARY KEY,
            lexical_count INTEGER NOT NULL DEFAULT 0,
            vector_count INTEGER NOT NULL DEFAULT 0,
            vectors_pending INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // ExecutionMeta audit trail: one row per gate execution, any mode.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS execution_audit (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            capability TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            mode TEXT NOT NULL,
            path TEXT NOT NULL,
            latency_ms INTEGER NOT NULL,
            success INTEGER NOT NULL,
            error TEXT,
            fallback_reason TEXT,
            correlation_id TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Shadow diffs: write-once, offline analysis only.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS shadow_diffs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            capability TEXT NOT NULL,
            tenant_id TEXT NOT NULL,
            correlation_id TEXT NOT NULL,
            legacy_summary TEXT NOT NULL,
            new_summary TEXT NOT NULL,
            similarity REAL NOT NULL,
            significant INTEGER NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_segments_version ON segments(version_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_versions_tenant ON document_versions(tenant_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_vectors_tenant ON segment_vectors(tenant_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_audit_capability ON execution_audit(capability, tenant_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_diffs_capability ON shadow_diffs(capability, significant)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[tokio::test]
    async fn test_migrations_idempotent() {
        let pool = db::connect_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_versions")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(count, 0);
    }
}
