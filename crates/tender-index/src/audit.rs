//! Execution audit trail.
//!
//! Every gate execution, regardless of mode or outcome, produces an
//! [`ExecutionMeta`] that is persisted so operators can audit after the
//! fact without re-running. Audit failures never abort the caller's
//! request — they are logged and dropped.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use std::sync::Mutex;

use tender_index_core::cutover::{Capability, MigrationMode};

/// Which path produced the caller-visible result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPath {
    Legacy,
    New,
    Fallback,
}

impl std::fmt::Display for ExecutionPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionPath::Legacy => write!(f, "legacy"),
            ExecutionPath::New => write!(f, "new"),
            ExecutionPath::Fallback => write!(f, "fallback"),
        }
    }
}

/// Metadata attached to every gate execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionMeta {
    pub capability: Capability,
    pub tenant_id: String,
    pub mode: MigrationMode,
    pub path: ExecutionPath,
    pub latency_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    /// The new-path error that triggered a PREFER_NEW fallback.
    pub fallback_reason: Option<String>,
    pub correlation_id: String,
}

/// Persistence seam for [`ExecutionMeta`].
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, meta: &ExecutionMeta) -> Result<()>;
}

/// SQLite sink writing to `execution_audit`.
pub struct SqliteAuditSink {
    pool: SqlitePool,
}

impl SqliteAuditSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn record(&self, meta: &ExecutionMeta) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO execution_audit
                (capability, tenant_id, mode, path, latency_ms, success, error, fallback_reason, correlation_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(meta.capability.as_str())
        .bind(&meta.tenant_id)
        .bind(meta.mode.as_str())
        .bind(meta.path.to_string())
        .bind(meta.latency_ms as i64)
        .bind(meta.success)
        .bind(&meta.error)
        .bind(&meta.fallback_reason)
        .bind(&meta.correlation_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// In-memory sink for tests.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<ExecutionMeta>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ExecutionMeta> {
        self.entries.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, meta: &ExecutionMeta) -> Result<()> {
        self.entries.lock().unwrap().push(meta.clone());
        Ok(())
    }
}
