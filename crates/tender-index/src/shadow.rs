//! Shadow diff recording.
//!
//! Quantifies the divergence between a legacy and a new result after a
//! SHADOW-mode execution, and persists it for offline analysis. The
//! recorder must never abort the surrounding request: all internal errors
//! are caught and logged as recorder failures.

use sqlx::SqlitePool;
use std::sync::Mutex;
use tracing::{debug, warn};

use tender_index_core::cutover::Capability;
use tender_index_core::diff::{self, Summary};
use tender_index_core::models::ShadowDiffRecord;

enum DiffStore {
    Sqlite(SqlitePool),
    Memory(Mutex<Vec<ShadowDiffRecord>>),
}

pub struct ShadowDiffRecorder {
    store: DiffStore,
    threshold: f64,
}

impl ShadowDiffRecorder {
    pub fn new(pool: SqlitePool, threshold: f64) -> Self {
        Self {
            store: DiffStore::Sqlite(pool),
            threshold,
        }
    }

    /// Recorder backed by memory only, for unit tests.
    pub fn in_memory(threshold: f64) -> Self {
        Self {
            store: DiffStore::Memory(Mutex::new(Vec::new())),
            threshold,
        }
    }

    /// Records recorded so far (memory store only; empty for SQLite).
    pub fn recorded(&self) -> Vec<ShadowDiffRecord> {
        match &self.store {
            DiffStore::Memory(records) => records.lock().unwrap().clone(),
            DiffStore::Sqlite(_) => Vec::new(),
        }
    }

    /// Compare the two summaries and persist a [`ShadowDiffRecord`].
    ///
    /// Never returns an error; failures are logged with the correlation id
    /// so they can be matched against the shadow task's own logs.
    pub async fn record(
        &self,
        capability: Capability,
        tenant_id: &str,
        correlation_id: &str,
        legacy: &Summary,
        new: &Summary,
    ) {
        let similarity = diff::similarity(legacy, new);
        let significant = similarity < self.threshold;

        if significant {
            warn!(
                capability = %capability,
                tenant_id,
                correlation_id,
                similarity,
                "shadow outputs diverge significantly"
            );
        } else {
            debug!(
                capability = %capability,
                tenant_id,
                correlation_id,
                similarity,
                "shadow diff recorded"
            );
        }

        let record = ShadowDiffRecord {
            capability: capability.as_str().to_string(),
            tenant_id: tenant_id.to_string(),
            correlation_id: correlation_id.to_string(),
            legacy_summary: serde_json::to_string(legacy).unwrap_or_default(),
            new_summary: serde_json::to_string(new).unwrap_or_default(),
            similarity,
            significant,
            created_at: chrono::Utc::now().timestamp(),
        };

        if let Err(e) = self.persist(&record).await {
            warn!(
                capability = %capability,
                correlation_id,
                error = %e,
                "shadow diff recorder failed"
            );
        }
    }

    async fn persist(&self, record: &ShadowDiffRecord) -> anyhow::Result<()> {
        match &self.store {
            DiffStore::Sqlite(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO shadow_diffs
                        (capability, tenant_id, correlation_id, legacy_summary, new_summary, similarity, significant, created_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(&record.capability)
                .bind(&record.tenant_id)
                .bind(&record.correlation_id)
                .bind(&record.legacy_summary)
                .bind(&record.new_summary)
                .bind(record.similarity)
                .bind(record.significant)
                .bind(record.created_at)
                .execute(pool)
                .await?;
            }
            DiffStore::Memory(records) => {
                records.lock().unwrap().push(record.clone());
            }
        }
        Ok(())
    }
}
