//! The migration gate: executes a capability invocation according to the
//! resolved cutover mode, wrapping a legacy and a new implementation that
//! share a result type.
//!
//! Mode semantics (exhaustive match, so adding or removing a mode is a
//! compile-time-checked change):
//!
//! - `OLD` — legacy only; result/error propagated unchanged.
//! - `SHADOW` — legacy is authoritative and returned to the caller; the
//!   new path runs as a detached task with a correlation id, bounded by
//!   the shadow timeout. Its success produces a shadow diff record; its
//!   failure or timeout is logged and swallowed. The detached task owns
//!   its inputs (the future is `'static`), so it never shares mutable
//!   state with the synchronous legacy path.
//! - `PREFER_NEW` — new first; on failure, one legacy fallback. If the
//!   fallback also fails the legacy error surfaces (behavior equivalence
//!   with pre-migration callers) and the new error rides along in
//!   [`GateError::FallbackExhausted`].
//! - `NEW_ONLY` — new only; failure is wrapped with capability/tenant
//!   context and propagated. The legacy path is never invoked.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tracing::{debug, warn};
use uuid::Uuid;

use tender_index_core::cutover::{
    Capability, CutoverConfig, MigrationMode, RequestContext, Resolved,
};
use tender_index_core::diff::Summary;
use tender_index_core::errors::GateError;
use tender_index_core::models::{IngestResult, RetrievalResult};

use crate::audit::{AuditSink, ExecutionMeta, ExecutionPath};
use crate::shadow::ShadowDiffRecorder;

/// Boxed future produced by a capability implementation.
///
/// `'static` so the shadow path can be detached onto the runtime.
pub type CapabilityFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'static>>;

/// Reduce a capability result to a bounded summary for shadow diffing.
pub trait DiffSummarize {
    fn diff_summary(&self) -> Summary;
}

impl DiffSummarize for Vec<RetrievalResult> {
    fn diff_summary(&self) -> Summary {
        Summary::retrieval(self.iter().map(|r| r.segment_id.clone()))
    }
}

impl DiffSummarize for IngestResult {
    fn diff_summary(&self) -> Summary {
        Summary::fields([
            ("segment_count", self.segment_count.to_string()),
            ("lexical_count", self.lexical_count.to_string()),
            ("vector_count", self.vector_count.to_string()),
        ])
    }
}

pub struct MigrationGate {
    cutover: Arc<CutoverConfig>,
    recorder: Arc<ShadowDiffRecorder>,
    audit: Arc<dyn AuditSink>,
    shadow_timeout: Duration,
}

impl MigrationGate {
    pub fn new(
        cutover: Arc<CutoverConfig>,
        recorder: Arc<ShadowDiffRecorder>,
        audit: Arc<dyn AuditSink>,
        shadow_timeout: Duration,
    ) -> Self {
        Self {
            cutover,
            recorder,
            audit,
            shadow_timeout,
        }
    }

    pub fn cutover(&self) -> &Arc<CutoverConfig> {
        &self.cutover
    }

    /// Execute a capability invocation under the resolved mode.
    ///
    /// `legacy_fn`/`new_fn` are invoked at most once each; in SHADOW mode
    /// `new_fn` is called up front so its future owns an independent
    /// snapshot of the inputs before the legacy path runs.
    pub async fn execute<T, L, N>(
        &self,
        capability: Capability,
        tenant_id: &str,
        request: &RequestContext,
        legacy_fn: L,
        new_fn: N,
    ) -> Result<(T, ExecutionMeta)>
    where
        T: DiffSummarize + Send + 'static,
        L: FnOnce() -> CapabilityFuture<T>,
        N: FnOnce() -> CapabilityFuture<T>,
    {
        let resolved = self.cutover.resolve(capability, tenant_id, request);
        let correlation_id = Uuid::new_v4().to_string();
        debug!(
            capability = %capability,
            tenant_id,
            mode = %resolved.mode,
            rule = %resolved.rule,
            correlation_id,
            "resolved migration mode"
        );

        let started = Instant::now();

        let outcome = match resolved.mode {
            MigrationMode::Old => {
                let result = legacy_fn().await;
                self.finish(
                    capability,
                    tenant_id,
                    &resolved,
                    ExecutionPath::Legacy,
                    started,
                    &correlation_id,
                    None,
                    result,
                )
                .await
            }
            MigrationMode::Shadow => {
                let new_future = new_fn();
                let legacy_result = legacy_fn().await;

                self.spawn_shadow(
                    capability,
                    tenant_id,
                    &correlation_id,
                    legacy_result.as_ref().ok().map(|v| v.diff_summary()),
                    new_future,
                );

                self.finish(
                    capability,
                    tenant_id,
                    &resolved,
                    ExecutionPath::Legacy,
                    started,
                    &correlation_id,
                    None,
                    legacy_result,
                )
                .await
            }
            MigrationMode::PreferNew => match new_fn().await {
                Ok(value) => {
                    self.finish(
                        capability,
                        tenant_id,
                        &resolved,
                        ExecutionPath::New,
                        started,
                        &correlation_id,
                        None,
                        Ok(value),
                    )
                    .await
                }
                Err(new_err) => {
                    warn!(
                        capability = %capability,
                        tenant_id,
                        correlation_id,
                        error = %new_err,
                        "new path failed, falling back to legacy"
                    );
                    let fallback_reason = new_err.to_string();
                    match legacy_fn().await {
                        Ok(value) => {
                            self.finish(
                                capability,
                                tenant_id,
                                &resolved,
                                ExecutionPath::Fallback,
                                started,
                                &correlation_id,
                                Some(fallback_reason),
                                Ok(value),
                            )
                            .await
                        }
                        Err(legacy_err) => {
                            let err = GateError::FallbackExhausted {
                                capability: capability.as_str().to_string(),
                                tenant_id: tenant_id.to_string(),
                                legacy_error: legacy_err.to_string(),
                                new_error: fallback_reason.clone(),
                            };
                            self.finish(
                                capability,
                                tenant_id,
                                &resolved,
                                ExecutionPath::Fallback,
                                started,
                                &correlation_id,
                                Some(fallback_reason),
                                Err(anyhow::Error::new(err)),
                            )
                            .await
                        }
                    }
                }
            },
            MigrationMode::NewOnly => {
                let result = new_fn().await.map_err(|e| {
                    anyhow::Error::new(GateError::NewOnly {
                        capability: capability.as_str().to_string(),
                        tenant_id: tenant_id.to_string(),
                        cause: format!("{:#}", e),
                    })
                });
                self.finish(
                    capability,
                    tenant_id,
                    &resolved,
                    ExecutionPath::New,
                    started,
                    &correlation_id,
                    None,
                    result,
                )
                .await
            }
        };

        outcome
    }

    /// Detach the new path in SHADOW mode. Never blocks the caller.
    fn spawn_shadow<T>(
        &self,
        capability: Capability,
        tenant_id: &str,
        correlation_id: &str,
        legacy_summary: Option<Summary>,
        new_future: CapabilityFuture<T>,
    ) where
        T: DiffSummarize + Send + 'static,
    {
        let recorder = self.recorder.clone();
        let tenant_id = tenant_id.to_string();
        let correlation_id = correlation_id.to_string();
        let timeout = self.shadow_timeout;

        tokio::spawn(async move {
            match tokio::time::timeout(timeout, new_future).await {
                Ok(Ok(new_value)) => {
                    if let Some(legacy_summary) = legacy_summary {
                        recorder
                            .record(
                                capability,
                                &tenant_id,
                                &correlation_id,
                                &legacy_summary,
                                &new_value.diff_summary(),
                            )
                            .await;
                    } else {
                        // legacy failed; nothing to diff against
                        debug!(
                            capability = %capability,
                            tenant_id,
                            correlation_id,
                            "shadow new path succeeded but legacy failed"
                        );
                    }
                }
                Ok(Err(e)) => {
                    warn!(
                        capability = %capability,
                        tenant_id,
                        correlation_id,
                        error = %e,
                        "shadow new path failed"
                    );
                }
                Err(_) => {
                    warn!(
                        capability = %capability,
                        tenant_id,
                        correlation_id,
                        timeout_secs = timeout.as_secs(),
                        "shadow new path abandoned after timeout"
                    );
                }
            }
        });
    }

    /// Build the [`ExecutionMeta`], persist it, and return the outcome.
    #[allow(clippy::too_many_arguments)]
    async fn finish<T>(
        &self,
        capability: Capability,
        tenant_id: &str,
        resolved: &Resolved,
        path: ExecutionPath,
        started: Instant,
        correlation_id: &str,
        fallback_reason: Option<String>,
        result: Result<T>,
    ) -> Result<(T, ExecutionMeta)> {
        let meta = ExecutionMeta {
            capability,
            tenant_id: tenant_id.to_string(),
            mode: resolved.mode,
            path,
            latency_ms: started.elapsed().as_millis() as u64,
            success: result.is_ok(),
            error: result.as_ref().err().map(|e| e.to_string()),
            fallback_reason,
            correlation_id: correlation_id.to_string(),
        };

        if let Err(e) = self.audit.record(&meta).await {
            warn!(
                capability = %capability,
                correlation_id,
                error = %e,
                "failed to persist execution audit"
            );
        }

        result.map(|value| (value, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::audit::MemoryAuditSink;

    fn cutover_with(mode: &str) -> Arc<CutoverConfig> {
        let vars: HashMap<String, String> =
            [("RETRIEVAL_MODE".to_string(), mode.to_string())].into();
        Arc::new(CutoverConfig::from_env_map(&vars).unwrap())
    }

    fn result_with(ids: &[&str]) -> Vec<RetrievalResult> {
        ids.iter()
            .map(|id| RetrievalResult {
                segment_id: id.to_string(),
                version_id: "v1".to_string(),
                doc_type: "tender".to_string(),
                segment_index: 0,
                score: 1.0,
                snippet: String::new(),
                provenance: Vec::new(),
            })
            .collect()
    }

    struct Harness {
        gate: MigrationGate,
        audit: Arc<MemoryAuditSink>,
        recorder: Arc<ShadowDiffRecorder>,
    }

    fn harness(mode: &str) -> Harness {
        let audit = Arc::new(MemoryAuditSink::new());
        let recorder = Arc::new(ShadowDiffRecorder::in_memory(0.7));
        let gate = MigrationGate::new(
            cutover_with(mode),
            recorder.clone(),
            audit.clone(),
            Duration::from_secs(5),
        );
        Harness {
            gate,
            audit,
            recorder,
        }
    }

    #[tokio::test]
    async fn test_old_mode_runs_legacy_only() {
        let h = harness("OLD");
        let legacy_calls = Arc::new(AtomicUsize::new(0));
        let new_calls = Arc::new(AtomicUsize::new(0));

        let lc = legacy_calls.clone();
        let nc = new_calls.clone();
        let (value, meta) = h
            .gate
            .execute(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                move || {
                    lc.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(result_with(&["s1"])) })
                },
                move || {
                    nc.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(result_with(&["s2"])) })
                },
            )
            .await
            .unwrap();

        assert_eq!(value[0].segment_id, "s1");
        assert_eq!(meta.path, ExecutionPath::Legacy);
        assert_eq!(meta.mode, MigrationMode::Old);
        assert_eq!(legacy_calls.load(Ordering::SeqCst), 1);
        assert_eq!(new_calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.audit.entries().len(), 1);
    }

    #[tokio::test]
    async fn test_prefer_new_uses_new_on_success() {
        let h = harness("PREFER_NEW");
        let (value, meta) = h
            .gate
            .execute(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                || Box::pin(async { Ok(result_with(&["legacy"])) }),
                || Box::pin(async { Ok(result_with(&["new"])) }),
            )
            .await
            .unwrap();

        assert_eq!(value[0].segment_id, "new");
        assert_eq!(meta.path, ExecutionPath::New);
        assert!(meta.fallback_reason.is_none());
    }

    #[tokio::test]
    async fn test_prefer_new_falls_back_on_failure() {
        // P5: failing new + succeeding legacy → legacy result, path=fallback
        let h = harness("PREFER_NEW");
        let (value, meta) = h
            .gate
            .execute(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                || Box::pin(async { Ok(result_with(&["legacy"])) }),
                || Box::pin(async { Err(anyhow::anyhow!("vector index offline")) }),
            )
            .await
            .unwrap();

        assert_eq!(value[0].segment_id, "legacy");
        assert_eq!(meta.path, ExecutionPath::Fallback);
        assert_eq!(
            meta.fallback_reason.as_deref(),
            Some("vector index offline")
        );
    }

    #[tokio::test]
    async fn test_prefer_new_both_fail_surfaces_legacy_error() {
        let h = harness("PREFER_NEW");
        let err = h
            .gate
            .execute::<Vec<RetrievalResult>, _, _>(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                || Box::pin(async { Err(anyhow::anyhow!("fts corrupt")) }),
                || Box::pin(async { Err(anyhow::anyhow!("embedder down")) }),
            )
            .await
            .unwrap_err();

        let gate_err = err.downcast_ref::<GateError>().unwrap();
        match gate_err {
            GateError::FallbackExhausted {
                legacy_error,
                new_error,
                ..
            } => {
                assert_eq!(legacy_error, "fts corrupt");
                assert_eq!(new_error, "embedder down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // displayed message carries the legacy error
        assert!(err.to_string().contains("fts corrupt"));
    }

    #[tokio::test]
    async fn test_new_only_never_calls_legacy() {
        // P6: legacy call count must stay zero
        let h = harness("NEW_ONLY");
        let legacy_calls = Arc::new(AtomicUsize::new(0));

        let lc = legacy_calls.clone();
        let err = h
            .gate
            .execute::<Vec<RetrievalResult>, _, _>(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                move || {
                    lc.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(result_with(&["legacy"])) })
                },
                || Box::pin(async { Err(anyhow::anyhow!("not ready")) }),
            )
            .await
            .unwrap_err();

        assert_eq!(legacy_calls.load(Ordering::SeqCst), 0);
        let gate_err = err.downcast_ref::<GateError>().unwrap();
        assert!(matches!(gate_err, GateError::NewOnly { .. }));
        assert!(err.to_string().contains("retrieval"));
        assert!(err.to_string().contains("t1"));

        let entries = h.audit.entries();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
    }

    #[tokio::test]
    async fn test_shadow_returns_legacy_without_waiting() {
        // P7: a slow new path must not delay the caller
        let h = harness("SHADOW");
        let started = Instant::now();
        let (value, meta) = h
            .gate
            .execute(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                || Box::pin(async { Ok(result_with(&["s1"])) }),
                || {
                    Box::pin(async {
                        tokio::time::sleep(Duration::from_millis(400)).await;
                        Ok(result_with(&["s1"]))
                    })
                },
            )
            .await
            .unwrap();

        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(value[0].segment_id, "s1");
        assert_eq!(meta.path, ExecutionPath::Legacy);
    }

    #[tokio::test]
    async fn test_shadow_records_diff() {
        let h = harness("SHADOW");
        let _ = h
            .gate
            .execute(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                || Box::pin(async { Ok(result_with(&["s1", "s2"])) }),
                || Box::pin(async { Ok(result_with(&["s1", "s9"])) }),
            )
            .await
            .unwrap();

        // let the detached task complete
        for _ in 0..50 {
            if !h.recorder.recorded().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let records = h.recorder.recorded();
        assert_eq!(records.len(), 1);
        assert!((records[0].similarity - 0.5).abs() < 1e-9);
        assert!(records[0].significant);
    }

    #[tokio::test]
    async fn test_shadow_swallows_new_failure() {
        let h = harness("SHADOW");
        let result = h
            .gate
            .execute(
                Capability::Retrieval,
                "t1",
                &RequestContext::default(),
                || Box::pin(async { Ok(result_with(&["s1"])) }),
                || Box::pin(async { Err(anyhow::anyhow!("shadow boom")) }),
            )
            .await;

        assert!(result.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(h.recorder.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_request_override_forces_mode() {
        let vars: HashMap<String, String> = [
            ("RETRIEVAL_MODE".to_string(), "OLD".to_string()),
            (
                "DEBUG_MODE_OVERRIDE_ENABLED".to_string(),
                "true".to_string(),
            ),
        ]
        .into();
        let audit = Arc::new(MemoryAuditSink::new());
        let gate = MigrationGate::new(
            Arc::new(CutoverConfig::from_env_map(&vars).unwrap()),
            Arc::new(ShadowDiffRecorder::in_memory(0.7)),
            audit,
            Duration::from_secs(5),
        );

        let forced = RequestContext::forced(MigrationMode::NewOnly);
        let (value, meta) = gate
            .execute(
                Capability::Retrieval,
                "t1",
                &forced,
                || Box::pin(async { Ok(result_with(&["legacy"])) }),
                || Box::pin(async { Ok(result_with(&["new"])) }),
            )
            .await
            .unwrap();

        assert_eq!(value[0].segment_id, "new");
        assert_eq!(meta.mode, MigrationMode::NewOnly);
    }
}
