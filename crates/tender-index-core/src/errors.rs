//! Error taxonomy for the ingestion, retrieval, and cutover paths.
//!
//! The gate and the ingestion pipeline branch on failure *class* (timeout
//! vs backend rejection, which ingest stage failed), so these are concrete
//! `thiserror` types rather than opaque `anyhow` chains. Application code
//! still wraps them in `anyhow::Error` at the CLI/HTTP boundary.

use thiserror::Error;

/// Errors from cutover configuration parsing and mode resolution.
#[derive(Debug, Error)]
pub enum CutoverError {
    /// A capability name outside the fixed, known set.
    #[error("unknown capability: '{0}' (known: retrieval, ingest, extract, review, rules)")]
    UnknownCapability(String),

    /// A mode string outside `OLD|SHADOW|PREFER_NEW|NEW_ONLY`.
    #[error("unknown migration mode: '{0}' (expected OLD, SHADOW, PREFER_NEW, or NEW_ONLY)")]
    UnknownMode(String),

    /// `CUTOVER_TENANT_OVERRIDES` did not parse as the expected JSON shape.
    #[error("invalid CUTOVER_TENANT_OVERRIDES: {0}")]
    InvalidOverrides(String),
}

/// A request rejected before any backend work ran: empty tenant, blank
/// query, no segments. The debug surface maps this to HTTP 400.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct InvalidInput(String);

impl InvalidInput {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// The stage of ingestion at which a failure occurred.
///
/// Partial failures are retryable per stage with the same idempotency key:
/// a `VectorWrite` failure after a successful lexical write only needs the
/// vector stage re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    Embedding,
    LexicalWrite,
    VectorWrite,
}

impl std::fmt::Display for IngestStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestStage::Embedding => write!(f, "embedding"),
            IngestStage::LexicalWrite => write!(f, "lexical_write"),
            IngestStage::VectorWrite => write!(f, "vector_write"),
        }
    }
}

/// Ingestion failure carrying the stage that failed.
#[derive(Debug, Error)]
#[error("ingest failed at stage '{stage}': {cause}")]
pub struct IngestError {
    pub stage: IngestStage,
    #[source]
    pub cause: anyhow::Error,
}

impl IngestError {
    pub fn new(stage: IngestStage, cause: anyhow::Error) -> Self {
        Self { stage, cause }
    }
}

/// Retrieval failure, distinguishing "too slow" from "backend rejected".
///
/// Callers use the variant to pick a retry strategy; the gate's fallback
/// and shadow-detachment logic both branch on it.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("retrieval timed out after {timeout_ms}ms ({index} index)")]
    Timeout { index: &'static str, timeout_ms: u64 },

    #[error("retrieval backend error ({index} index): {cause}")]
    Backend {
        index: &'static str,
        #[source]
        cause: anyhow::Error,
    },
}

/// Failures surfaced by the migration gate itself.
#[derive(Debug, Error)]
pub enum GateError {
    /// Both the new and the legacy path failed in PREFER_NEW mode.
    ///
    /// The legacy error is the one displayed to the end caller so that
    /// pre-migration callers see unchanged behavior; the new-path error is
    /// retained for diagnosis.
    #[error("{capability} failed for tenant '{tenant_id}': {legacy_error}")]
    FallbackExhausted {
        capability: String,
        tenant_id: String,
        legacy_error: String,
        new_error: String,
    },

    /// The new path failed in NEW_ONLY mode. Terminal — no fallback.
    #[error("{capability} (new implementation) failed for tenant '{tenant_id}': {cause}")]
    NewOnly {
        capability: String,
        tenant_id: String,
        cause: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ingest_stage_display() {
        assert_eq!(IngestStage::Embedding.to_string(), "embedding");
        assert_eq!(IngestStage::LexicalWrite.to_string(), "lexical_write");
        assert_eq!(IngestStage::VectorWrite.to_string(), "vector_write");
    }

    #[test]
    fn test_fallback_exhausted_displays_legacy_error() {
        let err = GateError::FallbackExhausted {
            capability: "retrieval".to_string(),
            tenant_id: "t1".to_string(),
            legacy_error: "fts index corrupt".to_string(),
            new_error: "embedding provider down".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("fts index corrupt"));
        assert!(!msg.contains("embedding provider down"));
    }

    #[test]
    fn test_new_only_names_capability_and_tenant() {
        let err = GateError::NewOnly {
            capability: "ingest".to_string(),
            tenant_id: "acme".to_string(),
            cause: "vector write failed".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("ingest"));
        assert!(msg.contains("acme"));
        assert!(msg.contains("vector write failed"));
    }
}
