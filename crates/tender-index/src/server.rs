//! Debug HTTP server.
//!
//! A small JSON API for inspecting and exercising the migration state of a
//! running instance. It is an operator surface, not a tenant-facing one:
//! deploy it behind the same network boundary as the database.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/debug/cutover` | Resolved mode per capability for a tenant |
//! | `GET`  | `/debug/retrieval/probe` | Run a retrieval through the gate |
//! | `GET`  | `/debug/ingest/status` | Per-version ingest counters |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `forbidden` (403), `not_found` (404),
//! `timeout` (408), `internal` (500).
//!
//! # Forced modes
//!
//! `GET /debug/retrieval/probe` honors an `X-Force-Mode` header carrying a
//! migration mode name, but only when `DEBUG_MODE_OVERRIDE_ENABLED` is set;
//! otherwise the request is rejected with 403 rather than silently ignored.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use tender_index_core::cutover::{
    Capability, CutoverConfig, MigrationMode, RequestContext, Resolved,
};
use tender_index_core::errors::{InvalidInput, RetrievalError};
use tender_index_core::models::{IngestStatus, RetrievalResult};

use crate::audit::ExecutionMeta;
use crate::gate::MigrationGate;
use crate::ingest::IndexWriter;
use crate::legacy::LegacyRetriever;
use crate::retrieve::{HybridRetriever, RetrievalQuery};

/// Everything the handlers need, shared behind one `Arc`.
///
/// Also the wiring point for the CLI: commands that execute through the
/// gate build one of these from the loaded configuration.
pub struct AppContext {
    pub pool: sqlx::SqlitePool,
    pub cutover: Arc<CutoverConfig>,
    pub gate: Arc<MigrationGate>,
    pub hybrid: Arc<HybridRetriever>,
    pub legacy: Arc<LegacyRetriever>,
    pub writer: Arc<IndexWriter>,
}

impl AppContext {
    /// Connects to the database and wires every component from config and
    /// environment. Fails when the database does not exist yet; run `tdx
    /// init` first.
    pub async fn from_config(config: &crate::config::Config) -> anyhow::Result<Arc<Self>> {
        let pool = crate::db::connect(config).await?;
        let cutover = Arc::new(CutoverConfig::from_env()?);
        let indexes = Arc::new(crate::sqlite_store::SqliteIndexes::new(pool.clone()));
        let provider: Arc<dyn crate::embedding::EmbeddingProvider> =
            crate::embedding::create_provider(&config.embedding)?.into();

        let writer = Arc::new(IndexWriter::new(
            pool.clone(),
            indexes.clone(),
            indexes.clone(),
            provider.clone(),
            config.embedding.batch_size,
        ));
        let hybrid = Arc::new(HybridRetriever::new(
            indexes.clone(),
            indexes.clone(),
            provider,
            config.retrieval.clone(),
        ));
        let legacy = Arc::new(LegacyRetriever::new(
            indexes,
            config.retrieval.clone(),
        ));
        let gate = Arc::new(MigrationGate::new(
            cutover.clone(),
            Arc::new(crate::shadow::ShadowDiffRecorder::new(
                pool.clone(),
                config.shadow.diff_threshold,
            )),
            Arc::new(crate::audit::SqliteAuditSink::new(pool.clone())),
            std::time::Duration::from_secs(config.shadow.timeout_secs),
        ));

        Ok(Arc::new(Self {
            pool,
            cutover,
            gate,
            hybrid,
            legacy,
            writer,
        }))
    }
}

type AppState = Arc<AppContext>;

/// Builds the router; split out so tests can drive it in-process.
pub fn build_router(context: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/debug/cutover", get(handle_cutover))
        .route("/debug/retrieval/probe", get(handle_probe))
        .route("/debug/ingest/status", get(handle_ingest_status))
        .layer(cors)
        .with_state(context)
}

/// Binds and serves until the process is terminated.
pub async fn run_server(bind_addr: &str, context: AppState) -> anyhow::Result<()> {
    let app = build_router(context);
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(bind = bind_addr, "debug server listening");
    println!("Debug server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn forbidden(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::FORBIDDEN,
        code: "forbidden".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

/// Maps execution failures onto the error contract. Input-shaped failures
/// (empty query, empty tenant) become 400s; sub-query timeouts become 408.
fn classify_error(err: anyhow::Error) -> AppError {
    for cause in err.chain() {
        if let Some(invalid) = cause.downcast_ref::<InvalidInput>() {
            return bad_request(invalid.to_string());
        }
        if let Some(RetrievalError::Timeout { index, timeout_ms }) =
            cause.downcast_ref::<RetrievalError>()
        {
            return AppError {
                status: StatusCode::REQUEST_TIMEOUT,
                code: "timeout".to_string(),
                message: format!("{index} query timed out after {timeout_ms}ms"),
            };
        }
    }
    internal(err.to_string())
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Deserialize)]
struct CutoverParams {
    #[serde(default)]
    tenant_id: Option<String>,
    /// Restrict the report to one capability.
    #[serde(default)]
    capability: Option<String>,
}

#[derive(Serialize)]
struct CutoverResponse {
    tenant_id: String,
    debug_override_enabled: bool,
    capabilities: Vec<CapabilityState>,
}

#[derive(Serialize)]
struct CapabilityState {
    capability: String,
    global_mode: MigrationMode,
    tenant_override: Option<MigrationMode>,
    resolved_mode: MigrationMode,
    rule: tender_index_core::cutover::ResolutionRule,
}

/// The resolved cutover picture for one tenant, optionally narrowed to a
/// single capability. With no `tenant_id` it reports the global defaults.
async fn handle_cutover(
    State(state): State<AppState>,
    Query(params): Query<CutoverParams>,
) -> Result<Json<CutoverResponse>, AppError> {
    let tenant_id = params.tenant_id.unwrap_or_default();
    let request = RequestContext::default();

    let caps: Vec<Capability> = match params.capability.as_deref() {
        Some(raw) => vec![raw
            .parse::<Capability>()
            .map_err(|e| bad_request(e.to_string()))?],
        None => Capability::ALL.to_vec(),
    };

    let capabilities = caps
        .into_iter()
        .map(|cap| {
            let resolved: Resolved = state.cutover.resolve(cap, &tenant_id, &request);
            CapabilityState {
                capability: cap.as_str().to_string(),
                global_mode: state.cutover.global_mode(cap),
                tenant_override: state.cutover.tenant_override(cap, &tenant_id),
                resolved_mode: resolved.mode,
                rule: resolved.rule,
            }
        })
        .collect();
    Ok(Json(CutoverResponse {
        tenant_id,
        debug_override_enabled: state.cutover.debug_override_enabled(),
        capabilities,
    }))
}

#[derive(Deserialize)]
struct ProbeParams {
    tenant_id: String,
    query: String,
    /// Comma-separated document types.
    #[serde(default)]
    doc_types: Option<String>,
    #[serde(default)]
    top_k: Option<i64>,
}

#[derive(Serialize)]
struct ProbeResponse {
    resolved_mode: MigrationMode,
    path_used: String,
    latency_ms: u64,
    correlation_id: String,
    results: Vec<RetrievalResult>,
}

/// Runs a real retrieval through the migration gate and reports which path
/// served it, so operators can verify a mode change end to end.
async fn handle_probe(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ProbeParams>,
) -> Result<Json<ProbeResponse>, AppError> {
    let request = force_mode_from_headers(&headers, state.cutover.as_ref())?;

    if params.tenant_id.is_empty() {
        return Err(bad_request("tenant_id must not be empty"));
    }
    if params.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let doc_types = params
        .doc_types
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    let query = RetrievalQuery {
        tenant_id: params.tenant_id,
        query: params.query,
        doc_types,
        top_k: params.top_k,
    };
    let legacy = state.legacy.clone();
    let hybrid = state.hybrid.clone();
    let legacy_query = query.clone();
    let hybrid_query = query.clone();

    let (results, meta): (Vec<RetrievalResult>, ExecutionMeta) = state
        .gate
        .execute(
            Capability::Retrieval,
            &query.tenant_id,
            &request,
            move || Box::pin(async move { legacy.retrieve(&legacy_query).await }),
            move || Box::pin(async move { hybrid.retrieve(&hybrid_query).await }),
        )
        .await
        .map_err(classify_error)?;

    Ok(Json(ProbeResponse {
        resolved_mode: meta.mode,
        path_used: meta.path.to_string(),
        latency_ms: meta.latency_ms,
        correlation_id: meta.correlation_id,
        results,
    }))
}

#[derive(Deserialize)]
struct IngestStatusParams {
    document_version_id: String,
}

#[derive(Serialize)]
struct IngestStatusResponse {
    #[serde(flatten)]
    status: IngestStatus,
}

async fn handle_ingest_status(
    State(state): State<AppState>,
    Query(params): Query<IngestStatusParams>,
) -> Result<Json<IngestStatusResponse>, AppError> {
    let version_id = params.document_version_id;
    match state.writer.status(&version_id).await {
        Ok(Some(status)) => Ok(Json(IngestStatusResponse { status })),
        Ok(None) => Err(not_found(format!(
            "no ingest status for version '{version_id}'"
        ))),
        Err(e) => Err(internal(e.to_string())),
    }
}

/// Builds the per-request context from the `X-Force-Mode` header.
///
/// Rejects outright when the header is present but overrides are disabled,
/// so a probe can never silently run under a different mode than asked.
fn force_mode_from_headers(
    headers: &HeaderMap,
    cutover: &CutoverConfig,
) -> Result<RequestContext, AppError> {
    let raw = match headers.get("x-force-mode") {
        Some(v) => v,
        None => return Ok(RequestContext::default()),
    };
    if !cutover.debug_override_enabled() {
        return Err(forbidden(
            "X-Force-Mode requires DEBUG_MODE_OVERRIDE_ENABLED",
        ));
    }
    let raw = raw
        .to_str()
        .map_err(|_| bad_request("X-Force-Mode is not valid UTF-8"))?;
    let mode = raw
        .parse::<MigrationMode>()
        .map_err(|e| bad_request(e.to_string()))?;
    Ok(RequestContext::forced(mode))
}
