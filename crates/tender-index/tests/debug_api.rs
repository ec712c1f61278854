use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tender_index::audit::SqliteAuditSink;
use tender_index::config::{Config, RetrievalConfig};
use tender_index::embedding::create_provider;
use tender_index::gate::MigrationGate;
use tender_index::ingest::{IndexWriter, IngestRequest};
use tender_index::legacy::LegacyRetriever;
use tender_index::migrate;
use tender_index::retrieve::HybridRetriever;
use tender_index::server::{build_router, AppContext};
use tender_index::shadow::ShadowDiffRecorder;
use tender_index::sqlite_store::SqliteIndexes;
use tender_index_core::cutover::CutoverConfig;

struct TestServer {
    base_url: String,
    writer: Arc<IndexWriter>,
    _tmp: TempDir,
}

/// Wires a full application context over a file-backed database and serves
/// it on an ephemeral port.
async fn start_server(env: &[(&str, &str)]) -> TestServer {
    let tmp = TempDir::new().unwrap();
    let config = Config {
        db: tender_index::config::DbConfig {
            path: tmp.path().join("tdx.sqlite"),
        },
        retrieval: RetrievalConfig::default(),
        embedding: tender_index::config::EmbeddingConfig::default(),
        shadow: tender_index::config::ShadowConfig::default(),
        server: tender_index::config::ServerConfig {
            bind: "127.0.0.1:0".to_string(),
        },
    };

    let pool = tender_index::db::connect(&config).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let vars: HashMap<String, String> = env
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let cutover = Arc::new(CutoverConfig::from_env_map(&vars).unwrap());

    let indexes = Arc::new(SqliteIndexes::new(pool.clone()));
    let provider: Arc<dyn tender_index::embedding::EmbeddingProvider> =
        create_provider(&config.embedding).unwrap().into();
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
    let legacy = Arc::new(LegacyRetriever::new(indexes, config.retrieval.clone()));
    let gate = Arc::new(MigrationGate::new(
        cutover.clone(),
        Arc::new(ShadowDiffRecorder::new(pool.clone(), 0.7)),
        Arc::new(SqliteAuditSink::new(pool.clone())),
        Duration::from_secs(5),
    ));

    let context = Arc::new(AppContext {
        pool,
        cutover,
        gate,
        hybrid,
        legacy,
        writer: writer.clone(),
    });

    let app = build_router(context);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        writer,
        _tmp: tmp,
    }
}

async fn seed(writer: &IndexWriter) {
    writer
        .ingest(IngestRequest {
            tenant_id: "acme".to_string(),
            doc_type: "tender".to_string(),
            document_id: "tender-1".to_string(),
            version: 1,
            document_hash: None,
            segments: vec![
                "Payment terms are net thirty days.".to_string(),
                "Delivery schedule spans twelve weeks.".to_string(),
            ],
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_health() {
    let server = start_server(&[]).await;
    let body: serde_json::Value = reqwest::get(format!("{}/health", server.base_url))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_cutover_endpoint_reports_modes() {
    let server = start_server(&[
        ("RETRIEVAL_MODE", "SHADOW"),
        (
            "CUTOVER_TENANT_OVERRIDES",
            r#"{"retrieval": {"NEW_ONLY": ["acme"]}}"#,
        ),
    ])
    .await;

    let body: serde_json::Value = reqwest::get(format!(
        "{}/debug/cutover?tenant_id=acme",
        server.base_url
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    assert_eq!(body["tenant_id"], "acme");
    assert_eq!(body["debug_override_enabled"], false);
    let retrieval = body["capabilities"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["capability"] == "retrieval")
        .unwrap();
    assert_eq!(retrieval["global_mode"], "SHADOW");
    assert_eq!(retrieval["tenant_override"], "NEW_ONLY");
    assert_eq!(retrieval["resolved_mode"], "NEW_ONLY");
    assert_eq!(retrieval["rule"], "tenant_override");

    let ingest = body["capabilities"]
        .as_array()
        .unwrap()
        .iter()
        .find(|c| c["capability"] == "ingest")
        .unwrap();
    assert_eq!(ingest["resolved_mode"], "OLD");
    assert_eq!(ingest["rule"], "global_default");
}

#[tokio::test]
async fn test_cutover_endpoint_single_capability() {
    let server = start_server(&[("RETRIEVAL_MODE", "PREFER_NEW")]).await;

    let body: serde_json::Value = reqwest::get(format!(
        "{}/debug/cutover?capability=retrieval",
        server.base_url
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    let caps = body["capabilities"].as_array().unwrap();
    assert_eq!(caps.len(), 1);
    assert_eq!(caps[0]["capability"], "retrieval");
    assert_eq!(caps[0]["resolved_mode"], "PREFER_NEW");
    assert!(caps[0]["tenant_override"].is_null());
}

#[tokio::test]
async fn test_probe_runs_through_gate() {
    let server = start_server(&[("RETRIEVAL_MODE", "NEW_ONLY")]).await;
    seed(&server.writer).await;

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{}/debug/retrieval/probe", server.base_url))
        .query(&[("tenant_id", "acme"), ("query", "payment terms")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["resolved_mode"], "NEW_ONLY");
    assert_eq!(body["path_used"], "new");
    assert!(!body["correlation_id"].as_str().unwrap().is_empty());
    let results = body["results"].as_array().unwrap();
    assert!(!results.is_empty());
    assert!(results[0]["snippet"]
        .as_str()
        .unwrap()
        .to_lowercase()
        .contains("payment"));
}

#[tokio::test]
async fn test_probe_force_mode_forbidden_by_default() {
    let server = start_server(&[]).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/debug/retrieval/probe", server.base_url))
        .header("X-Force-Mode", "NEW_ONLY")
        .query(&[("tenant_id", "acme"), ("query", "payment terms")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 403);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "forbidden");
}

#[tokio::test]
async fn test_probe_force_mode_when_enabled() {
    let server = start_server(&[
        ("RETRIEVAL_MODE", "OLD"),
        ("DEBUG_MODE_OVERRIDE_ENABLED", "true"),
    ])
    .await;
    seed(&server.writer).await;

    let client = reqwest::Client::new();
    let body: serde_json::Value = client
        .get(format!("{}/debug/retrieval/probe", server.base_url))
        .header("X-Force-Mode", "NEW_ONLY")
        .query(&[("tenant_id", "acme"), ("query", "delivery schedule")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(body["resolved_mode"], "NEW_ONLY");
    assert_eq!(body["path_used"], "new");
}

#[tokio::test]
async fn test_probe_empty_query_is_bad_request() {
    let server = start_server(&[("RETRIEVAL_MODE", "NEW_ONLY")]).await;
    seed(&server.writer).await;

    let client = reqwest::Client::new();
    let resp = client
        .get(format!("{}/debug/retrieval/probe", server.base_url))
        .query(&[("tenant_id", "acme"), ("query", "   ")])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status().as_u16(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_ingest_status_endpoint() {
    let server = start_server(&[]).await;
    seed(&server.writer).await;

    let version_id: String =
        sqlx::query_scalar("SELECT id FROM document_versions")
            .fetch_one(server.writer.pool())
            .await
            .unwrap();

    let body: serde_json::Value = reqwest::get(format!(
        "{}/debug/ingest/status?document_version_id={}",
        server.base_url, version_id
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();

    assert_eq!(body["version_id"], version_id);
    assert_eq!(body["lexical_count"], 2);
    assert_eq!(body["vectors_pending"], 2);

    let resp = reqwest::get(format!(
        "{}/debug/ingest/status?document_version_id=no-such-version",
        server.base_url
    ))
    .await
    .unwrap();
    assert_eq!(resp.status().as_u16(), 404);
}
