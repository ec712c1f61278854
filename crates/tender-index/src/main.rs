//! # Tender Index CLI (`tdx`)
//!
//! The `tdx` binary is the operator interface for the tender document
//! index. It covers schema initialization, document ingestion, retrieval,
//! cutover inspection, vector backfill, and the debug HTTP server.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tdx init` | Create the SQLite database and run schema migrations |
//! | `tdx ingest <file>` | Ingest one document version (segments split on blank lines) |
//! | `tdx retrieve "<query>"` | Retrieve segments through the migration gate |
//! | `tdx cutover resolve` | Show the resolved migration mode per capability |
//! | `tdx reingest <version-id>` | Re-run the vector stage for a version |
//! | `tdx status <version-id>` | Show per-version ingest counters |
//! | `tdx serve debug` | Start the debug HTTP server |
//!
//! Migration modes come from the environment, not the config file:
//!
//! ```bash
//! RETRIEVAL_MODE=SHADOW tdx retrieve "payment terms" --tenant acme
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use tender_index::config;
use tender_index::db;
use tender_index::ingest::IngestRequest;
use tender_index::migrate;
use tender_index::retrieve::RetrievalQuery;
use tender_index::server::{self, AppContext};
use tender_index_core::cutover::{Capability, RequestContext};
use tender_index_core::models::RetrievalResult;

/// Tender document indexing and retrieval, behind a migration gate.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/tdx.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "tdx",
    about = "Tender document indexing and retrieval, behind a migration gate",
    version,
    long_about = "tdx maintains a dual (full-text + vector) index over tender document \
    segments and serves hybrid retrieval. A per-capability, per-tenant migration gate \
    moves traffic from the legacy full-text path to the new hybrid path in stages \
    (OLD, SHADOW, PREFER_NEW, NEW_ONLY), controlled by environment variables."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tdx.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all tables (document versions,
    /// segments, FTS index, vectors, ingest status, audit, shadow diffs).
    /// Idempotent — running it multiple times is safe.
    Init,

    /// Ingest one document version from a text file.
    ///
    /// The file is split into segments on blank lines. Re-running with
    /// identical content and the same version is a no-op; changed content
    /// needs a new `--version`.
    Ingest {
        /// Path to the document text.
        file: PathBuf,

        /// Tenant that owns the document.
        #[arg(long)]
        tenant: String,

        /// Document type (e.g. `tender`, `amendment`, `clarification`).
        #[arg(long, default_value = "tender")]
        doc_type: String,

        /// Stable external document identifier.
        #[arg(long)]
        document_id: String,

        /// Version number of this document revision.
        #[arg(long, default_value_t = 1)]
        version: i64,
    },

    /// Retrieve segments through the migration gate.
    ///
    /// Which implementation answers (legacy full-text or new hybrid)
    /// depends on `RETRIEVAL_MODE` and any tenant overrides.
    Retrieve {
        /// The query string.
        query: String,

        /// Tenant to query.
        #[arg(long)]
        tenant: String,

        /// Restrict to a document type (repeatable).
        #[arg(long = "doc-type")]
        doc_types: Vec<String>,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<i64>,
    },

    /// Inspect cutover state.
    Cutover {
        #[command(subcommand)]
        action: CutoverAction,
    },

    /// Re-run the vector stage for an already-ingested version.
    ///
    /// Reads the stored segment texts back and embeds them with the
    /// configured provider. Use after enabling embeddings or after an
    /// embedding-stage failure.
    Reingest {
        /// Version id (as printed by `tdx ingest`).
        version_id: String,
    },

    /// Show per-version ingest counters and the last recorded error.
    Status {
        /// Version id.
        version_id: String,
    },

    /// Start a server.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Cutover inspection subcommands.
#[derive(Subcommand)]
enum CutoverAction {
    /// Print the resolved mode and the rule that produced it, per
    /// capability, for a tenant (or the global defaults).
    Resolve {
        /// Tenant to resolve for; omit for global defaults.
        #[arg(long)]
        tenant: Option<String>,

        /// Restrict to one capability; omit for all.
        #[arg(long)]
        capability: Option<String>,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the debug HTTP server.
    ///
    /// Binds to `[server].bind` and serves `/health`, `/debug/cutover`,
    /// `/debug/retrieval/probe`, and `/debug/ingest/status/{id}`.
    Debug,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            file,
            tenant,
            doc_type,
            document_id,
            version,
        } => {
            let text = std::fs::read_to_string(&file)?;
            let segments: Vec<String> = text
                .split("\n\n")
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string())
                .collect();
            anyhow::ensure!(
                !segments.is_empty(),
                "no non-empty segments in {}",
                file.display()
            );
            println!("Read {} segments from {}", segments.len(), file.display());

            let ctx = AppContext::from_config(&cfg).await?;
            let request = IngestRequest {
                tenant_id: tenant.clone(),
                doc_type,
                document_id,
                version,
                document_hash: None,
                segments,
            };
            let legacy_writer = ctx.writer.clone();
            let new_writer = ctx.writer.clone();
            let legacy_request = request.clone();
            let new_request = request.clone();

            let (result, meta) = ctx
                .gate
                .execute(
                    Capability::Ingest,
                    &tenant,
                    &RequestContext::default(),
                    move || {
                        Box::pin(
                            async move { legacy_writer.ingest_lexical_only(legacy_request).await },
                        )
                    },
                    move || Box::pin(async move { new_writer.ingest(new_request).await }),
                )
                .await?;

            println!(
                "Ingested via {} path ({} mode): {} segments, {} lexical, {} vectors, {} pending",
                meta.path,
                meta.mode,
                result.segment_count,
                result.lexical_count,
                result.vector_count,
                result.vectors_pending
            );
        }
        Commands::Retrieve {
            query,
            tenant,
            doc_types,
            limit,
        } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let retrieval = RetrievalQuery {
                tenant_id: tenant.clone(),
                query,
                doc_types,
                top_k: limit,
            };
            let legacy = ctx.legacy.clone();
            let hybrid = ctx.hybrid.clone();
            let legacy_query = retrieval.clone();
            let hybrid_query = retrieval.clone();

            let (results, meta) = ctx
                .gate
                .execute(
                    Capability::Retrieval,
                    &tenant,
                    &RequestContext::default(),
                    move || Box::pin(async move { legacy.retrieve(&legacy_query).await }),
                    move || Box::pin(async move { hybrid.retrieve(&hybrid_query).await }),
                )
                .await?;

            if results.is_empty() {
                println!("No results. ({} path, {} mode)", meta.path, meta.mode);
            } else {
                println!(
                    "{} results ({} path, {} mode, {}ms):\n",
                    results.len(),
                    meta.path,
                    meta.mode,
                    meta.latency_ms
                );
                for (i, r) in results.iter().enumerate() {
                    print_result(i + 1, r);
                }
            }
        }
        Commands::Cutover { action } => match action {
            CutoverAction::Resolve { tenant, capability } => {
                let cutover = tender_index_core::cutover::CutoverConfig::from_env()?;
                let tenant = tenant.unwrap_or_default();
                let request = RequestContext::default();
                let caps: Vec<Capability> = match capability.as_deref() {
                    Some(raw) => vec![raw.parse()?],
                    None => Capability::ALL.to_vec(),
                };
                if tenant.is_empty() {
                    println!("Global defaults:");
                } else {
                    println!("Resolved modes for tenant '{}':", tenant);
                }
                for cap in caps {
                    let resolved = cutover.resolve(cap, &tenant, &request);
                    println!(
                        "  {:<10} {:<11} ({})",
                        cap.as_str(),
                        resolved.mode.as_str(),
                        resolved.rule
                    );
                }
                println!(
                    "Debug overrides: {}",
                    if cutover.debug_override_enabled() {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
            }
        },
        Commands::Reingest { version_id } => {
            let ctx = AppContext::from_config(&cfg).await?;
            let result = ctx.writer.reingest_vectors(&version_id).await?;
            println!(
                "Reingested vectors for {}: {} vectors, {} pending",
                version_id, result.vector_count, result.vectors_pending
            );
        }
        Commands::Status { version_id } => {
            let ctx = AppContext::from_config(&cfg).await?;
            match ctx.writer.status(&version_id).await? {
                Some(status) => {
                    println!("Version {}", version_id);
                    println!("  lexical:  {}", status.lexical_count);
                    println!("  vectors:  {}", status.vector_count);
                    println!("  pending:  {}", status.vectors_pending);
                    match status.last_error {
                        Some(e) => println!("  last error: {}", e),
                        None => println!("  last error: none"),
                    }
                }
                None => {
                    println!("No ingest status for version '{}'", version_id);
                    std::process::exit(1);
                }
            }
        }
        Commands::Serve { service } => match service {
            ServeService::Debug => {
                let ctx = AppContext::from_config(&cfg).await?;
                server::run_server(&cfg.server.bind, ctx).await?;
            }
        },
    }

    Ok(())
}

fn print_result(rank: usize, r: &RetrievalResult) {
    let sources: Vec<String> = r
        .provenance
        .iter()
        .map(|p| format!("{}#{}", p.source_index, p.rank))
        .collect();
    println!(
        "{}. [{:.4}] {} ({}, segment {}, {})",
        rank,
        r.score,
        r.segment_id,
        r.doc_type,
        r.segment_index,
        sources.join("+")
    );
    let snippet = r.snippet.replace('\n', " ");
    if !snippet.is_empty() {
        println!("   {}\n", snippet);
    }
}
