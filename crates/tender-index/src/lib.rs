//! # Tender Index
//!
//! Dual-index ingestion and hybrid retrieval for tender documents, behind a
//! migration gate.
//!
//! The legacy retrieval stack is full-text only. This crate runs a second,
//! vector-augmented index side by side with it and moves traffic between
//! the two per capability and per tenant, without a flag day:
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌─────────────────┐
//! │ Segments │──▶│  IndexWriter   │──▶│ SQLite           │
//! │ (chunked)│   │ lexical+vector │   │ FTS5 + vectors   │
//! └──────────┘   └───────────────┘   └───────┬─────────┘
//!                                            │
//!                  ┌────────────────┐        │
//!   query ───────▶ │ MigrationGate  │◀───────┤
//!                  │ OLD/SHADOW/    │        │
//!                  │ PREFER_NEW/    │   ┌────┴─────┐  ┌──────────┐
//!                  │ NEW_ONLY       │──▶│ Legacy   │  │ Hybrid   │
//!                  └────────────────┘   │ (FTS5)   │  │ (RRF)    │
//!                                       └──────────┘  └──────────┘
//! ```
//!
//! Modes are read from the environment (`RETRIEVAL_MODE`, `INGEST_MODE`,
//! `CUTOVER_TENANT_OVERRIDES`, ...); see
//! [`tender_index_core::cutover::CutoverConfig`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite-backed lexical and vector indexes |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`ingest`] | Idempotent dual-index write path |
//! | [`retrieve`] | Hybrid (RRF) retrieval |
//! | [`legacy`] | Pre-migration lexical-only implementations |
//! | [`gate`] | Mode-driven execution of legacy vs new |
//! | [`shadow`] | Shadow diff recording |
//! | [`audit`] | Per-execution audit trail |
//! | [`server`] | Debug HTTP server |

pub mod audit;
pub mod config;
pub mod db;
pub mod embedding;
pub mod gate;
pub mod ingest;
pub mod legacy;
pub mod migrate;
pub mod retrieve;
pub mod server;
pub mod shadow;
pub mod sqlite_store;
