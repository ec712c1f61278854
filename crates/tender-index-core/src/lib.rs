//! # Tender Index Core
//!
//! Runtime-free logic for Tender Index: data models, the cutover
//! (migration-mode) configuration and resolver, Reciprocal Rank Fusion,
//! shadow-diff scoring, the dual index traits, and the error taxonomy.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other
//! native-only dependencies; everything here is unit-testable without a
//! database or network.

pub mod cutover;
pub mod diff;
pub mod errors;
pub mod fusion;
pub mod models;
pub mod store;
