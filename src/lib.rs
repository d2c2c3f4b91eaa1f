//! DIARIA — daily lottery results ingestion and analytics.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod analytics;
pub mod config;
pub mod engine;
pub mod sources;
pub mod storage;
pub mod types;
