//! DCA bot: weekly Kraken purchase with a Sunday fallback attempt.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod alerts;
pub mod config;
pub mod engine;
pub mod exchange;
pub mod metrics;
pub mod storage;
pub mod types;
