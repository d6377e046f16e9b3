//! BYN realtime: rate coordination service
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod resilience;
pub mod broker;
pub mod fusion;
pub mod model;
pub mod ingest;
pub mod engine;
pub mod replay;
