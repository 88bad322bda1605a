//! ARBITER — cross-venue arbitrage engine.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod venues;
pub mod loan;
pub mod risk;
pub mod engine;
pub mod storage;
