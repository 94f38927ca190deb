//! # finsight-analysis
//!
//! Client for the external document-analysis service.
//!
//! The analyzer is an HTTP service that accepts a base64-encoded document
//! and returns a structured analysis plus a rendered report. Two call
//! styles are supported:
//! - **Sync**: one long-lived request with a hard client-side deadline
//! - **Queued**: submit, then poll the analyzer-side task until terminal
//!
//! Errors are classified transient (timeout, connect failure, 5xx) or
//! terminal (4xx, explicit rejection, malformed result) so the
//! orchestrator can decide whether a retry is worthwhile.

pub mod client;
pub mod config;
pub mod mock;

pub use client::HttpAnalyzerBackend;
pub use config::{AnalyzerConfig, AnalyzerMode};
pub use mock::{MockAnalyzerBackend, MockOutcome};
