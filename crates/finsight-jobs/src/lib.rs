//! # finsight-jobs
//!
//! Durable orchestration of report processing.
//!
//! The worker claims `Report` rows directly from the repository (the report
//! record is the durable task), runs them through the analysis state
//! machine, and persists the output artifacts. Because the claim lives in
//! the database, orchestration survives the death of whatever request or
//! process started it: a crashed run leaves a stale lease that recovery
//! clears, making the report claimable again.

pub mod artifacts;
pub mod orchestrator;
pub mod recovery;
pub mod worker;

pub use artifacts::{ArtifactGenerator, ANALYSIS_ARTIFACT, REPORT_ARTIFACT};
pub use orchestrator::ReportOrchestrator;
pub use recovery::RecoveryService;
pub use worker::{ReportWorker, WorkerConfig, WorkerEvent, WorkerHandle};
