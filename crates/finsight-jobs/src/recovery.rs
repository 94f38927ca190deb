//! Recovery of reports whose orchestration died mid-flight.
//!
//! A stuck client poller (or an operator) asks the gateway to recover a
//! report. Recovery consults the analyzer before giving up on work already
//! done: a finished analyzer task is harvested instead of re-run.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use finsight_core::{
    defaults, AnalyzerBackend, BlobStore, Error, RecoveryOutcome, Report, ReportRepository,
    ReportStatus, Result, TaskState,
};

use crate::artifacts::ArtifactGenerator;

/// Decides and applies the recovery action for one report.
pub struct RecoveryService {
    repo: Arc<dyn ReportRepository>,
    blobs: Arc<dyn BlobStore>,
    analyzer: Arc<dyn AnalyzerBackend>,
    artifacts: ArtifactGenerator,
}

impl RecoveryService {
    pub fn new(
        repo: Arc<dyn ReportRepository>,
        blobs: Arc<dyn BlobStore>,
        analyzer: Arc<dyn AnalyzerBackend>,
    ) -> Self {
        Self {
            repo,
            blobs: blobs.clone(),
            analyzer,
            artifacts: ArtifactGenerator::new(blobs),
        }
    }

    /// Recover one report. Safe to call on any report in any state; only
    /// in-flight reports are touched.
    pub async fn recover(&self, report_id: Uuid) -> Result<RecoveryOutcome> {
        let report = self
            .repo
            .get(report_id)
            .await?
            .ok_or(Error::ReportNotFound(report_id))?;

        let outcome = self.recover_report(&report).await?;
        info!(
            subsystem = "jobs",
            component = "recovery",
            report_id = %report_id,
            recovery_outcome = ?outcome,
            "Recovery finished"
        );
        Ok(outcome)
    }

    async fn recover_report(&self, report: &Report) -> Result<RecoveryOutcome> {
        // Terminal and not-yet-claimed reports need nothing: the worker
        // will pick up `uploaded` rows on its own.
        if report.status != ReportStatus::Processing {
            return Ok(RecoveryOutcome::NoActionNeeded);
        }

        // If a queued analyzer task exists, harvest its state first.
        if let Some(task_id) = &report.task_id {
            match self.analyzer.task_status(task_id).await {
                Ok(status) => match status.state {
                    TaskState::Completed => {
                        if let Some(outcome) = status.outcome {
                            return self.complete_from_task(report, &outcome).await;
                        }
                        // Completed but resultless: treat like a lost task.
                        warn!(
                            subsystem = "jobs",
                            component = "recovery",
                            task_id = %task_id,
                            "Analyzer task completed without a result"
                        );
                    }
                    TaskState::Failed | TaskState::Cancelled => {
                        let msg = status
                            .error_message
                            .unwrap_or_else(|| format!("analyzer task {task_id} failed"));
                        return self.fail_from_task(report, &msg).await;
                    }
                    TaskState::Pending | TaskState::Processing => {
                        return Ok(RecoveryOutcome::StillProcessing);
                    }
                },
                Err(e) if e.is_not_found() => {
                    // Analyzer lost the task; fall through to the lease check.
                }
                Err(e) if e.is_transient() => {
                    warn!(
                        subsystem = "jobs",
                        component = "recovery",
                        task_id = %task_id,
                        error = %e,
                        "Analyzer unreachable during recovery"
                    );
                    // Unreachable analyzer: fall through to the lease check.
                }
                Err(e) => return Err(e),
            }
        }

        // No usable analyzer state. A fresh lease means a live orchestration
        // still owns the report; a stale (or missing) lease means the run
        // died and the report should be resubmitted.
        let stale_cutoff = Utc::now() - Duration::seconds(defaults::CLAIM_STALE_SECS);
        let lease_live = report
            .claimed_at
            .map(|at| at >= stale_cutoff)
            .unwrap_or(false);

        if lease_live {
            return Ok(RecoveryOutcome::StillProcessing);
        }

        // Clearing the lease makes the row claimable again; the worker
        // restarts the state machine from the top.
        self.repo.release_claim(report.id).await?;
        Ok(RecoveryOutcome::ResetForResubmission)
    }

    /// The analyzer already finished: persist artifacts and complete the
    /// report without re-running the analysis.
    async fn complete_from_task(
        &self,
        report: &Report,
        outcome: &finsight_core::AnalysisOutcome,
    ) -> Result<RecoveryOutcome> {
        // Take over the dead run's lease first so a concurrently restarted
        // orchestration cannot double-complete.
        let stale_cutoff = Utc::now() - Duration::seconds(defaults::CLAIM_STALE_SECS);
        if self
            .repo
            .reclaim_stale(report.id, stale_cutoff)
            .await?
            .is_none()
        {
            // A live orchestration owns the report; it will harvest the
            // task itself.
            return Ok(RecoveryOutcome::StillProcessing);
        }

        let artifacts = self.artifacts.generate(report.id, outcome).await?;
        let summary = outcome
            .analysis
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match self
            .repo
            .mark_completed(
                report.id,
                &artifacts,
                summary.as_deref(),
                &outcome.analysis,
                outcome.processing_secs,
            )
            .await
        {
            Ok(()) => {
                self.reclaim_upload(report).await;
                Ok(RecoveryOutcome::CompletedFromTask)
            }
            Err(e) if e.is_not_found() => {
                // Cancelled while recovering; drop what we just wrote.
                self.artifacts.remove(&artifacts).await;
                Ok(RecoveryOutcome::NoActionNeeded)
            }
            Err(e) => Err(e),
        }
    }

    async fn fail_from_task(&self, report: &Report, error: &str) -> Result<RecoveryOutcome> {
        match self.repo.mark_failed(report.id, error).await {
            Ok(()) => {
                self.reclaim_upload(report).await;
                Ok(RecoveryOutcome::FailedFromTask)
            }
            Err(e) if e.is_not_found() => Ok(RecoveryOutcome::NoActionNeeded),
            Err(e) => Err(e),
        }
    }

    /// Best-effort removal of the raw upload once the report is terminal.
    async fn reclaim_upload(&self, report: &Report) {
        let Some(handle) = &report.upload_handle else {
            return;
        };
        if let Err(e) = self.blobs.delete(handle).await {
            warn!(
                subsystem = "jobs",
                component = "recovery",
                report_id = %report.id,
                blob_handle = %handle,
                error = %e,
                "Failed to reclaim raw upload"
            );
            return;
        }
        if let Err(e) = self.repo.clear_upload_handle(report.id).await {
            if !e.is_not_found() {
                warn!(
                    subsystem = "jobs",
                    component = "recovery",
                    report_id = %report.id,
                    error = %e,
                    "Failed to clear upload handle"
                );
            }
        }
    }
}
