//! The report processing state machine.
//!
//! `ReportOrchestrator::process` drives one claimed report from raw upload
//! to completed artifacts:
//!
//! 1. `file_upload` — fetch the raw upload from blob storage
//! 2. `ai_analysis` — build the analyzer request
//! 3. `ai_analyzing` — call the analyzer under a hard deadline, retrying
//!    transient failures up to the report's retry bound
//! 4. `generating_reports` — persist the artifact pair
//! 5. terminal — `completed` (and the raw upload reclaimed) or `failed`
//!
//! A status write hitting a missing record means the user cancelled while
//! processing was in flight. That is a normal outcome: the orchestrator
//! stops, removes any blobs it created, and reports success.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use finsight_analysis::{AnalyzerConfig, AnalyzerMode};
use finsight_core::{
    AnalysisOutcome, AnalyzeRequest, AnalyzerBackend, BlobStore, Error, Report,
    ReportRepository, ReportStage, Result, TaskState,
};

use crate::artifacts::ArtifactGenerator;

/// Outcome of a guarded repository write.
enum Write {
    Applied,
    /// The record vanished mid-flight (user cancelled).
    Cancelled,
}

/// Drives claimed reports through the analysis state machine.
pub struct ReportOrchestrator {
    repo: Arc<dyn ReportRepository>,
    blobs: Arc<dyn BlobStore>,
    analyzer: Arc<dyn AnalyzerBackend>,
    artifacts: ArtifactGenerator,
    config: AnalyzerConfig,
}

impl ReportOrchestrator {
    pub fn new(
        repo: Arc<dyn ReportRepository>,
        blobs: Arc<dyn BlobStore>,
        analyzer: Arc<dyn AnalyzerBackend>,
        config: AnalyzerConfig,
    ) -> Self {
        Self {
            repo,
            blobs: blobs.clone(),
            analyzer,
            artifacts: ArtifactGenerator::new(blobs),
            config,
        }
    }

    /// Process one claimed report to a terminal state.
    ///
    /// Returns `Err` only for infrastructure faults (database down); every
    /// analysis-level failure is absorbed into the report record.
    pub async fn process(&self, report: Report) -> Result<()> {
        let report_id = report.id;
        let start = Instant::now();

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            report_id = %report_id,
            report_kind = %report.kind,
            "Processing report"
        );

        // Stage 1: fetch the raw upload
        let Some(upload_handle) = report.upload_handle.clone() else {
            self.fail(report_id, None, "report has no stored upload")
                .await?;
            return Ok(());
        };
        let file_data = match self.blobs.get(&upload_handle).await {
            Ok(data) => data,
            Err(e) => {
                self.fail(
                    report_id,
                    Some(&upload_handle),
                    &format!("failed to read upload: {e}"),
                )
                .await?;
                return Ok(());
            }
        };

        // Stage 2: build the analyzer request
        if let Write::Cancelled = self
            .guard(self.repo.update_stage(report_id, ReportStage::AiAnalysis).await)?
        {
            return self.abort_cancelled(&report, &[]).await;
        }
        let request = build_analyze_request(&report, &file_data);

        // Stage 3: analyzer call with bounded retries
        if let Write::Cancelled = self
            .guard(self.repo.update_stage(report_id, ReportStage::AiAnalyzing).await)?
        {
            return self.abort_cancelled(&report, &[]).await;
        }

        let outcome = match self.analyze_with_retries(&report, &request).await? {
            AnalyzeEnd::Done(outcome) => outcome,
            AnalyzeEnd::Cancelled => return self.abort_cancelled(&report, &[]).await,
            AnalyzeEnd::Failed => return Ok(()),
        };

        if let Write::Cancelled = self.guard(self.repo.record_response(report_id).await)? {
            return self.abort_cancelled(&report, &[]).await;
        }

        // Stage 4: persist artifacts
        if let Write::Cancelled = self.guard(
            self.repo
                .update_stage(report_id, ReportStage::GeneratingReports)
                .await,
        )? {
            return self.abort_cancelled(&report, &[]).await;
        }

        let artifacts = match self.artifacts.generate(report_id, &outcome).await {
            Ok(artifacts) => artifacts,
            Err(e) => {
                self.fail(
                    report_id,
                    Some(&upload_handle),
                    &format!("artifact generation failed: {e}"),
                )
                .await?;
                return Ok(());
            }
        };

        // Stage 5: terminal success
        let summary = outcome
            .analysis
            .get("summary")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let completed = self.repo
            .mark_completed(
                report_id,
                &artifacts,
                summary.as_deref(),
                &outcome.analysis,
                outcome.processing_secs,
            )
            .await;
        if let Write::Cancelled = self.guard(completed)? {
            return self.abort_cancelled(&report, &artifacts).await;
        }

        // Reclaim the raw upload; the analysis payload makes it redundant.
        // Best-effort: a leftover blob is waste, not corruption.
        self.reclaim_upload(report_id, &upload_handle).await;

        info!(
            subsystem = "jobs",
            component = "orchestrator",
            report_id = %report_id,
            duration_ms = start.elapsed().as_millis() as u64,
            "Report completed"
        );
        Ok(())
    }

    /// Run the analyzer with the configured deadline and retry bound.
    async fn analyze_with_retries(
        &self,
        report: &Report,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeEnd> {
        let report_id = report.id;
        let mut attempt = report.retry_count;

        loop {
            if let Write::Cancelled =
                self.guard(self.repo.record_request(report_id, None).await)?
            {
                return Ok(AnalyzeEnd::Cancelled);
            }

            let result = self.call_analyzer(report_id, request).await;

            match result {
                Ok(outcome) => return Ok(AnalyzeEnd::Done(outcome)),
                Err(e) if e.is_not_found() => return Ok(AnalyzeEnd::Cancelled),
                Err(e) if e.is_transient() && attempt < report.max_retries => {
                    attempt = match self.repo.increment_retry(report_id, &e.to_string()).await {
                        Ok(count) => count,
                        Err(err) if err.is_not_found() => return Ok(AnalyzeEnd::Cancelled),
                        Err(err) => return Err(err),
                    };
                    warn!(
                        subsystem = "jobs",
                        component = "orchestrator",
                        report_id = %report_id,
                        retry_count = attempt,
                        error = %e,
                        "Transient analyzer failure, retrying"
                    );
                    sleep(self.config.retry_backoff).await;
                }
                Err(e) => {
                    self.fail(report_id, report.upload_handle.as_deref(), &e.to_string())
                        .await?;
                    return Ok(AnalyzeEnd::Failed);
                }
            }
        }
    }

    /// One analyzer call in the configured mode, bounded by the hard
    /// deadline regardless of what the backend does internally.
    async fn call_analyzer(
        &self,
        report_id: uuid::Uuid,
        request: &AnalyzeRequest,
    ) -> Result<AnalysisOutcome> {
        let deadline = self.config.analyze_timeout;
        match self.config.mode {
            AnalyzerMode::Sync => match timeout(deadline, self.analyzer.analyze(request)).await {
                Ok(result) => result,
                Err(_) => Err(Error::AnalyzerTimeout(format!(
                    "no analyzer response within {}s",
                    deadline.as_secs()
                ))),
            },
            AnalyzerMode::Queued => {
                match timeout(deadline, self.run_queued(report_id, request)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::AnalyzerTimeout(format!(
                        "queued task did not finish within {}s",
                        deadline.as_secs()
                    ))),
                }
            }
        }
    }

    /// Submit-then-poll variant: the analyzer-side task id is recorded so
    /// recovery can pick the task up after a crash.
    async fn run_queued(
        &self,
        report_id: uuid::Uuid,
        request: &AnalyzeRequest,
    ) -> Result<AnalysisOutcome> {
        let task_id = self.analyzer.submit(request).await?;
        debug!(
            subsystem = "jobs",
            component = "orchestrator",
            report_id = %report_id,
            task_id = %task_id,
            "Analyzer task submitted"
        );

        // A missing record here surfaces as NotFound and is handled by the
        // retry loop's guard on the next write.
        self.repo.record_request(report_id, Some(&task_id)).await?;

        loop {
            sleep(self.config.task_poll_interval).await;
            // An analyzer that lost the task is a degraded analyzer, not a
            // missing report record.
            let status = match self.analyzer.task_status(&task_id).await {
                Ok(status) => status,
                Err(e) if e.is_not_found() => {
                    return Err(Error::AnalyzerUnavailable(format!(
                        "analyzer has no record of task {task_id}"
                    )))
                }
                Err(e) => return Err(e),
            };
            match status.state {
                TaskState::Completed => {
                    return status.outcome.ok_or_else(|| {
                        Error::MissingAnalysis(format!(
                            "task {task_id} completed without a result"
                        ))
                    });
                }
                TaskState::Failed => {
                    return Err(Error::AnalyzerRejected(
                        status
                            .error_message
                            .unwrap_or_else(|| format!("task {task_id} failed")),
                    ));
                }
                TaskState::Cancelled => {
                    return Err(Error::AnalyzerRejected(format!(
                        "task {task_id} was cancelled by the analyzer"
                    )));
                }
                TaskState::Pending | TaskState::Processing => continue,
            }
        }
    }

    /// Interpret a repository write result: `NotFound` means the record was
    /// cancelled underneath us, anything else propagates.
    fn guard(&self, result: Result<()>) -> Result<Write> {
        match result {
            Ok(()) => Ok(Write::Applied),
            Err(e) if e.is_not_found() => Ok(Write::Cancelled),
            Err(e) => Err(e),
        }
    }

    /// Terminal failure that tolerates concurrent cancellation. The failed
    /// record is retained for visibility, but the raw upload is reclaimed:
    /// nothing will read it again.
    async fn fail(
        &self,
        report_id: uuid::Uuid,
        upload_handle: Option<&str>,
        error: &str,
    ) -> Result<()> {
        warn!(
            subsystem = "jobs",
            component = "orchestrator",
            report_id = %report_id,
            error = %error,
            "Report failed"
        );
        let marked = match self.repo.mark_failed(report_id, error).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        };
        if let Some(handle) = upload_handle {
            self.reclaim_upload(report_id, handle).await;
        }
        marked
    }

    /// Best-effort removal of the raw upload once no path will read it.
    async fn reclaim_upload(&self, report_id: uuid::Uuid, upload_handle: &str) {
        if let Err(e) = self.blobs.delete(upload_handle).await {
            warn!(
                subsystem = "jobs",
                component = "orchestrator",
                report_id = %report_id,
                blob_handle = %upload_handle,
                error = %e,
                "Failed to reclaim raw upload"
            );
            return;
        }
        if let Err(e) = self.repo.clear_upload_handle(report_id).await {
            if !e.is_not_found() {
                warn!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    report_id = %report_id,
                    error = %e,
                    "Failed to clear upload handle"
                );
            }
        }
    }

    /// The record disappeared mid-flight: remove every blob this run may
    /// have created and stop quietly.
    async fn abort_cancelled(
        &self,
        report: &Report,
        artifacts: &[finsight_core::Artifact],
    ) -> Result<()> {
        info!(
            subsystem = "jobs",
            component = "orchestrator",
            report_id = %report.id,
            "Report cancelled mid-flight, cleaning up"
        );
        if let Some(handle) = &report.upload_handle {
            if let Err(e) = self.blobs.delete(handle).await {
                warn!(
                    subsystem = "jobs",
                    component = "orchestrator",
                    blob_handle = %handle,
                    error = %e,
                    "Failed to delete upload of cancelled report"
                );
            }
        }
        self.artifacts.remove(artifacts).await;
        Ok(())
    }
}

enum AnalyzeEnd {
    Done(AnalysisOutcome),
    Cancelled,
    Failed,
}

/// Build the analyzer wire request for a report.
fn build_analyze_request(report: &Report, file_data: &[u8]) -> AnalyzeRequest {
    let custom_prompt = report
        .params
        .as_ref()
        .and_then(|p| p.get("custom_prompt"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| report.kind.default_instruction().to_string());

    AnalyzeRequest {
        file_base64: base64::engine::general_purpose::STANDARD.encode(file_data),
        mime_type: report.mime_type.clone(),
        report_type: report.kind,
        file_name: report.file_name.clone(),
        custom_prompt: Some(custom_prompt),
        params: report.params.clone(),
    }
}
