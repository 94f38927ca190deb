//! The report status poller with stuck detection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use finsight_core::{
    defaults, RecoveryOutcome, ReportStage, ReportStatus, ReportStatusView, Result,
};

/// Gateway surface the poller needs. Implemented over HTTP by
/// [`crate::HttpStatusApi`] and by scripted fakes in tests.
#[async_trait]
pub trait StatusApi: Send + Sync {
    async fn status(&self, report_id: Uuid) -> Result<ReportStatusView>;
    async fn recover(&self, report_id: Uuid) -> Result<RecoveryOutcome>;
}

/// Polling cadence and stall thresholds.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay before the first status request.
    pub grace: Duration,
    /// Interval while the report waits in the queue.
    pub interval_queued: Duration,
    /// Interval while the analyzer works.
    pub interval_analyzing: Duration,
    /// Interval for everything else.
    pub interval_default: Duration,
    /// An AI stage with no visible change for this long counts as stuck.
    pub stuck_stage: Duration,
    /// Total time in flight after which an AI stage counts as stuck.
    pub stuck_ai_total: Duration,
    /// Hard ceiling on one polling session.
    pub max_total: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            grace: Duration::from_millis(defaults::POLL_GRACE_MS),
            interval_queued: Duration::from_millis(defaults::POLL_INTERVAL_QUEUED_MS),
            interval_analyzing: Duration::from_millis(defaults::POLL_INTERVAL_ANALYZING_MS),
            interval_default: Duration::from_millis(defaults::POLL_INTERVAL_DEFAULT_MS),
            stuck_stage: Duration::from_secs(defaults::STUCK_STAGE_SECS),
            stuck_ai_total: Duration::from_secs(defaults::STUCK_AI_TOTAL_SECS),
            max_total: Duration::from_secs(defaults::POLL_MAX_TOTAL_SECS),
        }
    }
}

/// How a polling session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The report completed; artifacts are ready.
    Completed(ReportStatusView),
    /// The report failed; the view carries the error message.
    Failed(ReportStatusView),
    /// The report record is gone (cancelled).
    Cancelled,
    /// The polling ceiling elapsed with no terminal state.
    TimedOut,
}

/// Polls one report to a terminal state.
pub struct ReportPoller {
    api: Arc<dyn StatusApi>,
    config: PollerConfig,
}

impl ReportPoller {
    pub fn new(api: Arc<dyn StatusApi>, config: PollerConfig) -> Self {
        Self { api, config }
    }

    /// Poll `report_id` until it settles, the record disappears, or the
    /// ceiling elapses.
    pub async fn poll(&self, report_id: Uuid) -> Result<PollOutcome> {
        self.poll_with(report_id, |_| {}).await
    }

    /// Like [`poll`](Self::poll), invoking `on_update` with every status
    /// view observed. Callers drive progress UI from the callback.
    pub async fn poll_with(
        &self,
        report_id: Uuid,
        mut on_update: impl FnMut(&ReportStatusView) + Send,
    ) -> Result<PollOutcome> {
        let started = Instant::now();
        sleep(self.config.grace).await;

        let mut last_seen: Option<(ReportStatus, ReportStage, i32)> = None;
        let mut last_change = Instant::now();
        // One recovery attempt per stall; a visible change re-arms it.
        let mut recovery_attempted = false;

        loop {
            if started.elapsed() > self.config.max_total {
                info!(report_id = %report_id, "Polling ceiling reached");
                return Ok(PollOutcome::TimedOut);
            }

            let view = match self.api.status(report_id).await {
                Ok(view) => view,
                Err(e) if e.is_not_found() => {
                    info!(report_id = %report_id, "Report record gone, stopping");
                    return Ok(PollOutcome::Cancelled);
                }
                Err(e) if e.is_transient() => {
                    warn!(report_id = %report_id, error = %e, "Status request failed, retrying");
                    sleep(self.config.interval_default).await;
                    continue;
                }
                Err(e) => return Err(e),
            };
            on_update(&view);

            let key = (view.status, view.stage, view.progress);
            if last_seen != Some(key) {
                last_seen = Some(key);
                last_change = Instant::now();
                recovery_attempted = false;
            }

            match view.status {
                ReportStatus::Completed => return Ok(PollOutcome::Completed(view)),
                ReportStatus::Failed => return Ok(PollOutcome::Failed(view)),
                ReportStatus::Cancelled => return Ok(PollOutcome::Cancelled),
                _ => {}
            }

            if !recovery_attempted && self.is_stuck(&view, started, last_change) {
                info!(
                    report_id = %report_id,
                    stage = %view.stage.as_str(),
                    "Report appears stuck, requesting recovery"
                );
                match self.api.recover(report_id).await {
                    Ok(outcome) => {
                        debug!(report_id = %report_id, recovery_outcome = ?outcome, "Recovery requested");
                        recovery_attempted = true;
                        last_change = Instant::now();
                    }
                    Err(e) if e.is_not_found() => return Ok(PollOutcome::Cancelled),
                    Err(e) => {
                        // A failed recovery request is not fatal to polling.
                        warn!(report_id = %report_id, error = %e, "Recovery request failed");
                        recovery_attempted = true;
                    }
                }
            }

            sleep(self.interval_for(&view)).await;
        }
    }

    /// Only AI stages are subject to stuck detection: the analyzer is the
    /// one step whose silence the pipeline cannot observe from inside.
    fn is_stuck(&self, view: &ReportStatusView, started: Instant, last_change: Instant) -> bool {
        if !view.stage.is_ai_stage() {
            return false;
        }
        last_change.elapsed() > self.config.stuck_stage
            || started.elapsed() > self.config.stuck_ai_total
    }

    fn interval_for(&self, view: &ReportStatusView) -> Duration {
        match view.status {
            ReportStatus::Pending | ReportStatus::Uploaded => self.config.interval_queued,
            ReportStatus::Processing if view.stage.is_ai_stage() => self.config.interval_analyzing,
            _ => self.config.interval_default,
        }
    }
}

/// Human-readable progress message for a status view. Failure messages are
/// deliberately generic; raw pipeline errors stay in `error_message` for
/// callers that want them.
pub fn user_facing_message(view: &ReportStatusView) -> String {
    match view.status {
        ReportStatus::Pending | ReportStatus::Uploaded => {
            "Queued for analysis, please wait...".to_string()
        }
        ReportStatus::Completed => "Report ready".to_string(),
        ReportStatus::Failed => "Processing failed, please try again".to_string(),
        ReportStatus::Cancelled => "Report cancelled".to_string(),
        ReportStatus::Processing => match view.stage {
            ReportStage::FileUpload => "Preparing your document...".to_string(),
            ReportStage::AiAnalysis | ReportStage::AiAnalyzing => {
                "AI analysis in progress, this usually takes 3-5 minutes...".to_string()
            }
            ReportStage::GeneratingReports => "Generating your report...".to_string(),
            ReportStage::Completed => "Report ready".to_string(),
            ReportStage::Failed => "Processing failed, please try again".to_string(),
        },
    }
}
