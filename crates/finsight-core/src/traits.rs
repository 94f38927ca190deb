//! Trait seams between the pipeline and its infrastructure.
//!
//! Repositories and backends are consumed as `Arc<dyn Trait>` so handlers,
//! the worker, and tests can swap Postgres/HTTP implementations for
//! in-memory ones.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AnalysisOutcome, AnalyzeRequest, Artifact, Report, ReportStage, TaskStatus,
};

/// New report record to be inserted by the repository.
///
/// Everything the intake handler knows before the upload blob is persisted.
#[derive(Debug, Clone)]
pub struct NewReport {
    pub id: Uuid,
    pub user_id: String,
    pub kind: crate::models::ReportKind,
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    pub content_hash: Option<String>,
    pub params: Option<JsonValue>,
    pub tags: Vec<String>,
    pub max_retries: i32,
}

/// Filter for report listings.
#[derive(Debug, Clone, Default)]
pub struct ReportFilter {
    pub user_id: Option<String>,
    pub kind: Option<crate::models::ReportKind>,
    pub limit: i64,
    pub offset: i64,
}

/// Persistence seam for the `Report` aggregate.
///
/// The report record doubles as the durable task: `claim_next` hands an
/// `uploaded` report to exactly one worker by setting the `claimed_at`
/// lease, and every status write enforces the forward-only transition
/// matrix in [`crate::models::ReportStatus::can_transition_to`].
///
/// Writes against a concurrently deleted report return
/// `Error::ReportNotFound`; orchestration treats that as a cancel signal,
/// not a fault.
#[async_trait]
pub trait ReportRepository: Send + Sync {
    /// Insert a new record in `pending` status.
    async fn create(&self, new: NewReport) -> Result<Report>;

    /// Get report by ID.
    async fn get(&self, report_id: Uuid) -> Result<Option<Report>>;

    /// List reports newest-first with filtering.
    async fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>>;

    /// Count reports matching the filter (ignores limit/offset).
    async fn count(&self, filter: &ReportFilter) -> Result<i64>;

    /// Record the persisted upload blob and move `pending` → `uploaded`,
    /// making the report claimable.
    async fn mark_uploaded(&self, report_id: Uuid, upload_handle: &str) -> Result<()>;

    /// Atomically claim the next `uploaded` report: set the `claimed_at`
    /// lease, move status to `processing`, and return the claimed row.
    /// Concurrent workers never receive the same report.
    async fn claim_next(&self) -> Result<Option<Report>>;

    /// Re-acquire a specific report whose lease is older than
    /// `stale_before` (dead orchestration). Refreshes the lease and resets
    /// the stage so processing restarts from the top; status stays
    /// `processing`.
    async fn reclaim_stale(
        &self,
        report_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Report>>;

    /// Clear the lease without touching status, making an in-flight report
    /// claimable again. Used by recovery when resubmission is the answer.
    async fn release_claim(&self, report_id: Uuid) -> Result<()>;

    /// Update stage and progress within `processing`.
    async fn update_stage(&self, report_id: Uuid, stage: ReportStage) -> Result<()>;

    /// Record the outbound analyzer call (audit trail; sets `request_at`
    /// and, for queued mode, the analyzer-side task id).
    async fn record_request(&self, report_id: Uuid, task_id: Option<&str>) -> Result<()>;

    /// Record the analyzer response timestamp.
    async fn record_response(&self, report_id: Uuid) -> Result<()>;

    /// Bump the retry counter after a transient failure, remembering the
    /// error. Returns the new count.
    async fn increment_retry(&self, report_id: Uuid, error: &str) -> Result<i32>;

    /// Terminal success: persist artifacts, summary, and the full analysis
    /// payload; status → `completed`, progress 100, lease cleared.
    async fn mark_completed(
        &self,
        report_id: Uuid,
        artifacts: &[Artifact],
        summary: Option<&str>,
        analysis: &JsonValue,
        processing_secs: Option<f64>,
    ) -> Result<()>;

    /// Terminal failure: status → `failed`, error retained for visibility,
    /// lease cleared. The record is kept, not deleted.
    async fn mark_failed(&self, report_id: Uuid, error: &str) -> Result<()>;

    /// Delete the record (cancel path). Returns the deleted report so the
    /// caller can reclaim its blobs.
    async fn delete(&self, report_id: Uuid) -> Result<Option<Report>>;

    /// Clear the stored upload handle after the raw upload blob has been
    /// reclaimed post-completion.
    async fn clear_upload_handle(&self, report_id: Uuid) -> Result<()>;
}

/// Content-addressed-ish blob storage seam for uploads and artifacts.
///
/// Handles are opaque strings minted by the store.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist `data` and return its handle.
    async fn put(&self, handle: &str, data: &[u8]) -> Result<()>;

    /// Read a blob back.
    async fn get(&self, handle: &str) -> Result<Vec<u8>>;

    /// Remove a blob. Removing a missing blob is not an error.
    async fn delete(&self, handle: &str) -> Result<()>;

    /// Check blob existence.
    async fn exists(&self, handle: &str) -> Result<bool>;
}

/// Client seam for the external analyzer service.
#[async_trait]
pub trait AnalyzerBackend: Send + Sync {
    /// Synchronous analysis: blocks until the analyzer returns a result or
    /// the hard deadline fires. Errors are classified transient/terminal
    /// via [`crate::Error::is_transient`].
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisOutcome>;

    /// Queued analysis: submit and return the analyzer-side task id.
    async fn submit(&self, request: &AnalyzeRequest) -> Result<String>;

    /// Poll a queued task.
    async fn task_status(&self, task_id: &str) -> Result<TaskStatus>;

    /// Backend identifier for logs.
    fn name(&self) -> &str;
}
