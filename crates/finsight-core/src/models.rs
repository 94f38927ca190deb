//! Domain models for the finsight report pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

// =============================================================================
// REPORT AGGREGATE
// =============================================================================

/// Kind of financial document submitted for analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// Bank account statement (transaction flow analysis)
    BankStatement,
    /// Personal credit report
    CreditReport,
}

impl ReportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportKind::BankStatement => "bank_statement",
            ReportKind::CreditReport => "credit_report",
        }
    }

    /// Parse from string (case-insensitive, accepts hyphens).
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "bank_statement" => Some(ReportKind::BankStatement),
            "credit_report" => Some(ReportKind::CreditReport),
            _ => None,
        }
    }

    /// Document-type-specific instruction sent to the analyzer alongside the file.
    pub fn default_instruction(&self) -> &'static str {
        match self {
            ReportKind::BankStatement => {
                "Analyze this bank statement: income/expense flows, balance \
                 trends, counterparty concentration, and anomalous transactions."
            }
            ReportKind::CreditReport => {
                "Analyze this credit report: account standing, utilization, \
                 inquiry history, and derogatory marks."
            }
        }
    }
}

impl std::fmt::Display for ReportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level processing status of a report.
///
/// Transitions are monotonic forward; `can_transition_to` is the single
/// authority and the repositories enforce it on every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    /// Record created, upload not yet persisted
    Pending,
    /// Upload persisted; claimable by the worker
    Uploaded,
    /// Orchestration in flight (see `ReportStage` for the sub-state)
    Processing,
    /// Terminal: artifacts persisted
    Completed,
    /// Terminal: analysis failed, record retained for visibility
    Failed,
    /// Terminal: user cancelled; record is removed
    Cancelled,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::Pending => "pending",
            ReportStatus::Uploaded => "uploaded",
            ReportStatus::Processing => "processing",
            ReportStatus::Completed => "completed",
            ReportStatus::Failed => "failed",
            ReportStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReportStatus::Pending),
            "uploaded" => Some(ReportStatus::Uploaded),
            "processing" => Some(ReportStatus::Processing),
            "completed" => Some(ReportStatus::Completed),
            "failed" => Some(ReportStatus::Failed),
            "cancelled" => Some(ReportStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReportStatus::Completed | ReportStatus::Failed | ReportStatus::Cancelled
        )
    }

    /// Whether a cancel request is permitted in this status.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            ReportStatus::Pending | ReportStatus::Uploaded | ReportStatus::Processing
        )
    }

    /// Forward-only state machine: no transition re-enters `pending` or
    /// `uploaded` once `processing` has been reached, and terminal states
    /// accept nothing.
    pub fn can_transition_to(&self, next: ReportStatus) -> bool {
        use ReportStatus::*;
        match (self, next) {
            (Pending, Uploaded) => true,
            (Pending, Cancelled) | (Uploaded, Cancelled) | (Processing, Cancelled) => true,
            (Uploaded, Processing) => true,
            (Processing, Processing) => true, // stage/progress updates
            (Processing, Completed) | (Processing, Failed) => true,
            (Pending, Failed) | (Uploaded, Failed) => true, // intake/claim errors
            _ => false,
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fine-grained sub-state used while `status = processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ReportStage {
    /// Downloading the raw upload from blob storage
    FileUpload,
    /// Preparing the analyzer request
    AiAnalysis,
    /// Analyzer request in flight
    AiAnalyzing,
    /// Persisting output artifacts
    GeneratingReports,
    /// Terminal, mirrors status=completed
    Completed,
    /// Terminal, mirrors status=failed
    Failed,
}

impl ReportStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStage::FileUpload => "file_upload",
            ReportStage::AiAnalysis => "ai_analysis",
            ReportStage::AiAnalyzing => "ai_analyzing",
            ReportStage::GeneratingReports => "generating_reports",
            ReportStage::Completed => "completed",
            ReportStage::Failed => "failed",
        }
    }

    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s {
            "file_upload" => Some(ReportStage::FileUpload),
            "ai_analysis" => Some(ReportStage::AiAnalysis),
            "ai_analyzing" => Some(ReportStage::AiAnalyzing),
            "generating_reports" => Some(ReportStage::GeneratingReports),
            "completed" => Some(ReportStage::Completed),
            "failed" => Some(ReportStage::Failed),
            _ => None,
        }
    }

    /// UI-facing progress value written on stage entry. Monotonic across the
    /// stage order but not a precise measure of work done.
    pub fn progress(&self) -> i32 {
        match self {
            ReportStage::FileUpload => 30,
            ReportStage::AiAnalysis => 50,
            ReportStage::AiAnalyzing => 60,
            ReportStage::GeneratingReports => 80,
            ReportStage::Completed => 100,
            ReportStage::Failed => 0,
        }
    }

    /// Stages during which the analyzer owns the report (stuck detection
    /// applies here).
    pub fn is_ai_stage(&self) -> bool {
        matches!(self, ReportStage::AiAnalysis | ReportStage::AiAnalyzing)
    }
}

impl std::fmt::Display for ReportStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted output file linked to a completed report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct Artifact {
    /// Logical name, e.g. "analysis.json" or "report.html"
    pub name: String,
    /// Opaque blob-storage handle
    pub handle: String,
    pub size_bytes: i64,
}

/// Generate a blob handle for a named file belonging to a report.
///
/// Handle format: `blobs/{first-2-hex}/{next-2-hex}/{uuid}/{name}`,
/// sharded by the report's UUIDv7 prefix. Uploads and artifacts share
/// this layout so every blob of a report lives under one directory.
///
/// Example: `blobs/01/94/01948f7e-8b2a-7c3d-9e4f-5a6b7c8d9e0f/report.html`
pub fn generate_blob_handle(report_id: &Uuid, name: &str) -> String {
    let hex = report_id.as_hyphenated().to_string().replace('-', "");
    format!(
        "blobs/{}/{}/{}/{}",
        &hex[0..2],
        &hex[2..4],
        report_id.as_hyphenated(),
        name
    )
}

/// The aggregate tracking one submitted document through analysis to
/// finished artifacts. Doubles as the durable task record: the worker
/// claims reports directly, so orchestration is never tied to the
/// lifetime of the request that created the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub user_id: String,
    pub kind: ReportKind,

    // Input
    pub file_name: String,
    pub file_size: i64,
    pub mime_type: String,
    /// Blob handle of the raw upload; cleared when the upload is reclaimed.
    pub upload_handle: Option<String>,
    /// Content hash of the raw upload (audit only).
    pub content_hash: Option<String>,
    /// Caller-supplied key/values that shape the analyzer prompt.
    pub params: Option<JsonValue>,
    pub uploaded_at: Option<DateTime<Utc>>,

    // Processing
    pub status: ReportStatus,
    pub stage: ReportStage,
    pub progress: i32,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,

    // Algorithm call audit (append-only; only retry_count feeds control flow)
    pub task_id: Option<String>,
    pub request_at: Option<DateTime<Utc>>,
    pub response_at: Option<DateTime<Utc>>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub last_transient_error: Option<String>,
    pub processing_secs: Option<f64>,

    // Output
    pub artifacts: Vec<Artifact>,
    pub summary: Option<String>,
    /// Full analyzer payload, kept for re-rendering without re-calling.
    pub analysis: Option<JsonValue>,

    // Lifecycle
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    /// Orchestration lease: `Some` while a worker owns the report. Recovery
    /// clears it so a dead orchestration can be re-claimed.
    pub claimed_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn has_artifacts(&self) -> bool {
        !self.artifacts.is_empty()
    }

    pub fn artifact(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.name == name)
    }
}

// =============================================================================
// GATEWAY REQUEST/RESPONSE TYPES
// =============================================================================

/// Intake request: validated synchronously before any record is created.
#[derive(Debug, Clone, Deserialize, utoipa::ToSchema)]
pub struct CreateReportRequest {
    pub user_id: String,
    pub kind: ReportKind,
    pub file_name: String,
    /// Raw document, base64-encoded.
    pub file_base64: String,
    #[serde(default)]
    pub params: Option<JsonValue>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Intake response: the orchestration runs detached, only the id returns.
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct CreateReportResponse {
    pub report_id: Uuid,
    pub status: ReportStatus,
}

/// Polling view of a report, served by the status gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ReportStatusView {
    pub report_id: Uuid,
    pub status: ReportStatus,
    pub stage: ReportStage,
    pub progress: i32,
    pub error_message: Option<String>,
    pub has_artifacts: bool,
}

impl From<&Report> for ReportStatusView {
    fn from(r: &Report) -> Self {
        Self {
            report_id: r.id,
            status: r.status,
            stage: r.stage,
            progress: r.progress,
            error_message: r.error_message.clone(),
            has_artifacts: r.has_artifacts(),
        }
    }
}

/// List query: paginated, newest-first, optionally filtered by kind.
#[derive(Debug, Clone, Deserialize)]
pub struct ListReportsRequest {
    pub user_id: String,
    #[serde(default)]
    pub kind: Option<ReportKind>,
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_page_size")]
    pub page_size: i64,
}

fn default_page() -> i64 {
    1
}

fn default_page_size() -> i64 {
    crate::defaults::PAGE_SIZE
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListReportsResponse {
    pub reports: Vec<Report>,
    pub page: i64,
    pub page_size: i64,
    pub total: i64,
}

/// Outcome of a recovery request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Report is not in flight; nothing to recover.
    NoActionNeeded,
    /// Analyzer had finished; artifacts generated and report completed.
    CompletedFromTask,
    /// Analyzer reported failure; report marked failed.
    FailedFromTask,
    /// Analyzer still working; stage refreshed.
    StillProcessing,
    /// Analyzer unreachable or has no record; lease cleared for resubmission.
    ResetForResubmission,
}

// =============================================================================
// ANALYZER WIRE TYPES
// =============================================================================

/// Request to the external analyzer service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    pub file_base64: String,
    pub mime_type: String,
    pub report_type: ReportKind,
    pub file_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_prompt: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<JsonValue>,
}

/// Successful analyzer result. The structured `analysis` is mandatory for
/// the pipeline to proceed even when the HTTP call itself succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub analysis: JsonValue,
    /// Pre-rendered human-readable report. Required by artifact policy.
    pub rendered_report: Option<String>,
    pub processing_secs: Option<f64>,
    pub request_id: Option<String>,
}

/// State of a queued analyzer task (submit-then-poll variant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Status snapshot of a queued analyzer task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub outcome: Option<AnalysisOutcome>,
    pub error_message: Option<String>,
}
