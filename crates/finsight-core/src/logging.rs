//! Structured logging schema and field name constants for finsight.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation tools can query by standardized names across every
//! subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events (startup, shutdown), stage transitions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration, high-volume data |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Correlation ID propagated across request → orchestration → analyzer calls.
/// Format: UUIDv7 (time-ordered).
pub const REQUEST_ID: &str = "request_id";

/// Subsystem originating the log event.
/// Values: "api", "db", "analysis", "jobs", "client"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "orchestrator", "worker", "poller", "blob_store"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "claim_next", "analyze", "recover", "cancel"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Report UUID being operated on.
pub const REPORT_ID: &str = "report_id";

/// Owning user identifier.
pub const USER_ID: &str = "user_id";

/// Report kind enum variant.
pub const REPORT_KIND: &str = "report_kind";

/// Processing stage at the time of the event.
pub const STAGE: &str = "stage";

/// Analyzer-side task identifier for queued analysis.
pub const TASK_ID: &str = "task_id";

/// Blob storage handle affected.
pub const BLOB_HANDLE: &str = "blob_handle";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// File size in bytes.
pub const FILE_SIZE: &str = "file_size";

/// Retry attempt number (0 = first attempt).
pub const RETRY_COUNT: &str = "retry_count";

/// Progress percentage written with a stage transition.
pub const PROGRESS: &str = "progress";

/// Number of reports affected by a batch operation.
pub const REPORT_COUNT: &str = "report_count";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Recovery outcome variant ("completed_from_task", "reset_for_resubmission"...).
pub const RECOVERY_OUTCOME: &str = "recovery_outcome";
