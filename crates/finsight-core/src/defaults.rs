//! Centralized default constants for the finsight pipeline.
//!
//! **This module is the single source of truth** for all shared default values.
//! All crates reference these constants instead of defining their own magic
//! numbers.
//!
//! Organized by domain area. When adding new constants, place them in the
//! appropriate section and document the rationale for the chosen value.

// =============================================================================
// ANALYZER
// =============================================================================

/// Default analyzer service base URL.
pub const ANALYZER_URL: &str = "http://127.0.0.1:8080";

/// Hard deadline for a synchronous analyzer call in seconds (8 minutes).
///
/// Chosen below typical upstream idle-connection limits so the pipeline sees
/// a timeout it controls rather than an opaque connection reset.
pub const ANALYZE_TIMEOUT_SECS: u64 = 480;

/// Timeout for lightweight analyzer calls (submit, task status) in seconds.
pub const ANALYZER_SHORT_TIMEOUT_SECS: u64 = 30;

/// Maximum retries per transient analyzer failure. The initial attempt plus
/// retries gives at most `ANALYZE_MAX_RETRIES + 1` calls per claim.
pub const ANALYZE_MAX_RETRIES: i32 = 2;

/// Fixed backoff between analyzer retry attempts in seconds.
pub const ANALYZE_RETRY_BACKOFF_SECS: u64 = 5;

/// Poll interval when waiting on a queued analyzer task in seconds.
pub const TASK_POLL_INTERVAL_SECS: u64 = 5;

// =============================================================================
// WORKER / ORCHESTRATION
// =============================================================================

/// Default worker poll interval in milliseconds.
pub const WORKER_POLL_INTERVAL_MS: u64 = 1_000;

/// Default maximum concurrently orchestrated reports per worker.
pub const WORKER_MAX_CONCURRENT: usize = 4;

/// Age after which a claim lease is considered dead and the report is
/// eligible for recovery, in seconds (10 minutes). Must exceed
/// `ANALYZE_TIMEOUT_SECS` plus retry backoff so a live orchestration is
/// never stolen.
pub const CLAIM_STALE_SECS: i64 = 600;

// =============================================================================
// POLLER (CLIENT-SIDE STATUS TRACKING)
// =============================================================================

/// Grace delay before the first status poll, in milliseconds. Gives fast
/// pipelines a chance to make visible progress before the first read.
pub const POLL_GRACE_MS: u64 = 3_000;

/// Default poll interval in milliseconds.
pub const POLL_INTERVAL_DEFAULT_MS: u64 = 5_000;

/// Poll interval while the report sits in an analyzer queue, in milliseconds.
pub const POLL_INTERVAL_QUEUED_MS: u64 = 10_000;

/// Poll interval while the analyzer is actively working, in milliseconds.
pub const POLL_INTERVAL_ANALYZING_MS: u64 = 8_000;

/// Stage considered stuck after this long without change, in seconds (5 min).
pub const STUCK_STAGE_SECS: u64 = 300;

/// Total time in AI stages after which the report is considered stuck even
/// if stages changed, in seconds (10 minutes).
pub const STUCK_AI_TOTAL_SECS: u64 = 600;

/// Overall polling ceiling in seconds (15 minutes). Past this the poller
/// gives up regardless of server-side state.
pub const POLL_MAX_TOTAL_SECS: u64 = 900;

// =============================================================================
// FILE SAFETY
// =============================================================================

/// Maximum upload size in bytes (20 MB). Enforced at the request-body limit
/// and again in `validate_upload` after base64 decoding.
pub const MAX_UPLOAD_SIZE_BYTES: usize = 20 * 1024 * 1024;

/// Maximum filename length (ext4/NTFS compatible).
pub const FILENAME_MAX_LENGTH: usize = 255;

/// Maximum request body size in bytes. Base64 inflates payloads by ~4/3,
/// plus JSON envelope overhead.
pub const MAX_BODY_SIZE_BYTES: usize = 32 * 1024 * 1024;

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for report listings.
pub const PAGE_SIZE: i64 = 20;

/// Maximum allowed page size for report listings.
pub const PAGE_SIZE_MAX: i64 = 100;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// Default CORS max-age in seconds (1 hour).
pub const CORS_MAX_AGE_SECS: u64 = 3600;

// =============================================================================
// RETENTION
// =============================================================================

/// Days a completed report is retained before expiry eligibility.
pub const RETENTION_DAYS: i64 = 90;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_lease_outlives_analyzer_deadline() {
        // A live orchestration must never look stale mid-call.
        const {
            assert!(
                CLAIM_STALE_SECS as u64
                    > ANALYZE_TIMEOUT_SECS
                        + (ANALYZE_MAX_RETRIES as u64) * ANALYZE_RETRY_BACKOFF_SECS
            );
        }
    }

    #[test]
    fn poll_intervals_ordered_by_expected_wait() {
        const {
            assert!(POLL_INTERVAL_DEFAULT_MS < POLL_INTERVAL_ANALYZING_MS);
            assert!(POLL_INTERVAL_ANALYZING_MS < POLL_INTERVAL_QUEUED_MS);
        }
    }

    #[test]
    fn stuck_thresholds_within_poll_ceiling() {
        const {
            assert!(STUCK_STAGE_SECS < STUCK_AI_TOTAL_SECS);
            assert!(STUCK_AI_TOTAL_SECS < POLL_MAX_TOTAL_SECS);
        }
    }

    #[test]
    fn body_limit_covers_base64_inflated_upload() {
        // 4/3 inflation plus envelope headroom
        const {
            assert!(MAX_BODY_SIZE_BYTES > MAX_UPLOAD_SIZE_BYTES * 4 / 3);
        }
    }

    #[test]
    fn page_size_within_max() {
        const {
            assert!(PAGE_SIZE <= PAGE_SIZE_MAX);
        }
    }
}
