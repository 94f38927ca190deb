//! In-memory repository and blob store.
//!
//! Mirror the transition guards of the Postgres implementations so the
//! orchestrator, gateway, and poller can be exercised without a database.
//! Used throughout the workspace's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use finsight_core::{
    defaults, Artifact, BlobStore, Error, NewReport, Report, ReportFilter, ReportRepository,
    ReportStage, ReportStatus, Result,
};

/// In-memory implementation of `ReportRepository`.
#[derive(Default)]
pub struct InMemoryReportRepository {
    reports: Mutex<HashMap<Uuid, Report>>,
}

impl InMemoryReportRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a report directly, bypassing the intake path. Test helper.
    pub fn seed(&self, report: Report) {
        self.reports
            .lock()
            .expect("repository lock poisoned")
            .insert(report.id, report);
    }

    /// Snapshot of a single report. Test helper.
    pub fn snapshot(&self, report_id: Uuid) -> Option<Report> {
        self.reports
            .lock()
            .expect("repository lock poisoned")
            .get(&report_id)
            .cloned()
    }

    fn with_report<T>(
        &self,
        report_id: Uuid,
        f: impl FnOnce(&mut Report) -> Result<T>,
    ) -> Result<T> {
        let mut reports = self.reports.lock().expect("repository lock poisoned");
        match reports.get_mut(&report_id) {
            Some(report) => f(report),
            None => Err(Error::ReportNotFound(report_id)),
        }
    }

    fn matches(report: &Report, filter: &ReportFilter) -> bool {
        if let Some(user_id) = &filter.user_id {
            if &report.user_id != user_id {
                return false;
            }
        }
        if let Some(kind) = filter.kind {
            if report.kind != kind {
                return false;
            }
        }
        true
    }
}

#[async_trait]
impl ReportRepository for InMemoryReportRepository {
    async fn create(&self, new: NewReport) -> Result<Report> {
        let now = Utc::now();
        let report = Report {
            id: new.id,
            user_id: new.user_id,
            kind: new.kind,
            file_name: new.file_name,
            file_size: new.file_size,
            mime_type: new.mime_type,
            upload_handle: None,
            content_hash: new.content_hash,
            params: new.params,
            uploaded_at: None,
            status: ReportStatus::Pending,
            stage: ReportStage::FileUpload,
            progress: 0,
            started_at: None,
            completed_at: None,
            error_message: None,
            task_id: None,
            request_at: None,
            response_at: None,
            retry_count: 0,
            max_retries: new.max_retries,
            last_transient_error: None,
            processing_secs: None,
            artifacts: Vec::new(),
            summary: None,
            analysis: None,
            created_at: now,
            updated_at: now,
            expires_at: None,
            tags: new.tags,
            claimed_at: None,
        };

        self.reports
            .lock()
            .expect("repository lock poisoned")
            .insert(report.id, report.clone());
        Ok(report)
    }

    async fn get(&self, report_id: Uuid) -> Result<Option<Report>> {
        Ok(self.snapshot(report_id))
    }

    async fn list(&self, filter: &ReportFilter) -> Result<Vec<Report>> {
        let limit = if filter.limit <= 0 {
            defaults::PAGE_SIZE
        } else {
            filter.limit.min(defaults::PAGE_SIZE_MAX)
        } as usize;

        let reports = self.reports.lock().expect("repository lock poisoned");
        let mut matching: Vec<Report> = reports
            .values()
            .filter(|r| Self::matches(r, filter))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(matching
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(limit)
            .collect())
    }

    async fn count(&self, filter: &ReportFilter) -> Result<i64> {
        let reports = self.reports.lock().expect("repository lock poisoned");
        Ok(reports.values().filter(|r| Self::matches(r, filter)).count() as i64)
    }

    async fn mark_uploaded(&self, report_id: Uuid, upload_handle: &str) -> Result<()> {
        self.with_report(report_id, |report| {
            if report.status != ReportStatus::Pending {
                return Err(Error::InvalidState(format!(
                    "cannot mark uploaded report {} in status {}",
                    report_id, report.status
                )));
            }
            let now = Utc::now();
            report.upload_handle = Some(upload_handle.to_string());
            report.uploaded_at = Some(now);
            report.status = ReportStatus::Uploaded;
            report.updated_at = now;
            Ok(())
        })
    }

    async fn claim_next(&self) -> Result<Option<Report>> {
        let mut reports = self.reports.lock().expect("repository lock poisoned");
        let now = Utc::now();

        let next_id = reports
            .values()
            .filter(|r| {
                r.claimed_at.is_none()
                    && matches!(r.status, ReportStatus::Uploaded | ReportStatus::Processing)
            })
            .min_by_key(|r| r.created_at)
            .map(|r| r.id);

        let Some(id) = next_id else {
            return Ok(None);
        };

        let report = reports.get_mut(&id).ok_or(Error::ReportNotFound(id))?;
        report.status = ReportStatus::Processing;
        report.stage = ReportStage::FileUpload;
        report.progress = ReportStage::FileUpload.progress();
        report.claimed_at = Some(now);
        report.started_at.get_or_insert(now);
        report.updated_at = now;
        Ok(Some(report.clone()))
    }

    async fn reclaim_stale(
        &self,
        report_id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<Report>> {
        let mut reports = self.reports.lock().expect("repository lock poisoned");
        let Some(report) = reports.get_mut(&report_id) else {
            return Ok(None);
        };

        let lease_stale = report.claimed_at.map_or(true, |at| at < stale_before);
        if report.status != ReportStatus::Processing || !lease_stale {
            return Ok(None);
        }

        let now = Utc::now();
        report.claimed_at = Some(now);
        report.stage = ReportStage::FileUpload;
        report.progress = ReportStage::FileUpload.progress();
        report.retry_count = 0;
        report.last_transient_error = None;
        report.updated_at = now;
        Ok(Some(report.clone()))
    }

    async fn release_claim(&self, report_id: Uuid) -> Result<()> {
        self.with_report(report_id, |report| {
            report.claimed_at = None;
            report.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn update_stage(&self, report_id: Uuid, stage: ReportStage) -> Result<()> {
        self.with_report(report_id, |report| {
            if report.status != ReportStatus::Processing {
                return Err(Error::InvalidState(format!(
                    "cannot update stage of report {} in status {}",
                    report_id, report.status
                )));
            }
            report.stage = stage;
            report.progress = stage.progress();
            report.updated_at = Utc::now();
            Ok(())
        })
    }

    async fn record_request(&self, report_id: Uuid, task_id: Option<&str>) -> Result<()> {
        self.with_report(report_id, |report| {
            let now = Utc::now();
            report.request_at = Some(now);
            if let Some(task_id) = task_id {
                report.task_id = Some(task_id.to_string());
            }
            report.updated_at = now;
            Ok(())
        })
    }

    async fn record_response(&self, report_id: Uuid) -> Result<()> {
        self.with_report(report_id, |report| {
            let now = Utc::now();
            report.response_at = Some(now);
            report.updated_at = now;
            Ok(())
        })
    }

    async fn increment_retry(&self, report_id: Uuid, error: &str) -> Result<i32> {
        self.with_report(report_id, |report| {
            report.retry_count += 1;
            report.last_transient_error = Some(error.to_string());
            report.updated_at = Utc::now();
            Ok(report.retry_count)
        })
    }

    async fn mark_completed(
        &self,
        report_id: Uuid,
        artifacts: &[Artifact],
        summary: Option<&str>,
        analysis: &JsonValue,
        processing_secs: Option<f64>,
    ) -> Result<()> {
        self.with_report(report_id, |report| {
            if report.status != ReportStatus::Processing {
                return Err(Error::InvalidState(format!(
                    "cannot complete report {} in status {}",
                    report_id, report.status
                )));
            }
            let now = Utc::now();
            report.status = ReportStatus::Completed;
            report.stage = ReportStage::Completed;
            report.progress = 100;
            report.artifacts = artifacts.to_vec();
            report.summary = summary.map(str::to_string);
            report.analysis = Some(analysis.clone());
            report.processing_secs = processing_secs;
            report.completed_at = Some(now);
            report.response_at.get_or_insert(now);
            report.claimed_at = None;
            report.error_message = None;
            report.expires_at = Some(now + Duration::days(defaults::RETENTION_DAYS));
            report.updated_at = now;
            Ok(())
        })
    }

    async fn mark_failed(&self, report_id: Uuid, error: &str) -> Result<()> {
        self.with_report(report_id, |report| {
            if report.status.is_terminal() {
                return Err(Error::InvalidState(format!(
                    "cannot fail report {} in status {}",
                    report_id, report.status
                )));
            }
            let now = Utc::now();
            report.status = ReportStatus::Failed;
            report.stage = ReportStage::Failed;
            report.error_message = Some(error.to_string());
            report.completed_at = Some(now);
            report.claimed_at = None;
            report.updated_at = now;
            Ok(())
        })
    }

    async fn delete(&self, report_id: Uuid) -> Result<Option<Report>> {
        Ok(self
            .reports
            .lock()
            .expect("repository lock poisoned")
            .remove(&report_id))
    }

    async fn clear_upload_handle(&self, report_id: Uuid) -> Result<()> {
        self.with_report(report_id, |report| {
            report.upload_handle = None;
            report.updated_at = Utc::now();
            Ok(())
        })
    }
}

/// In-memory implementation of `BlobStore`.
#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored blobs. Test helper.
    pub fn len(&self) -> usize {
        self.blobs.lock().expect("blob lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, handle: &str, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .expect("blob lock poisoned")
            .insert(handle.to_string(), data.to_vec());
        Ok(())
    }

    async fn get(&self, handle: &str) -> Result<Vec<u8>> {
        self.blobs
            .lock()
            .expect("blob lock poisoned")
            .get(handle)
            .cloned()
            .ok_or_else(|| Error::Storage(format!("blob not found: {handle}")))
    }

    async fn delete(&self, handle: &str) -> Result<()> {
        self.blobs.lock().expect("blob lock poisoned").remove(handle);
        Ok(())
    }

    async fn exists(&self, handle: &str) -> Result<bool> {
        Ok(self
            .blobs
            .lock()
            .expect("blob lock poisoned")
            .contains_key(handle))
    }
}
