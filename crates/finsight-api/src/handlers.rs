//! Report HTTP handlers.
//!
//! Intake is synchronous only up to durable acceptance: validate, persist
//! the record and the raw upload, mark it `uploaded`, and return. The
//! worker picks the report up from there on its own schedule.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use finsight_core::{
    defaults, generate_blob_handle, new_v7, sanitize_filename, validate_upload,
    CreateReportRequest, CreateReportResponse, Error, ListReportsRequest, ListReportsResponse,
    NewReport, Report, ReportFilter, ReportStatus, ReportStatusView,
};
use finsight_db::compute_content_hash;

use crate::app::AppState;

type ErrorResponse = (StatusCode, Json<serde_json::Value>);

/// Map a pipeline error onto an HTTP response.
fn error_response(e: Error) -> ErrorResponse {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        match &e {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::AnalyzerTimeout(_) | Error::AnalyzerUnavailable(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %e, "Request failed");
    }
    (status, Json(json!({ "error": e.to_string() })))
}

fn bad_request(msg: impl Into<String>) -> ErrorResponse {
    error_response(Error::InvalidInput(msg.into()))
}

async fn fetch_report(state: &AppState, report_id: Uuid) -> Result<Report, ErrorResponse> {
    state
        .repo
        .get(report_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::ReportNotFound(report_id)))
}

pub async fn health_check() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// `POST /api/v1/reports` — accept a document for analysis.
///
/// Returns `202 Accepted` once the report is durably recorded; processing
/// happens in the background.
pub async fn create_report(
    State(state): State<AppState>,
    Json(req): Json<CreateReportRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    if req.user_id.trim().is_empty() {
        return Err(bad_request("user_id is required"));
    }

    let data = base64::engine::general_purpose::STANDARD
        .decode(req.file_base64.as_bytes())
        .map_err(|e| bad_request(format!("invalid base64 payload: {e}")))?;

    let validation = validate_upload(&req.file_name, &data);
    if !validation.allowed {
        let reason = validation
            .block_reason
            .unwrap_or_else(|| "upload rejected".to_string());
        return Err(bad_request(reason));
    }

    let file_name = sanitize_filename(&req.file_name);
    let report = state
        .repo
        .create(NewReport {
            id: new_v7(),
            user_id: req.user_id,
            kind: req.kind,
            file_name: file_name.clone(),
            file_size: data.len() as i64,
            mime_type: validation.detected_mime,
            content_hash: Some(compute_content_hash(&data)),
            params: req.params,
            tags: req.tags,
            max_retries: defaults::ANALYZE_MAX_RETRIES,
        })
        .await
        .map_err(error_response)?;

    let handle = generate_blob_handle(&report.id, &file_name);
    if let Err(e) = state.blobs.put(&handle, &data).await {
        // Roll back the record so a report without its upload never lingers.
        if let Err(cleanup) = state.repo.delete(report.id).await {
            warn!(
                report_id = %report.id,
                error = %cleanup,
                "Failed to roll back report after storage failure"
            );
        }
        return Err(error_response(e));
    }
    state
        .repo
        .mark_uploaded(report.id, &handle)
        .await
        .map_err(error_response)?;

    info!(
        report_id = %report.id,
        report_kind = %report.kind,
        file_size = report.file_size,
        "Report accepted for analysis"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(CreateReportResponse {
            report_id: report.id,
            status: ReportStatus::Uploaded,
        }),
    ))
}

/// `GET /api/v1/reports` — paginated listing for one user, newest first.
pub async fn list_reports(
    State(state): State<AppState>,
    Query(req): Query<ListReportsRequest>,
) -> Result<impl IntoResponse, ErrorResponse> {
    if req.user_id.trim().is_empty() {
        return Err(bad_request("user_id is required"));
    }

    let page = req.page.max(1);
    let page_size = req.page_size.clamp(1, defaults::PAGE_SIZE_MAX);
    let filter = ReportFilter {
        user_id: Some(req.user_id),
        kind: req.kind,
        limit: page_size,
        offset: (page - 1) * page_size,
    };

    let reports = state.repo.list(&filter).await.map_err(error_response)?;
    let total = state.repo.count(&filter).await.map_err(error_response)?;

    Ok(Json(ListReportsResponse {
        reports,
        page,
        page_size,
        total,
    }))
}

/// `GET /api/v1/reports/:id` — the full report record.
pub async fn get_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let report = fetch_report(&state, report_id).await?;
    Ok(Json(report))
}

/// `GET /api/v1/reports/:id/status` — the polling view.
pub async fn report_status(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let report = fetch_report(&state, report_id).await?;
    Ok(Json(ReportStatusView::from(&report)))
}

/// `GET /api/v1/reports/:id/artifacts/:name` — download one artifact.
pub async fn download_artifact(
    State(state): State<AppState>,
    Path((report_id, name)): Path<(Uuid, String)>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let report = fetch_report(&state, report_id).await?;
    let artifact = report.artifact(&name).ok_or_else(|| {
        error_response(Error::NotFound(format!(
            "artifact {name} of report {report_id}"
        )))
    })?;

    let data = state
        .blobs
        .get(&artifact.handle)
        .await
        .map_err(error_response)?;

    let content_type = match name.rsplit('.').next() {
        Some("json") => "application/json",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    };
    Ok(([(header::CONTENT_TYPE, content_type)], data))
}

/// `POST /api/v1/reports/:id/recover` — recover a stuck report.
pub async fn recover_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let outcome = state
        .recovery
        .recover(report_id)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "report_id": report_id,
        "outcome": outcome,
    })))
}

/// `DELETE /api/v1/reports/:id` — remove a report and reclaim its storage.
///
/// While `pending`, `uploaded`, or `processing` this is a cancel: an
/// in-flight orchestration notices the missing record and aborts. A
/// terminal report (completed or failed) is simply deleted along with its
/// artifacts. The record is removed first and the blobs are reclaimed from
/// the returned row, so a report that completes concurrently cannot leak
/// artifacts written after any earlier read. A second call finds nothing
/// and returns 404.
pub async fn cancel_report(
    State(state): State<AppState>,
    Path(report_id): Path<Uuid>,
) -> Result<impl IntoResponse, ErrorResponse> {
    let report = state
        .repo
        .delete(report_id)
        .await
        .map_err(error_response)?
        .ok_or_else(|| error_response(Error::ReportNotFound(report_id)))?;

    if let Some(handle) = &report.upload_handle {
        if let Err(e) = state.blobs.delete(handle).await {
            warn!(report_id = %report_id, error = %e, "Failed to delete upload blob");
        }
    }
    for artifact in &report.artifacts {
        if let Err(e) = state.blobs.delete(&artifact.handle).await {
            warn!(report_id = %report_id, error = %e, "Failed to delete artifact blob");
        }
    }

    let verb = if report.status.is_cancellable() {
        "cancelled"
    } else {
        "deleted"
    };
    info!(report_id = %report_id, report_status = %report.status, "Report removed");
    Ok(Json(json!({
        "report_id": report_id,
        "status": verb,
    })))
}
