//! Application state and router assembly.

use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use utoipa::OpenApi;

use finsight_core::{defaults, BlobStore, ReportRepository};
use finsight_jobs::RecoveryService;

use crate::handlers;

/// OpenAPI documentation served at `/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Finsight Report API",
        description = "AI-driven analysis of bank statements and credit reports"
    ),
    components(schemas(
        finsight_core::ReportKind,
        finsight_core::ReportStatus,
        finsight_core::ReportStage,
        finsight_core::Artifact,
        finsight_core::CreateReportRequest,
        finsight_core::CreateReportResponse,
        finsight_core::ReportStatusView,
        finsight_core::RecoveryOutcome,
    )),
    tags(
        (name = "Reports", description = "Report intake, status, and artifacts"),
        (name = "System", description = "Health checks")
    )
)]
struct ApiDoc;

async fn openapi_json() -> axum::Json<utoipa::openapi::OpenApi> {
    axum::Json(ApiDoc::openapi())
}

/// Generates time-ordered UUIDv7 request correlation IDs.
///
/// UUIDv7 embeds a Unix timestamp, so IDs sort chronologically — useful for
/// log correlation across the gateway, worker, and analyzer.
#[derive(Clone, Default)]
pub struct MakeRequestUuidV7;

impl MakeRequestId for MakeRequestUuidV7 {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = Uuid::now_v7().to_string().parse().ok()?;
        Some(RequestId::new(id))
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Report repository.
    pub repo: Arc<dyn ReportRepository>,
    /// Blob storage for uploads and artifacts.
    pub blobs: Arc<dyn BlobStore>,
    /// Recovery gateway for stuck reports.
    pub recovery: Arc<RecoveryService>,
}

/// Parse allowed origins from the comma-separated `ALLOWED_ORIGINS`
/// environment variable. Invalid entries are logged and skipped.
pub fn parse_allowed_origins() -> Vec<HeaderValue> {
    let origins_str =
        std::env::var("ALLOWED_ORIGINS").unwrap_or_else(|_| "http://localhost:3000".to_string());

    if origins_str.trim().is_empty() {
        return vec![HeaderValue::from_static("http://localhost:3000")];
    }

    origins_str
        .split(',')
        .filter_map(|s| {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return None;
            }
            match trimmed.parse::<HeaderValue>() {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!("Invalid CORS origin '{}': {}", trimmed, e);
                    None
                }
            }
        })
        .collect()
}

/// Build the application router with the full middleware stack.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/openapi.json", get(openapi_json))
        .route(
            "/api/v1/reports",
            get(handlers::list_reports).post(handlers::create_report),
        )
        .route(
            "/api/v1/reports/:id",
            get(handlers::get_report).delete(handlers::cancel_report),
        )
        .route("/api/v1/reports/:id/status", get(handlers::report_status))
        .route(
            "/api/v1/reports/:id/artifacts/:name",
            get(handlers::download_artifact),
        )
        .route("/api/v1/reports/:id/recover", post(handlers::recover_report))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
        .layer(CatchPanicLayer::new())
        .layer({
            let allowed_origins = parse_allowed_origins();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(allowed_origins))
                .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
                .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::ACCEPT])
                .max_age(std::time::Duration::from_secs(defaults::CORS_MAX_AGE_SECS))
        })
        .layer(RequestBodyLimitLayer::new(defaults::MAX_BODY_SIZE_BYTES))
        .with_state(state)
}
