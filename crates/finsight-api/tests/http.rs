//! HTTP gateway tests against a real listener, with in-memory persistence
//! and a scripted analyzer.

use std::sync::Arc;

use base64::Engine;
use serde_json::json;
use uuid::Uuid;

use finsight_analysis::{AnalyzerConfig, MockAnalyzerBackend};
use finsight_api::{router, AppState};
use finsight_core::ReportRepository;
use finsight_db::{InMemoryBlobStore, InMemoryReportRepository};
use finsight_jobs::{RecoveryService, ReportOrchestrator};

struct TestServer {
    base_url: String,
    repo: Arc<InMemoryReportRepository>,
    blobs: Arc<InMemoryBlobStore>,
    analyzer: MockAnalyzerBackend,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Drive the claimed report through orchestration, as the worker would.
    async fn run_worker_once(&self) {
        let report = self.repo.claim_next().await.unwrap().unwrap();
        let orch = ReportOrchestrator::new(
            self.repo.clone(),
            self.blobs.clone(),
            Arc::new(self.analyzer.clone()),
            AnalyzerConfig::default(),
        );
        orch.process(report).await.unwrap();
    }
}

async fn spawn_server() -> TestServer {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new();
    let recovery = Arc::new(RecoveryService::new(
        repo.clone(),
        blobs.clone(),
        Arc::new(analyzer.clone()),
    ));

    let state = AppState {
        repo: repo.clone(),
        blobs: blobs.clone(),
        recovery,
    };
    let app = router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    TestServer {
        base_url: format!("http://{}", addr),
        repo,
        blobs,
        analyzer,
    }
}

fn pdf_base64() -> String {
    base64::engine::general_purpose::STANDARD.encode(b"%PDF-1.7\nstatement body")
}

fn create_body() -> serde_json::Value {
    json!({
        "user_id": "u1",
        "kind": "bank_statement",
        "file_name": "statement.pdf",
        "file_base64": pdf_base64(),
    })
}

async fn create_report(server: &TestServer) -> Uuid {
    let resp = reqwest::Client::new()
        .post(server.url("/api/v1/reports"))
        .json(&create_body())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: serde_json::Value = resp.json().await.unwrap();
    body["report_id"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn health_endpoint_reports_healthy() {
    let server = spawn_server().await;

    let resp = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn accepted_report_is_durably_uploaded() {
    let server = spawn_server().await;
    let report_id = create_report(&server).await;

    let resp = reqwest::get(server.url(&format!("/api/v1/reports/{report_id}/status")))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "uploaded");
    assert_eq!(body["has_artifacts"], false);

    // The raw upload is already on disk before the request returned.
    assert_eq!(server.blobs.len(), 1);
    let stored = server.repo.snapshot(report_id).unwrap();
    assert!(stored.upload_handle.is_some());
    assert_eq!(stored.mime_type, "application/pdf");
    assert!(stored.content_hash.unwrap().starts_with("blake3:"));
}

#[tokio::test]
async fn invalid_base64_is_rejected() {
    let server = spawn_server().await;

    let resp = reqwest::Client::new()
        .post(server.url("/api/v1/reports"))
        .json(&json!({
            "user_id": "u1",
            "kind": "bank_statement",
            "file_name": "statement.pdf",
            "file_base64": "!!not-base64!!",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn executable_upload_is_rejected() {
    let server = spawn_server().await;
    let elf = base64::engine::general_purpose::STANDARD.encode(b"\x7fELF\x02\x01\x01\x00rest");

    let resp = reqwest::Client::new()
        .post(server.url("/api/v1/reports"))
        .json(&json!({
            "user_id": "u1",
            "kind": "credit_report",
            "file_name": "report.pdf",
            "file_base64": elf,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("Unsupported"));

    // Nothing was persisted.
    assert!(server.blobs.is_empty());
}

#[tokio::test]
async fn unknown_report_returns_not_found() {
    let server = spawn_server().await;

    let resp = reqwest::get(server.url(&format!("/api/v1/reports/{}/status", Uuid::now_v7())))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn completed_report_serves_both_artifacts() {
    let server = spawn_server().await;
    let report_id = create_report(&server).await;
    server.run_worker_once().await;

    let resp = reqwest::get(server.url(&format!("/api/v1/reports/{report_id}/status")))
        .await
        .unwrap();
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["has_artifacts"], true);

    let json_resp = reqwest::get(server.url(&format!(
        "/api/v1/reports/{report_id}/artifacts/analysis.json"
    )))
    .await
    .unwrap();
    assert_eq!(json_resp.status(), 200);
    assert_eq!(
        json_resp.headers()["content-type"].to_str().unwrap(),
        "application/json"
    );
    let analysis: serde_json::Value = json_resp.json().await.unwrap();
    assert_eq!(analysis["risk_score"], 0.12);

    let html_resp = reqwest::get(server.url(&format!(
        "/api/v1/reports/{report_id}/artifacts/report.html"
    )))
    .await
    .unwrap();
    assert_eq!(html_resp.status(), 200);
    assert!(html_resp.headers()["content-type"]
        .to_str()
        .unwrap()
        .starts_with("text/html"));

    let missing = reqwest::get(server.url(&format!(
        "/api/v1/reports/{report_id}/artifacts/nope.txt"
    )))
    .await
    .unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn cancel_reclaims_storage_and_second_cancel_is_not_found() {
    let server = spawn_server().await;
    let report_id = create_report(&server).await;
    let client = reqwest::Client::new();

    let resp = client
        .delete(server.url(&format!("/api/v1/reports/{report_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "cancelled");
    assert!(server.repo.snapshot(report_id).is_none());
    assert!(server.blobs.is_empty());

    let again = client
        .delete(server.url(&format!("/api/v1/reports/{report_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn completed_report_is_deleted_with_its_artifacts() {
    let server = spawn_server().await;
    let report_id = create_report(&server).await;
    server.run_worker_once().await;
    assert_eq!(server.blobs.len(), 2);

    let client = reqwest::Client::new();
    let resp = client
        .delete(server.url(&format!("/api/v1/reports/{report_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    // Terminal reports are deleted outright, not "cancelled".
    assert_eq!(body["status"], "deleted");

    // Both artifact blobs reclaimed along with the record.
    assert!(server.repo.snapshot(report_id).is_none());
    assert!(server.blobs.is_empty());

    let gone = reqwest::get(server.url(&format!("/api/v1/reports/{report_id}/status")))
        .await
        .unwrap();
    assert_eq!(gone.status(), 404);

    let again = client
        .delete(server.url(&format!("/api/v1/reports/{report_id}")))
        .send()
        .await
        .unwrap();
    assert_eq!(again.status(), 404);
}

#[tokio::test]
async fn recover_on_healthy_report_needs_no_action() {
    let server = spawn_server().await;
    let report_id = create_report(&server).await;

    let resp = reqwest::Client::new()
        .post(server.url(&format!("/api/v1/reports/{report_id}/recover")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["outcome"], "no_action_needed");
}

#[tokio::test]
async fn list_is_scoped_to_user_and_paginated() {
    let server = spawn_server().await;
    for _ in 0..3 {
        create_report(&server).await;
    }
    let other = reqwest::Client::new()
        .post(server.url("/api/v1/reports"))
        .json(&json!({
            "user_id": "u2",
            "kind": "credit_report",
            "file_name": "credit.pdf",
            "file_base64": pdf_base64(),
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(other.status(), 202);

    let resp = reqwest::get(server.url("/api/v1/reports?user_id=u1&page=1&page_size=2"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["reports"].as_array().unwrap().len(), 2);
    assert_eq!(body["total"], 3);
    assert_eq!(body["page_size"], 2);
}
