//! End-to-end orchestration tests over the in-memory repository and blob
//! store, with the analyzer scripted per test.

use std::sync::Arc;

use finsight_analysis::{AnalyzerConfig, AnalyzerMode, MockAnalyzerBackend, MockOutcome};
use finsight_core::{
    defaults, new_v7, BlobStore, NewReport, Report, ReportKind, ReportRepository, ReportStage,
    ReportStatus, TaskState, TaskStatus,
};
use finsight_db::{InMemoryBlobStore, InMemoryReportRepository};
use finsight_jobs::{ReportOrchestrator, ANALYSIS_ARTIFACT, REPORT_ARTIFACT};

fn orchestrator(
    repo: &Arc<InMemoryReportRepository>,
    blobs: &Arc<InMemoryBlobStore>,
    analyzer: MockAnalyzerBackend,
    config: AnalyzerConfig,
) -> ReportOrchestrator {
    ReportOrchestrator::new(
        repo.clone() as Arc<dyn ReportRepository>,
        blobs.clone() as Arc<dyn BlobStore>,
        Arc::new(analyzer),
        config,
    )
}

/// Run a report through the intake path up to the claimed state.
async fn intake(repo: &InMemoryReportRepository, blobs: &InMemoryBlobStore) -> Report {
    let created = repo
        .create(NewReport {
            id: new_v7(),
            user_id: "u1".to_string(),
            kind: ReportKind::BankStatement,
            file_name: "statement.pdf".to_string(),
            file_size: 9,
            mime_type: "application/pdf".to_string(),
            content_hash: None,
            params: None,
            tags: vec![],
            max_retries: defaults::ANALYZE_MAX_RETRIES,
        })
        .await
        .unwrap();

    let handle = format!("blobs/raw/{}", created.id);
    blobs.put(&handle, b"%PDF-1.7\n").await.unwrap();
    repo.mark_uploaded(created.id, &handle).await.unwrap();

    repo.claim_next().await.unwrap().unwrap()
}

#[tokio::test]
async fn happy_path_completes_with_artifact_pair() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new();
    let orch = orchestrator(&repo, &blobs, analyzer.clone(), AnalyzerConfig::default());

    let report = intake(&repo, &blobs).await;
    orch.process(report.clone()).await.unwrap();

    let done = repo.snapshot(report.id).unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert_eq!(done.stage, ReportStage::Completed);
    assert_eq!(done.progress, 100);
    assert_eq!(done.summary.as_deref(), Some("Stable income, no anomalies detected"));
    assert!(done.analysis.is_some());
    assert!(done.completed_at.is_some());
    assert!(done.claimed_at.is_none());
    assert!(done.expires_at.is_some());

    let names: Vec<&str> = done.artifacts.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec![ANALYSIS_ARTIFACT, REPORT_ARTIFACT]);

    // Exactly the two artifacts remain; the raw upload is reclaimed.
    assert_eq!(blobs.len(), 2);
    assert!(done.upload_handle.is_none());

    let json = blobs.get(&done.artifacts[0].handle).await.unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&json).unwrap();
    assert_eq!(parsed["risk_score"], 0.12);

    assert_eq!(analyzer.analyze_call_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn unresponsive_analyzer_fails_after_deadline_and_retries() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new().with_default(MockOutcome::Hang);
    let orch = orchestrator(&repo, &blobs, analyzer.clone(), AnalyzerConfig::default());

    let report = intake(&repo, &blobs).await;
    orch.process(report.clone()).await.unwrap();

    // Initial attempt plus the full retry bound, each cut off by the deadline.
    assert_eq!(
        analyzer.analyze_call_count(),
        1 + defaults::ANALYZE_MAX_RETRIES as usize
    );

    let failed = repo.snapshot(report.id).unwrap();
    assert_eq!(failed.status, ReportStatus::Failed);
    assert_eq!(failed.retry_count, defaults::ANALYZE_MAX_RETRIES);
    let message = failed.error_message.unwrap();
    assert!(message.contains("480"), "unexpected error: {message}");
    assert!(failed.claimed_at.is_none());

    // Failed record is retained but its raw upload is not.
    assert!(failed.upload_handle.is_none());
    assert!(blobs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn transient_failure_retries_then_completes() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new()
        .with_outcome(MockOutcome::Transient("connection refused".to_string()));
    let orch = orchestrator(&repo, &blobs, analyzer.clone(), AnalyzerConfig::default());

    let report = intake(&repo, &blobs).await;
    orch.process(report.clone()).await.unwrap();

    assert_eq!(analyzer.analyze_call_count(), 2);
    let done = repo.snapshot(report.id).unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert_eq!(done.retry_count, 1);
    assert_eq!(
        done.last_transient_error.as_deref(),
        Some("Analyzer unavailable: connection refused")
    );
}

#[tokio::test(start_paused = true)]
async fn success_on_the_last_permitted_retry_completes() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new()
        .with_outcome(MockOutcome::Transient("503 service unavailable".to_string()))
        .with_outcome(MockOutcome::Transient("503 service unavailable".to_string()));
    let orch = orchestrator(&repo, &blobs, analyzer.clone(), AnalyzerConfig::default());

    let report = intake(&repo, &blobs).await;
    orch.process(report.clone()).await.unwrap();

    // Initial attempt, then one retry per failure, succeeding at the bound.
    assert_eq!(
        analyzer.analyze_call_count(),
        1 + defaults::ANALYZE_MAX_RETRIES as usize
    );
    let done = repo.snapshot(report.id).unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert_eq!(done.retry_count, defaults::ANALYZE_MAX_RETRIES);
    assert_eq!(done.artifacts.len(), 2);
    assert!(done.upload_handle.is_none());
}

#[tokio::test]
async fn terminal_rejection_fails_without_retry() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new()
        .with_outcome(MockOutcome::Terminal("unsupported document layout".to_string()));
    let orch = orchestrator(&repo, &blobs, analyzer.clone(), AnalyzerConfig::default());

    let report = intake(&repo, &blobs).await;
    orch.process(report.clone()).await.unwrap();

    assert_eq!(analyzer.analyze_call_count(), 1);
    let failed = repo.snapshot(report.id).unwrap();
    assert_eq!(failed.status, ReportStatus::Failed);
    assert!(failed
        .error_message
        .unwrap()
        .contains("unsupported document layout"));
    assert!(blobs.is_empty());
}

#[tokio::test]
async fn missing_upload_blob_fails_the_report() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let orch = orchestrator(
        &repo,
        &blobs,
        MockAnalyzerBackend::new(),
        AnalyzerConfig::default(),
    );

    let report = intake(&repo, &blobs).await;
    blobs.delete(report.upload_handle.as_deref().unwrap()).await.unwrap();

    orch.process(report.clone()).await.unwrap();

    let failed = repo.snapshot(report.id).unwrap();
    assert_eq!(failed.status, ReportStatus::Failed);
    assert!(failed.error_message.unwrap().contains("failed to read upload"));
}

#[tokio::test]
async fn cancel_before_processing_cleans_up_quietly() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let orch = orchestrator(
        &repo,
        &blobs,
        MockAnalyzerBackend::new(),
        AnalyzerConfig::default(),
    );

    let report = intake(&repo, &blobs).await;
    // User cancels between claim and orchestration.
    repo.delete(report.id).await.unwrap();

    orch.process(report.clone()).await.unwrap();

    assert!(repo.snapshot(report.id).is_none());
    assert!(blobs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn cancel_during_retry_backoff_cleans_up_quietly() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer =
        MockAnalyzerBackend::new().with_outcome(MockOutcome::Transient("503".to_string()));
    let orch = Arc::new(orchestrator(
        &repo,
        &blobs,
        analyzer,
        AnalyzerConfig::default(),
    ));

    let report = intake(&repo, &blobs).await;
    let report_id = report.id;

    let run = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.process(report).await })
    };

    // Let the first attempt fail and the backoff sleep begin, then cancel.
    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    repo.delete(report_id).await.unwrap();

    run.await.unwrap().unwrap();

    assert!(repo.snapshot(report_id).is_none());
    assert!(blobs.is_empty());
}

#[tokio::test(start_paused = true)]
async fn queued_mode_records_task_id_and_harvests_result() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new()
        .with_task_status(TaskStatus {
            state: TaskState::Processing,
            outcome: None,
            error_message: None,
        })
        .with_task_status(TaskStatus {
            state: TaskState::Completed,
            outcome: Some(MockAnalyzerBackend::canned_outcome()),
            error_message: None,
        });
    let config = AnalyzerConfig::default().mode(AnalyzerMode::Queued);
    let orch = orchestrator(&repo, &blobs, analyzer, config);

    let report = intake(&repo, &blobs).await;
    orch.process(report.clone()).await.unwrap();

    let done = repo.snapshot(report.id).unwrap();
    assert_eq!(done.status, ReportStatus::Completed);
    assert!(done.task_id.is_some());
    assert_eq!(done.artifacts.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn queued_task_failure_fails_the_report() {
    let repo = Arc::new(InMemoryReportRepository::new());
    let blobs = Arc::new(InMemoryBlobStore::new());
    let analyzer = MockAnalyzerBackend::new().with_task_status(TaskStatus {
        state: TaskState::Failed,
        outcome: None,
        error_message: Some("model refused the document".to_string()),
    });
    let config = AnalyzerConfig::default()
        .mode(AnalyzerMode::Queued)
        .max_retries(0);
    let orch = orchestrator(&repo, &blobs, analyzer, config);

    let mut report = intake(&repo, &blobs).await;
    report.max_retries = 0;

    orch.process(report.clone()).await.unwrap();

    let failed = repo.snapshot(report.id).unwrap();
    assert_eq!(failed.status, ReportStatus::Failed);
    assert!(failed
        .error_message
        .unwrap()
        .contains("model refused the document"));
}
