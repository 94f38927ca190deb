//! HTTP analyzer backend.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use finsight_core::{
    AnalysisOutcome, AnalyzeRequest, AnalyzerBackend, Error, Result, TaskState, TaskStatus,
};

use crate::config::AnalyzerConfig;

/// Analyzer backend talking to the external analysis service over HTTP.
pub struct HttpAnalyzerBackend {
    config: AnalyzerConfig,
    client: reqwest::Client,
}

/// Wire response of `POST /analyze/sync`.
#[derive(Debug, Deserialize)]
struct AnalyzeResponseWire {
    success: bool,
    analysis_result: Option<JsonValue>,
    html_report: Option<String>,
    processing_time: Option<f64>,
    request_id: Option<String>,
    error_message: Option<String>,
}

/// Wire response of `POST /analyze`.
#[derive(Debug, Deserialize)]
struct SubmitResponseWire {
    success: bool,
    task_id: Option<String>,
    error_message: Option<String>,
}

/// Wire response of `GET /task/{task_id}`.
#[derive(Debug, Deserialize)]
struct TaskStatusWire {
    status: String,
    analysis_result: Option<JsonValue>,
    html_report: Option<String>,
    processing_time: Option<f64>,
    error_message: Option<String>,
}

impl HttpAnalyzerBackend {
    pub fn new(config: AnalyzerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("failed to build analyzer client: {e}")))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Map a non-2xx response to a classified error: 5xx is transient
    /// (analyzer degraded), 4xx is terminal (this request will never work).
    async fn classify_http_error(response: reqwest::Response) -> Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let detail = format!("analyzer returned {status}: {body}");
        if status.is_server_error() {
            Error::AnalyzerUnavailable(detail)
        } else {
            Error::AnalyzerRejected(detail)
        }
    }

    fn outcome_from_parts(
        analysis: Option<JsonValue>,
        rendered_report: Option<String>,
        processing_secs: Option<f64>,
        request_id: Option<String>,
    ) -> Result<AnalysisOutcome> {
        // A 200 without the structured result is a terminal failure: there
        // is nothing to persist and a retry would get the same answer.
        let analysis = analysis.ok_or_else(|| {
            Error::MissingAnalysis("analyzer response carried no analysis_result".to_string())
        })?;

        Ok(AnalysisOutcome {
            analysis,
            rendered_report,
            processing_secs,
            request_id,
        })
    }
}

#[async_trait]
impl AnalyzerBackend for HttpAnalyzerBackend {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisOutcome> {
        let url = format!("{}/analyze/sync", self.config.base_url);
        debug!(
            subsystem = "analysis",
            component = "http",
            op = "analyze",
            report_kind = %request.report_type,
            file_size = request.file_base64.len(),
            "Sending synchronous analyze request"
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.config.analyze_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_http_error(response).await);
        }

        let wire: AnalyzeResponseWire = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("malformed analyzer response: {e}")))?;

        if !wire.success {
            let msg = wire
                .error_message
                .unwrap_or_else(|| "analyzer reported failure without detail".to_string());
            warn!(
                subsystem = "analysis",
                component = "http",
                error = %msg,
                "Analyzer rejected the document"
            );
            return Err(Error::AnalyzerRejected(msg));
        }

        Self::outcome_from_parts(
            wire.analysis_result,
            wire.html_report,
            wire.processing_time,
            wire.request_id,
        )
    }

    async fn submit(&self, request: &AnalyzeRequest) -> Result<String> {
        let url = format!("{}/analyze", self.config.base_url);
        let response = self
            .client
            .post(&url)
            .json(request)
            .timeout(self.config.short_timeout)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify_http_error(response).await);
        }

        let wire: SubmitResponseWire = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("malformed submit response: {e}")))?;

        if !wire.success {
            return Err(Error::AnalyzerRejected(
                wire.error_message
                    .unwrap_or_else(|| "analyzer refused the task".to_string()),
            ));
        }

        wire.task_id.ok_or_else(|| {
            Error::Serialization("submit response carried no task_id".to_string())
        })
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let url = format!("{}/task/{}", self.config.base_url, task_id);
        let response = self
            .client
            .get(&url)
            .timeout(self.config.short_timeout)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("analyzer task {task_id}")));
        }
        if !response.status().is_success() {
            return Err(Self::classify_http_error(response).await);
        }

        let wire: TaskStatusWire = response
            .json()
            .await
            .map_err(|e| Error::Serialization(format!("malformed task status: {e}")))?;

        let state = match wire.status.as_str() {
            "pending" | "queued" => TaskState::Pending,
            "processing" | "running" => TaskState::Processing,
            "completed" => TaskState::Completed,
            "failed" => TaskState::Failed,
            "cancelled" => TaskState::Cancelled,
            other => {
                return Err(Error::Serialization(format!(
                    "unknown analyzer task status: {other}"
                )))
            }
        };

        let outcome = if state == TaskState::Completed {
            Some(Self::outcome_from_parts(
                wire.analysis_result,
                wire.html_report,
                wire.processing_time,
                None,
            )?)
        } else {
            None
        };

        Ok(TaskStatus {
            state,
            outcome,
            error_message: wire.error_message,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use finsight_core::ReportKind;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> AnalyzeRequest {
        AnalyzeRequest {
            file_base64: "JVBERi0xLjc=".to_string(),
            mime_type: "application/pdf".to_string(),
            report_type: ReportKind::BankStatement,
            file_name: "statement.pdf".to_string(),
            custom_prompt: None,
            params: None,
        }
    }

    async fn backend(server: &MockServer) -> HttpAnalyzerBackend {
        HttpAnalyzerBackend::new(AnalyzerConfig::new().base_url(server.uri())).unwrap()
    }

    #[tokio::test]
    async fn analyze_success_returns_outcome() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/sync"))
            .and(body_partial_json(serde_json::json!({
                "report_type": "bank_statement",
                "mime_type": "application/pdf"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "analysis_result": {"score": 0.92},
                "html_report": "<html>report</html>",
                "processing_time": 12.5,
                "request_id": "req-1"
            })))
            .mount(&server)
            .await;

        let outcome = backend(&server).await.analyze(&request()).await.unwrap();
        assert_eq!(outcome.analysis["score"], 0.92);
        assert_eq!(outcome.rendered_report.as_deref(), Some("<html>report</html>"));
        assert_eq!(outcome.processing_secs, Some(12.5));
    }

    #[tokio::test]
    async fn server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/sync"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = backend(&server).await.analyze(&request()).await.unwrap_err();
        assert!(matches!(err, Error::AnalyzerUnavailable(_)));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn client_error_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/sync"))
            .respond_with(ResponseTemplate::new(422))
            .mount(&server)
            .await;

        let err = backend(&server).await.analyze(&request()).await.unwrap_err();
        assert!(matches!(err, Error::AnalyzerRejected(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn explicit_rejection_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error_message": "unreadable document"
            })))
            .mount(&server)
            .await;

        let err = backend(&server).await.analyze(&request()).await.unwrap_err();
        match err {
            Error::AnalyzerRejected(msg) => assert!(msg.contains("unreadable")),
            other => panic!("expected AnalyzerRejected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_analysis_is_missing_analysis() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze/sync"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "html_report": "<html></html>"
            })))
            .mount(&server)
            .await;

        let err = backend(&server).await.analyze(&request()).await.unwrap_err();
        assert!(matches!(err, Error::MissingAnalysis(_)));
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn submit_then_poll_completed_task() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/analyze"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "task_id": "task-42"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/task/task-42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "completed",
                "analysis_result": {"score": 0.5},
                "html_report": "<html></html>"
            })))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let task_id = backend.submit(&request()).await.unwrap();
        assert_eq!(task_id, "task-42");

        let status = backend.task_status(&task_id).await.unwrap();
        assert_eq!(status.state, TaskState::Completed);
        assert!(status.outcome.is_some());
    }

    #[tokio::test]
    async fn unknown_task_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/task/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = backend(&server).await.task_status("ghost").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
