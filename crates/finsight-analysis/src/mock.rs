//! Mock analyzer backend for deterministic testing.
//!
//! Outcomes are scripted: each call pops the next scripted outcome, and an
//! exhausted script falls back to the default outcome. Calls are logged for
//! assertions on retry behavior.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use finsight_core::{
    AnalysisOutcome, AnalyzeRequest, AnalyzerBackend, Error, Result, TaskState, TaskStatus,
};

/// One scripted analyzer behavior.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Return this outcome.
    Success(AnalysisOutcome),
    /// Fail with a transient error (retryable).
    Transient(String),
    /// Fail with a terminal rejection (not retryable).
    Terminal(String),
    /// Never respond. Pairs with paused-time tests of the hard deadline.
    Hang,
}

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub file_name: String,
}

/// Scriptable in-process implementation of `AnalyzerBackend`.
#[derive(Clone)]
pub struct MockAnalyzerBackend {
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    default_outcome: Arc<MockOutcome>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    task_states: Arc<Mutex<VecDeque<TaskStatus>>>,
}

impl Default for MockAnalyzerBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockAnalyzerBackend {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(VecDeque::new())),
            default_outcome: Arc::new(MockOutcome::Success(Self::canned_outcome())),
            call_log: Arc::new(Mutex::new(Vec::new())),
            task_states: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// A plausible analysis payload for tests.
    pub fn canned_outcome() -> AnalysisOutcome {
        AnalysisOutcome {
            analysis: serde_json::json!({
                "summary": "Stable income, no anomalies detected",
                "risk_score": 0.12,
                "monthly_income": 5400.0
            }),
            rendered_report: Some("<html><body>Analysis report</body></html>".to_string()),
            processing_secs: Some(3.2),
            request_id: Some("mock-req".to_string()),
        }
    }

    /// Append a scripted outcome for the next `analyze` call.
    pub fn with_outcome(self, outcome: MockOutcome) -> Self {
        self.script
            .lock()
            .expect("mock lock poisoned")
            .push_back(outcome);
        self
    }

    /// Replace the fallback used once the script is exhausted.
    pub fn with_default(mut self, outcome: MockOutcome) -> Self {
        self.default_outcome = Arc::new(outcome);
        self
    }

    /// Append a scripted task status for the next `task_status` call.
    pub fn with_task_status(self, status: TaskStatus) -> Self {
        self.task_states
            .lock()
            .expect("mock lock poisoned")
            .push_back(status);
        self
    }

    /// All logged calls.
    pub fn calls(&self) -> Vec<MockCall> {
        self.call_log.lock().expect("mock lock poisoned").clone()
    }

    /// Number of `analyze` calls observed.
    pub fn analyze_call_count(&self) -> usize {
        self.call_log
            .lock()
            .expect("mock lock poisoned")
            .iter()
            .filter(|c| c.operation == "analyze")
            .count()
    }

    fn log_call(&self, operation: &str, request: &AnalyzeRequest) {
        self.call_log
            .lock()
            .expect("mock lock poisoned")
            .push(MockCall {
                operation: operation.to_string(),
                file_name: request.file_name.clone(),
            });
    }

    fn next_outcome(&self) -> MockOutcome {
        self.script
            .lock()
            .expect("mock lock poisoned")
            .pop_front()
            .unwrap_or_else(|| (*self.default_outcome).clone())
    }
}

#[async_trait]
impl AnalyzerBackend for MockAnalyzerBackend {
    async fn analyze(&self, request: &AnalyzeRequest) -> Result<AnalysisOutcome> {
        self.log_call("analyze", request);
        match self.next_outcome() {
            MockOutcome::Success(outcome) => Ok(outcome),
            MockOutcome::Transient(msg) => Err(Error::AnalyzerUnavailable(msg)),
            MockOutcome::Terminal(msg) => Err(Error::AnalyzerRejected(msg)),
            MockOutcome::Hang => {
                // Effectively forever; real time never reaches this, and
                // paused-time tests rely on the caller's deadline firing.
                tokio::time::sleep(std::time::Duration::from_secs(86_400)).await;
                Err(Error::Internal("mock hang elapsed".to_string()))
            }
        }
    }

    async fn submit(&self, request: &AnalyzeRequest) -> Result<String> {
        self.log_call("submit", request);
        match self.next_outcome() {
            MockOutcome::Transient(msg) => Err(Error::AnalyzerUnavailable(msg)),
            MockOutcome::Terminal(msg) => Err(Error::AnalyzerRejected(msg)),
            _ => Ok(format!("mock-task-{}", self.calls().len())),
        }
    }

    async fn task_status(&self, task_id: &str) -> Result<TaskStatus> {
        let scripted = self
            .task_states
            .lock()
            .expect("mock lock poisoned")
            .pop_front();
        match scripted {
            Some(status) => Ok(status),
            None => Err(Error::NotFound(format!("analyzer task {task_id}"))),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}
