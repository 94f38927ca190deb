//! Report worker: claims uploaded reports and orchestrates them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use finsight_analysis::AnalyzerConfig;
use finsight_core::{defaults, AnalyzerBackend, BlobStore, Report, ReportRepository, Result};

use crate::orchestrator::ReportOrchestrator;

/// Event bus capacity for worker events.
const EVENT_BUS_CAPACITY: usize = 256;

/// Configuration for the report worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Polling interval in milliseconds when no reports are claimable.
    pub poll_interval_ms: u64,
    /// Maximum number of concurrently orchestrated reports.
    pub max_concurrent: usize,
    /// Whether to enable report processing.
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::WORKER_POLL_INTERVAL_MS,
            max_concurrent: defaults::WORKER_MAX_CONCURRENT,
            enabled: true,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `REPORT_WORKER_ENABLED` | `true` | Enable/disable processing |
    /// | `WORKER_MAX_CONCURRENT` | `4` | Max concurrent reports |
    /// | `WORKER_POLL_INTERVAL_MS` | `1000` | Polling interval when idle |
    pub fn from_env() -> Self {
        let enabled = std::env::var("REPORT_WORKER_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);

        let max_concurrent = std::env::var("WORKER_MAX_CONCURRENT")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(defaults::WORKER_MAX_CONCURRENT)
            .max(1);

        let poll_interval_ms = std::env::var("WORKER_POLL_INTERVAL_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(defaults::WORKER_POLL_INTERVAL_MS);

        Self {
            poll_interval_ms,
            max_concurrent,
            enabled,
        }
    }

    /// Set the poll interval.
    pub fn with_poll_interval(mut self, ms: u64) -> Self {
        self.poll_interval_ms = ms;
        self
    }

    /// Set maximum concurrent reports.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Enable or disable processing.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// Event emitted by the report worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// A report was claimed and processing started.
    ReportStarted { report_id: Uuid },
    /// A report reached a terminal state (completed, failed, or cancelled).
    ReportSettled { report_id: Uuid },
    /// Orchestration hit an infrastructure fault; the lease stays until
    /// recovery clears it.
    ReportErrored { report_id: Uuid, error: String },
    /// Worker started.
    WorkerStarted,
    /// Worker stopped.
    WorkerStopped,
}

/// Handle for controlling a running worker.
pub struct WorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
    event_rx: broadcast::Receiver<WorkerEvent>,
}

impl WorkerHandle {
    /// Signal the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| finsight_core::Error::Internal("Failed to send shutdown signal".into()))?;
        Ok(())
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_rx.resubscribe()
    }
}

/// Worker that claims reports from the repository and orchestrates them.
pub struct ReportWorker {
    repo: Arc<dyn ReportRepository>,
    orchestrator: Arc<ReportOrchestrator>,
    config: WorkerConfig,
    event_tx: broadcast::Sender<WorkerEvent>,
}

impl ReportWorker {
    pub fn new(
        repo: Arc<dyn ReportRepository>,
        blobs: Arc<dyn BlobStore>,
        analyzer: Arc<dyn AnalyzerBackend>,
        analyzer_config: AnalyzerConfig,
        config: WorkerConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let orchestrator = Arc::new(ReportOrchestrator::new(
            repo.clone(),
            blobs,
            analyzer,
            analyzer_config,
        ));
        Self {
            repo,
            orchestrator,
            config,
            event_tx,
        }
    }

    /// Get a receiver for worker events.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.event_tx.subscribe()
    }

    /// Start the worker and return a handle for control.
    pub fn start(self) -> WorkerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let event_rx = self.event_tx.subscribe();

        let worker = Arc::new(self);
        tokio::spawn(async move {
            worker.run(&mut shutdown_rx).await;
        });

        WorkerHandle {
            shutdown_tx,
            event_rx,
        }
    }

    /// Run the worker loop with concurrent report processing.
    ///
    /// Claims up to `max_concurrent` reports at a time and processes them
    /// concurrently. Only sleeps when nothing is claimable.
    #[instrument(skip(self, shutdown_rx))]
    async fn run(&self, shutdown_rx: &mut mpsc::Receiver<()>) {
        if !self.config.enabled {
            info!("Report worker is disabled, not starting");
            return;
        }

        info!(
            poll_interval_ms = self.config.poll_interval_ms,
            max_concurrent = self.config.max_concurrent,
            "Report worker started"
        );
        let _ = self.event_tx.send(WorkerEvent::WorkerStarted);

        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            if shutdown_rx.try_recv().is_ok() {
                info!("Report worker received shutdown signal");
                break;
            }

            let mut claimed = 0;
            let mut tasks = tokio::task::JoinSet::new();

            for _ in 0..self.config.max_concurrent {
                match self.claim_report().await {
                    Some(report) => {
                        claimed += 1;
                        let orchestrator = self.orchestrator.clone();
                        let event_tx = self.event_tx.clone();
                        tasks.spawn(async move {
                            let report_id = report.id;
                            let _ = event_tx.send(WorkerEvent::ReportStarted { report_id });
                            match orchestrator.process(report).await {
                                Ok(()) => {
                                    let _ =
                                        event_tx.send(WorkerEvent::ReportSettled { report_id });
                                }
                                Err(e) => {
                                    error!(
                                        report_id = %report_id,
                                        error = %e,
                                        "Report orchestration hit an infrastructure fault"
                                    );
                                    let _ = event_tx.send(WorkerEvent::ReportErrored {
                                        report_id,
                                        error: e.to_string(),
                                    });
                                }
                            }
                        });
                    }
                    None => break,
                }
            }

            if claimed == 0 {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Report worker received shutdown signal");
                        break;
                    }
                    _ = sleep(poll_interval) => {}
                }
            } else {
                debug!(report_count = claimed, "Processing concurrent report batch");
                while let Some(result) = tasks.join_next().await {
                    if let Err(e) = result {
                        error!(error = ?e, "Report task panicked");
                    }
                }
                // No sleep, immediately try to claim more
            }
        }

        let _ = self.event_tx.send(WorkerEvent::WorkerStopped);
        info!("Report worker stopped");
    }

    async fn claim_report(&self) -> Option<Report> {
        match self.repo.claim_next().await {
            Ok(report) => report,
            Err(e) => {
                error!(error = ?e, "Failed to claim report");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = WorkerConfig::default();
        assert_eq!(config.poll_interval_ms, defaults::WORKER_POLL_INTERVAL_MS);
        assert_eq!(config.max_concurrent, defaults::WORKER_MAX_CONCURRENT);
        assert!(config.enabled);
    }

    #[test]
    fn builder_overrides() {
        let config = WorkerConfig::default()
            .with_poll_interval(50)
            .with_max_concurrent(2)
            .with_enabled(false);

        assert_eq!(config.poll_interval_ms, 50);
        assert_eq!(config.max_concurrent, 2);
        assert!(!config.enabled);
    }

    #[test]
    fn from_env_clamps_zero_concurrency() {
        // Serialized via env var uniqueness: this test owns the var name.
        std::env::set_var("WORKER_MAX_CONCURRENT", "0");
        let config = WorkerConfig::from_env();
        assert_eq!(config.max_concurrent, 1);
        std::env::remove_var("WORKER_MAX_CONCURRENT");
    }
}
