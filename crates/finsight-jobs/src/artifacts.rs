//! Artifact generation for completed analyses.
//!
//! A completed report carries exactly two artifacts: the structured
//! analysis payload and a rendered HTML report. Generation is
//! all-or-nothing: a missing rendered report or a failed write fails the
//! whole report, and nothing partial is left behind.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use finsight_core::{generate_blob_handle, AnalysisOutcome, Artifact, BlobStore, Error, Result};

/// Logical name of the structured analysis artifact.
pub const ANALYSIS_ARTIFACT: &str = "analysis.json";

/// Logical name of the rendered report artifact.
pub const REPORT_ARTIFACT: &str = "report.html";

/// Writes the artifact pair for a finished analysis.
pub struct ArtifactGenerator {
    blobs: Arc<dyn BlobStore>,
}

impl ArtifactGenerator {
    pub fn new(blobs: Arc<dyn BlobStore>) -> Self {
        Self { blobs }
    }

    /// Persist both artifacts for `report_id` and return their records.
    ///
    /// On any failure the blobs written so far are removed before the
    /// error propagates.
    pub async fn generate(
        &self,
        report_id: Uuid,
        outcome: &AnalysisOutcome,
    ) -> Result<Vec<Artifact>> {
        let analysis_bytes = serde_json::to_vec_pretty(&outcome.analysis)?;
        let html = outcome.rendered_report.as_ref().ok_or_else(|| {
            Error::MissingAnalysis("analyzer returned no rendered report".to_string())
        })?;
        let html_bytes = html.as_bytes();

        let analysis_handle = generate_blob_handle(&report_id, ANALYSIS_ARTIFACT);
        let report_handle = generate_blob_handle(&report_id, REPORT_ARTIFACT);

        self.blobs.put(&analysis_handle, &analysis_bytes).await?;

        if let Err(e) = self.blobs.put(&report_handle, html_bytes).await {
            if let Err(cleanup) = self.blobs.delete(&analysis_handle).await {
                warn!(
                    subsystem = "jobs",
                    component = "artifacts",
                    report_id = %report_id,
                    error = %cleanup,
                    "Failed to remove partial artifact after write failure"
                );
            }
            return Err(e);
        }

        Ok(vec![
            Artifact {
                name: ANALYSIS_ARTIFACT.to_string(),
                handle: analysis_handle,
                size_bytes: analysis_bytes.len() as i64,
            },
            Artifact {
                name: REPORT_ARTIFACT.to_string(),
                handle: report_handle,
                size_bytes: html_bytes.len() as i64,
            },
        ])
    }

    /// Remove the artifact blobs named in `artifacts`. Missing blobs are
    /// ignored; used on cancel and cleanup paths.
    pub async fn remove(&self, artifacts: &[Artifact]) {
        for artifact in artifacts {
            if let Err(e) = self.blobs.delete(&artifact.handle).await {
                warn!(
                    subsystem = "jobs",
                    component = "artifacts",
                    blob_handle = %artifact.handle,
                    error = %e,
                    "Failed to delete artifact blob"
                );
            }
        }
    }
}
