//! HTTP implementation of the poller's gateway surface.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use finsight_core::{Error, RecoveryOutcome, ReportStatusView, Result};

use crate::poller::StatusApi;

/// Talks to the gateway's status and recovery endpoints.
pub struct HttpStatusApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpStatusApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(format!("failed to build status client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
struct RecoverBody {
    outcome: RecoveryOutcome,
}

/// Turn a non-success response into the matching pipeline error.
async fn check(report_id: Uuid, resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(Error::ReportNotFound(report_id));
    }
    if !status.is_success() {
        let msg = resp
            .json::<ErrorBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| status.to_string());
        if status.is_server_error() {
            return Err(Error::Request(msg));
        }
        return Err(Error::InvalidState(msg));
    }
    Ok(resp)
}

#[async_trait]
impl StatusApi for HttpStatusApi {
    async fn status(&self, report_id: Uuid) -> Result<ReportStatusView> {
        let url = format!("{}/api/v1/reports/{}/status", self.base_url, report_id);
        let resp = self.client.get(&url).send().await?;
        let view = check(report_id, resp).await?.json().await?;
        Ok(view)
    }

    async fn recover(&self, report_id: Uuid) -> Result<RecoveryOutcome> {
        let url = format!("{}/api/v1/reports/{}/recover", self.base_url, report_id);
        let resp = self.client.post(&url).send().await?;
        let body: RecoverBody = check(report_id, resp).await?.json().await?;
        Ok(body.outcome)
    }
}
