//! # finsight-client
//!
//! Status polling for submitted reports.
//!
//! The poller follows a report through the gateway's status endpoint,
//! adapting its interval to what the pipeline is doing, and asks the
//! gateway to recover a report that stops making progress. Polling is an
//! observer: losing the poller never loses the report.

pub mod http;
pub mod poller;

pub use http::HttpStatusApi;
pub use poller::{user_facing_message, PollOutcome, PollerConfig, ReportPoller, StatusApi};
