//! # finsight-api
//!
//! HTTP gateway for the finsight report pipeline.
//!
//! Exposes report intake, status polling, artifact download, recovery, and
//! cancellation. Processing itself happens in the background worker: a
//! submitted report outlives the request that created it, and the client
//! follows progress through the status endpoint.

pub mod app;
pub mod handlers;

pub use app::{router, AppState};
