//! Probe module for website monitoring.

mod http;

pub use http::*;

use crate::domain::{ProbeResult, Target};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
///
/// A deadline overrun is not an error: it is reported as an unreachable
/// [`ProbeResult`].
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("can't build HTTP client: {0}")]
    Client(String),
    #[error("request failed: {0}")]
    Request(String),
    #[error("can't read response body: {0}")]
    Body(String),
}

/// Performs one check against a target, bounded by `deadline`.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, target: &Target, deadline: Duration) -> Result<ProbeResult, ProbeError>;
}
