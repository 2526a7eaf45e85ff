//! The pluggable handler contract.
//!
//! The core never inspects a job's payload; it hands the job to a
//! [`JobHandler`] and classifies the outcome. Real deployments supply
//! their own handler — the built-in [`SleepHandler`] is the test stub
//! the server ships with.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use super::job::Job;

/// Why a handler failed, and whether the retry ladder applies.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Transient failure; the job returns to the queue while retries remain.
    #[error("{0}")]
    Retryable(String),
    /// Permanent failure; bypasses the retry ladder straight to the DLQ.
    #[error("{0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, HandlerError::Permanent(_))
    }
}

/// Execution context handed to the handler for one attempt.
///
/// The token fires when the lease is lost or the process is shutting
/// down; a handler must stop holding resources once it observes either.
/// Any result produced after cancellation is discarded by the owner
/// guard on the ack path.
#[derive(Clone)]
pub struct HandlerContext {
    pub cancel: CancellationToken,
    /// The lease expiry for this attempt. Handlers doing their own I/O
    /// can bound it with this deadline.
    pub deadline: DateTime<Utc>,
}

impl HandlerContext {
    pub fn new(cancel: CancellationToken, deadline: DateTime<Utc>) -> Self {
        Self { cancel, deadline }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Business logic executed for each claimed job.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &Job, ctx: HandlerContext) -> Result<serde_json::Value, HandlerError>;
}

/// Built-in stub handler: sleeps, then reports how long it slept.
///
/// Honors cancellation mid-sleep so lease loss and shutdown are not
/// blocked on the full duration.
pub struct SleepHandler {
    duration: Duration,
}

impl SleepHandler {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl Default for SleepHandler {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}

#[async_trait]
impl JobHandler for SleepHandler {
    async fn run(&self, _job: &Job, ctx: HandlerContext) -> Result<serde_json::Value, HandlerError> {
        tokio::select! {
            _ = ctx.cancel.cancelled() => {
                Err(HandlerError::Retryable("cancelled before completion".to_string()))
            }
            _ = tokio::time::sleep(self.duration) => {
                Ok(serde_json::json!({ "slept_ms": self.duration.as_millis() as u64 }))
            }
        }
    }
}
