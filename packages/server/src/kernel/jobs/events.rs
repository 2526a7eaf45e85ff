//! Job lifecycle events.
//!
//! Facts about the job lifecycle, not commands. Every event carries the
//! job's trace id so observers and log lines correlate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::Job;

/// Wire-level event discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEventKind {
    JobSubmitted,
    JobStarted,
    JobCompleted,
    JobFailed,
    JobRetry,
    JobDlq,
}

impl JobEventKind {
    /// The SSE event name, identical to the serialized tag.
    pub fn wire_name(&self) -> &'static str {
        match self {
            JobEventKind::JobSubmitted => "JOB_SUBMITTED",
            JobEventKind::JobStarted => "JOB_STARTED",
            JobEventKind::JobCompleted => "JOB_COMPLETED",
            JobEventKind::JobFailed => "JOB_FAILED",
            JobEventKind::JobRetry => "JOB_RETRY",
            JobEventKind::JobDlq => "JOB_DLQ",
        }
    }
}

/// A lifecycle transition, as published on the bus and streamed to
/// observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    #[serde(rename = "type")]
    pub kind: JobEventKind,
    pub job_id: Uuid,
    pub tenant_id: String,
    pub trace_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl JobEvent {
    fn from_job(kind: JobEventKind, job: &Job, payload: Option<serde_json::Value>) -> Self {
        Self {
            kind,
            job_id: job.id,
            tenant_id: job.tenant_id.clone(),
            trace_id: job.trace_id.clone(),
            timestamp: Utc::now(),
            payload,
        }
    }

    pub fn submitted(job: &Job) -> Self {
        Self::from_job(JobEventKind::JobSubmitted, job, None)
    }

    pub fn started(job: &Job, worker_id: &str) -> Self {
        Self::from_job(
            JobEventKind::JobStarted,
            job,
            Some(serde_json::json!({ "worker_id": worker_id })),
        )
    }

    pub fn completed(job: &Job) -> Self {
        Self::from_job(JobEventKind::JobCompleted, job, None)
    }

    pub fn retry(job: &Job) -> Self {
        Self::from_job(
            JobEventKind::JobRetry,
            job,
            Some(serde_json::json!({ "retry_count": job.retry_count })),
        )
    }

    pub fn dead_lettered(job: &Job) -> Self {
        Self::from_job(
            JobEventKind::JobDlq,
            job,
            job.error_message
                .as_ref()
                .map(|e| serde_json::json!({ "error": e })),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::Job;

    fn sample_job() -> Job {
        Job::builder()
            .tenant_id("acme")
            .payload(serde_json::json!({"x": 1}))
            .trace_id("trace-abc")
            .build()
    }

    #[test]
    fn submitted_serializes_with_wire_tag() {
        let event = JobEvent::submitted(&sample_job());
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"JOB_SUBMITTED\""));
        assert!(json.contains("trace-abc"));
        // No payload key when there is nothing to attach
        assert!(!json.contains("\"payload\""));
    }

    #[test]
    fn started_carries_worker_id() {
        let event = JobEvent::started(&sample_job(), "worker-1-0");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("JOB_STARTED"));
        assert!(json.contains("worker-1-0"));
    }

    #[test]
    fn retry_carries_retry_count() {
        let mut job = sample_job();
        job.retry_count = 2;
        let event = JobEvent::retry(&job);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("JOB_RETRY"));
        assert!(json.contains("\"retry_count\":2"));
    }

    #[test]
    fn dlq_carries_final_error() {
        let mut job = sample_job();
        job.error_message = Some("boom".to_string());
        let event = JobEvent::dead_lettered(&job);
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("JOB_DLQ"));
        assert!(json.contains("boom"));
    }

    #[test]
    fn events_roundtrip() {
        let job = sample_job();
        for event in [
            JobEvent::submitted(&job),
            JobEvent::started(&job, "worker-1-0"),
            JobEvent::completed(&job),
            JobEvent::retry(&job),
            JobEvent::dead_lettered(&job),
        ] {
            let json = serde_json::to_string(&event).unwrap();
            let back: JobEvent = serde_json::from_str(&json).unwrap();
            assert_eq!(back.kind, event.kind);
            assert_eq!(back.job_id, event.job_id);
        }
    }

    #[test]
    fn wire_names_match_serde_tags() {
        for kind in [
            JobEventKind::JobSubmitted,
            JobEventKind::JobStarted,
            JobEventKind::JobCompleted,
            JobEventKind::JobFailed,
            JobEventKind::JobRetry,
            JobEventKind::JobDlq,
        ] {
            let tag = serde_json::to_string(&kind).unwrap();
            assert_eq!(tag, format!("\"{}\"", kind.wire_name()));
        }
    }
}
