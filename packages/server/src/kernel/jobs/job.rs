//! Job and dead-letter models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

/// Job lifecycle states.
///
/// `Failed` is representable for schema compatibility but the retry
/// ladder always lands on `Pending` (retry) or `Dlq`; the core never
/// writes it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type, Default,
)]
#[sqlx(type_name = "job_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Dlq,
}

impl JobStatus {
    /// Terminal states release admission slots and set `completed_at`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Dlq)
    }
}

/// A unit of work owned by a tenant.
///
/// State invariants (enforced by the store's guarded transitions):
/// - `Pending` ⟺ `worker_id`, `lease_expires_at`, `completed_at` all unset
/// - `Running` ⟹ `worker_id`, `lease_expires_at`, `started_at` all set
/// - terminal ⟹ `completed_at` set, lease fields cleared
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct Job {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub tenant_id: String,

    #[builder(default)]
    pub status: JobStatus,

    /// Opaque to the core; only the handler interprets it.
    pub payload: serde_json::Value,
    #[builder(default, setter(strip_option))]
    pub result: Option<serde_json::Value>,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    #[builder(default, setter(strip_option))]
    pub idempotency_key: Option<String>,
    pub trace_id: String,

    #[builder(default = 0)]
    pub retry_count: i32,
    #[builder(default = 3)]
    pub max_retries: i32,

    // Lease management
    #[builder(default, setter(strip_option))]
    pub worker_id: Option<String>,
    #[builder(default, setter(strip_option))]
    pub lease_expires_at: Option<DateTime<Utc>>,

    // Timestamps
    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Immutable copy-forward of a job that exhausted its retries.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: Uuid,
    pub job_id: Uuid,
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub error_message: String,
    pub job_created_at: DateTime<Utc>,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Per-status counts for the metrics endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub total: i64,
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub dlq: i64,
}
