//! Transactional job persistence.
//!
//! [`PostgresJobStore`] is the production implementation: all mutating
//! operations are single transactions, claims use `FOR UPDATE SKIP
//! LOCKED` so concurrent workers never block each other, and every
//! worker-side transition is guarded by the owning `worker_id` so a
//! stale worker's ack is a no-op. Tenant scoping for the read paths is
//! enforced here, in SQL.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::common::Page;
use crate::kernel::tenant::Tenant;

use super::job::{DlqEntry, Job, JobStatus, StatusCounts};

/// Parameters for an idempotent insert.
#[derive(Debug, Clone)]
pub struct CreateJob {
    pub tenant_id: String,
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub max_retries: i32,
    pub trace_id: String,
}

/// Result of [`JobStore::create_job`].
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new PENDING row was inserted.
    Created(Job),
    /// `(tenant, idempotency_key)` already existed; the prior job is
    /// returned unchanged.
    IdempotencyHit(Job),
}

impl CreateOutcome {
    pub fn job(&self) -> &Job {
        match self {
            CreateOutcome::Created(job) | CreateOutcome::IdempotencyHit(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, CreateOutcome::Created(_))
    }
}

/// Result of [`JobStore::fail_and_retry`].
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Retries remained; the job is PENDING again and immediately claimable.
    Retried(Job),
    /// Retries exhausted (or the failure was permanent); the job is
    /// quarantined and a DLQ entry exists.
    DeadLettered(Job),
}

/// Race-free primitives over jobs, tenants, and the DLQ.
///
/// The worker runtime and the job service depend on this trait only;
/// tests swap in [`super::testing::InMemoryJobStore`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a PENDING job, or return the existing row for a repeated
    /// `(tenant, idempotency_key)`.
    async fn create_job(&self, req: CreateJob) -> Result<CreateOutcome>;

    /// Atomically claim the oldest PENDING job, skipping rows locked by
    /// concurrent claimants. Ties break on `created_at ASC, id ASC`.
    async fn claim_next_pending(&self, worker_id: &str, lease_ttl: Duration)
        -> Result<Option<Job>>;

    /// Extend the lease; false when the job is no longer RUNNING under
    /// this worker.
    async fn renew_lease(&self, job_id: Uuid, worker_id: &str, lease_ttl: Duration)
        -> Result<bool>;

    /// Owner-guarded terminal success; false when the guard rejected a
    /// stale worker.
    async fn complete_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<bool>;

    /// Owner-guarded failure: retry while the ladder allows, otherwise
    /// quarantine. `None` when the guard rejected a stale worker.
    async fn fail_and_retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        permanent: bool,
    ) -> Result<Option<FailOutcome>>;

    /// Return RUNNING jobs whose lease expired before `now` to PENDING.
    /// `retry_count` is untouched: a crashed worker is not the job's fault.
    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>>;

    async fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Job>>;

    async fn list_dlq(&self, tenant_id: &str, limit: i64, offset: i64) -> Result<Page<DlqEntry>>;

    /// On-demand per-status counts for one tenant.
    async fn summarize(&self, tenant_id: &str) -> Result<StatusCounts>;

    /// `COUNT(*) WHERE status = 'running' GROUP BY tenant_id`, used to
    /// rebuild the admission gate at startup.
    async fn running_counts(&self) -> Result<HashMap<String, i64>>;

    async fn find_tenant_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>>;

    async fn ping(&self) -> Result<()>;
}

/// PostgreSQL-backed [`JobStore`].
#[derive(Clone)]
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn bump_completed(tx: &mut Transaction<'_, Postgres>, tenant_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics_daily (tenant_id, day, completed)
            VALUES ($1, CURRENT_DATE, 1)
            ON CONFLICT (tenant_id, day)
            DO UPDATE SET completed = metrics_daily.completed + 1
            "#,
        )
        .bind(tenant_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn bump_dead_lettered(tx: &mut Transaction<'_, Postgres>, tenant_id: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO metrics_daily (tenant_id, day, dead_lettered)
            VALUES ($1, CURRENT_DATE, 1)
            ON CONFLICT (tenant_id, day)
            DO UPDATE SET dead_lettered = metrics_daily.dead_lettered + 1
            "#,
        )
        .bind(tenant_id)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

fn lease_expiry(from: DateTime<Utc>, lease_ttl: Duration) -> Result<DateTime<Utc>> {
    let ttl = chrono::Duration::from_std(lease_ttl).context("lease ttl out of range")?;
    Ok(from + ttl)
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create_job(&self, req: CreateJob) -> Result<CreateOutcome> {
        let inserted = sqlx::query_as::<_, Job>(
            r#"
            INSERT INTO jobs (id, tenant_id, status, payload, idempotency_key, trace_id, max_retries)
            VALUES ($1, $2, 'pending', $3, $4, $5, $6)
            ON CONFLICT (tenant_id, idempotency_key) WHERE idempotency_key IS NOT NULL
            DO NOTHING
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&req.tenant_id)
        .bind(&req.payload)
        .bind(&req.idempotency_key)
        .bind(&req.trace_id)
        .bind(req.max_retries)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(job) = inserted {
            return Ok(CreateOutcome::Created(job));
        }

        // The unique index swallowed the insert; hand back the prior row.
        let existing = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE tenant_id = $1 AND idempotency_key = $2",
        )
        .bind(&req.tenant_id)
        .bind(&req.idempotency_key)
        .fetch_optional(&self.pool)
        .await?
        .context("idempotency conflict with no existing row")?;

        Ok(CreateOutcome::IdempotencyHit(existing))
    }

    async fn claim_next_pending(
        &self,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Option<Job>> {
        let expires = lease_expiry(Utc::now(), lease_ttl)?;

        let job = sqlx::query_as::<_, Job>(
            r#"
            WITH next AS (
                SELECT id
                FROM jobs
                WHERE status = 'pending'
                ORDER BY created_at ASC, id ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE jobs
            SET status = 'running',
                worker_id = $1,
                started_at = NOW(),
                lease_expires_at = $2
            WHERE id IN (SELECT id FROM next)
            RETURNING *
            "#,
        )
        .bind(worker_id)
        .bind(expires)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<bool> {
        let expires = lease_expiry(Utc::now(), lease_ttl)?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET lease_expires_at = $1
            WHERE id = $2 AND worker_id = $3 AND status = 'running'
            "#,
        )
        .bind(expires)
        .bind(job_id)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'completed',
                result = $1,
                completed_at = NOW(),
                worker_id = NULL,
                lease_expires_at = NULL
            WHERE id = $2 AND worker_id = $3 AND status = 'running'
            RETURNING tenant_id
            "#,
        )
        .bind(&result)
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(false);
        };

        let tenant_id: String = row.get("tenant_id");
        Self::bump_completed(&mut tx, &tenant_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn fail_and_retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        permanent: bool,
    ) -> Result<Option<FailOutcome>> {
        let mut tx = self.pool.begin().await?;

        let job = sqlx::query_as::<_, Job>(
            "SELECT * FROM jobs WHERE id = $1 AND worker_id = $2 AND status = 'running' FOR UPDATE",
        )
        .bind(job_id)
        .bind(worker_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(job) = job else {
            tx.rollback().await?;
            return Ok(None);
        };

        if !permanent && job.retry_count < job.max_retries {
            let updated = sqlx::query_as::<_, Job>(
                r#"
                UPDATE jobs
                SET status = 'pending',
                    retry_count = retry_count + 1,
                    error_message = $1,
                    worker_id = NULL,
                    lease_expires_at = NULL,
                    started_at = NULL
                WHERE id = $2
                RETURNING *
                "#,
            )
            .bind(error)
            .bind(job_id)
            .fetch_one(&mut *tx)
            .await?;

            tx.commit().await?;
            return Ok(Some(FailOutcome::Retried(updated)));
        }

        // Quarantined rows always record a consumed ladder, including
        // permanent failures that never walked it
        let updated = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'dlq',
                retry_count = max_retries,
                error_message = $1,
                completed_at = NOW(),
                worker_id = NULL,
                lease_expires_at = NULL
            WHERE id = $2
            RETURNING *
            "#,
        )
        .bind(error)
        .bind(job_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO dlq (id, job_id, tenant_id, payload, error_message, job_created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(updated.id)
        .bind(&updated.tenant_id)
        .bind(&updated.payload)
        .bind(error)
        .bind(updated.created_at)
        .execute(&mut *tx)
        .await?;

        Self::bump_dead_lettered(&mut tx, &updated.tenant_id).await?;
        tx.commit().await?;
        Ok(Some(FailOutcome::DeadLettered(updated)))
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let reclaimed = sqlx::query_as::<_, Job>(
            r#"
            UPDATE jobs
            SET status = 'pending',
                worker_id = NULL,
                lease_expires_at = NULL,
                started_at = NULL
            WHERE status = 'running' AND lease_expires_at < $1
            RETURNING *
            "#,
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        Ok(reclaimed)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        let job = sqlx::query_as::<_, Job>("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Job>> {
        let (items, total) = match status {
            Some(status) => {
                let items = sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE tenant_id = $1 AND status = $2
                    ORDER BY created_at DESC, id DESC
                    LIMIT $3 OFFSET $4
                    "#,
                )
                .bind(tenant_id)
                .bind(status)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 = sqlx::query_scalar(
                    "SELECT COUNT(*) FROM jobs WHERE tenant_id = $1 AND status = $2",
                )
                .bind(tenant_id)
                .bind(status)
                .fetch_one(&self.pool)
                .await?;

                (items, total)
            }
            None => {
                let items = sqlx::query_as::<_, Job>(
                    r#"
                    SELECT * FROM jobs
                    WHERE tenant_id = $1
                    ORDER BY created_at DESC, id DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(tenant_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool)
                .await?;

                let total: i64 =
                    sqlx::query_scalar("SELECT COUNT(*) FROM jobs WHERE tenant_id = $1")
                        .bind(tenant_id)
                        .fetch_one(&self.pool)
                        .await?;

                (items, total)
            }
        };

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn list_dlq(&self, tenant_id: &str, limit: i64, offset: i64) -> Result<Page<DlqEntry>> {
        let items = sqlx::query_as::<_, DlqEntry>(
            r#"
            SELECT * FROM dlq
            WHERE tenant_id = $1
            ORDER BY dead_lettered_at DESC, id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(tenant_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dlq WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn summarize(&self, tenant_id: &str) -> Result<StatusCounts> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE status = 'running') AS running,
                COUNT(*) FILTER (WHERE status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE status = 'failed') AS failed,
                COUNT(*) FILTER (WHERE status = 'dlq') AS dlq
            FROM jobs
            WHERE tenant_id = $1
            "#,
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(StatusCounts {
            total: row.get("total"),
            pending: row.get("pending"),
            running: row.get("running"),
            completed: row.get("completed"),
            failed: row.get("failed"),
            dlq: row.get("dlq"),
        })
    }

    async fn running_counts(&self) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT tenant_id, COUNT(*) AS running
            FROM jobs
            WHERE status = 'running'
            GROUP BY tenant_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("tenant_id"), row.get("running")))
            .collect())
    }

    async fn find_tenant_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>("SELECT * FROM users WHERE api_key = $1")
            .bind(api_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tenant)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
