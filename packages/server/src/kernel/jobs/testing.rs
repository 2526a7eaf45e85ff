//! Test doubles for the job subsystem.
//!
//! [`InMemoryJobStore`] implements the full [`JobStore`] contract over a
//! mutex-guarded map so worker, pool, and service behavior can be tested
//! without a database. The handlers here fail on demand to drive the
//! retry ladder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::common::Page;
use crate::kernel::tenant::Tenant;

use super::handler::{HandlerContext, HandlerError, JobHandler};
use super::job::{DlqEntry, Job, JobStatus, StatusCounts};
use super::store::{CreateJob, CreateOutcome, FailOutcome, JobStore};

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    dlq: Vec<DlqEntry>,
    tenants: HashMap<String, Tenant>,
}

/// Mutex-guarded [`JobStore`] with the same transition semantics as the
/// Postgres implementation.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: Mutex<Inner>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provision a tenant row, as the out-of-band path would.
    pub fn insert_tenant(
        &self,
        tenant_id: &str,
        api_key: &str,
        max_concurrent_jobs: Option<i32>,
        rate_limit_per_minute: Option<i32>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        inner.tenants.insert(
            tenant_id.to_string(),
            Tenant {
                tenant_id: tenant_id.to_string(),
                api_key: api_key.to_string(),
                max_concurrent_jobs,
                rate_limit_per_minute,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        );
    }

    /// Snapshot a job row for assertions.
    pub fn job(&self, id: Uuid) -> Option<Job> {
        self.inner.lock().unwrap().jobs.get(&id).cloned()
    }

    pub fn dlq_len(&self) -> usize {
        self.inner.lock().unwrap().dlq.len()
    }

    /// Force a lease expiry so reclaim paths can be exercised without
    /// waiting out a real TTL.
    pub fn expire_lease(&self, id: Uuid) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(job) = inner.jobs.get_mut(&id) {
            job.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }

    fn next_pending_id(inner: &Inner) -> Option<Uuid> {
        inner
            .jobs
            .values()
            .filter(|job| job.status == JobStatus::Pending)
            .min_by(|a, b| {
                a.created_at
                    .cmp(&b.created_at)
                    .then_with(|| a.id.cmp(&b.id))
            })
            .map(|job| job.id)
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, req: CreateJob) -> Result<CreateOutcome> {
        let mut inner = self.inner.lock().unwrap();

        if let Some(key) = &req.idempotency_key {
            let existing = inner
                .jobs
                .values()
                .find(|job| {
                    job.tenant_id == req.tenant_id && job.idempotency_key.as_ref() == Some(key)
                })
                .cloned();
            if let Some(job) = existing {
                return Ok(CreateOutcome::IdempotencyHit(job));
            }
        }

        let job = Job::builder()
            .tenant_id(req.tenant_id)
            .payload(req.payload)
            .trace_id(req.trace_id)
            .max_retries(req.max_retries)
            .build();
        let job = Job {
            idempotency_key: req.idempotency_key,
            ..job
        };
        inner.jobs.insert(job.id, job.clone());
        Ok(CreateOutcome::Created(job))
    }

    async fn claim_next_pending(
        &self,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<Option<Job>> {
        let mut inner = self.inner.lock().unwrap();

        let Some(id) = Self::next_pending_id(&inner) else {
            return Ok(None);
        };

        let ttl = chrono::Duration::from_std(lease_ttl).context("lease ttl out of range")?;
        let job = inner.jobs.get_mut(&id).expect("job just selected");
        job.status = JobStatus::Running;
        job.worker_id = Some(worker_id.to_string());
        job.started_at = Some(Utc::now());
        job.lease_expires_at = Some(Utc::now() + ttl);
        Ok(Some(job.clone()))
    }

    async fn renew_lease(
        &self,
        job_id: Uuid,
        worker_id: &str,
        lease_ttl: Duration,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let ttl = chrono::Duration::from_std(lease_ttl).context("lease ttl out of range")?;

        match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id) =>
            {
                job.lease_expires_at = Some(Utc::now() + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn complete_job(
        &self,
        job_id: Uuid,
        worker_id: &str,
        result: serde_json::Value,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();

        match inner.jobs.get_mut(&job_id) {
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id) =>
            {
                job.status = JobStatus::Completed;
                job.result = Some(result);
                job.completed_at = Some(Utc::now());
                job.worker_id = None;
                job.lease_expires_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn fail_and_retry(
        &self,
        job_id: Uuid,
        worker_id: &str,
        error: &str,
        permanent: bool,
    ) -> Result<Option<FailOutcome>> {
        let mut inner = self.inner.lock().unwrap();

        let owned = matches!(
            inner.jobs.get(&job_id),
            Some(job)
                if job.status == JobStatus::Running
                    && job.worker_id.as_deref() == Some(worker_id)
        );
        if !owned {
            return Ok(None);
        }

        let job = inner.jobs.get_mut(&job_id).expect("ownership checked");
        if !permanent && job.retry_count < job.max_retries {
            job.status = JobStatus::Pending;
            job.retry_count += 1;
            job.error_message = Some(error.to_string());
            job.worker_id = None;
            job.lease_expires_at = None;
            job.started_at = None;
            return Ok(Some(FailOutcome::Retried(job.clone())));
        }

        job.status = JobStatus::Dlq;
        // Quarantined rows always record a consumed ladder, including
        // permanent failures that never walked it
        job.retry_count = job.max_retries;
        job.error_message = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        job.worker_id = None;
        job.lease_expires_at = None;
        let snapshot = job.clone();

        inner.dlq.push(DlqEntry {
            id: Uuid::new_v4(),
            job_id: snapshot.id,
            tenant_id: snapshot.tenant_id.clone(),
            payload: snapshot.payload.clone(),
            error_message: error.to_string(),
            job_created_at: snapshot.created_at,
            dead_lettered_at: Utc::now(),
        });

        Ok(Some(FailOutcome::DeadLettered(snapshot)))
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<Job>> {
        let mut inner = self.inner.lock().unwrap();
        let mut reclaimed = Vec::new();

        for job in inner.jobs.values_mut() {
            let expired = job.status == JobStatus::Running
                && job.lease_expires_at.is_some_and(|at| at < now);
            if expired {
                job.status = JobStatus::Pending;
                job.worker_id = None;
                job.lease_expires_at = None;
                job.started_at = None;
                reclaimed.push(job.clone());
            }
        }

        Ok(reclaimed)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>> {
        Ok(self.inner.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn list_jobs(
        &self,
        tenant_id: &str,
        status: Option<JobStatus>,
        limit: i64,
        offset: i64,
    ) -> Result<Page<Job>> {
        let inner = self.inner.lock().unwrap();

        let mut matching: Vec<Job> = inner
            .jobs
            .values()
            .filter(|job| job.tenant_id == tenant_id)
            .filter(|job| status.is_none_or(|s| job.status == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn list_dlq(&self, tenant_id: &str, limit: i64, offset: i64) -> Result<Page<DlqEntry>> {
        let inner = self.inner.lock().unwrap();

        let mut matching: Vec<DlqEntry> = inner
            .dlq
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.dead_lettered_at.cmp(&a.dead_lettered_at));

        let total = matching.len() as i64;
        let items = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();

        Ok(Page {
            items,
            total,
            limit,
            offset,
        })
    }

    async fn summarize(&self, tenant_id: &str) -> Result<StatusCounts> {
        let inner = self.inner.lock().unwrap();
        let mut counts = StatusCounts::default();

        for job in inner.jobs.values().filter(|j| j.tenant_id == tenant_id) {
            counts.total += 1;
            match job.status {
                JobStatus::Pending => counts.pending += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Completed => counts.completed += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Dlq => counts.dlq += 1,
            }
        }

        Ok(counts)
    }

    async fn running_counts(&self) -> Result<HashMap<String, i64>> {
        let inner = self.inner.lock().unwrap();
        let mut counts = HashMap::new();

        for job in inner.jobs.values() {
            if job.status == JobStatus::Running {
                *counts.entry(job.tenant_id.clone()).or_insert(0) += 1;
            }
        }

        Ok(counts)
    }

    async fn find_tenant_by_api_key(&self, api_key: &str) -> Result<Option<Tenant>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .tenants
            .values()
            .find(|tenant| tenant.api_key == api_key)
            .cloned())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

/// Handler that fails the first `n` attempts, then succeeds.
pub struct FlakyHandler {
    failures_remaining: AtomicI32,
}

impl FlakyHandler {
    pub fn failing(n: i32) -> Self {
        Self {
            failures_remaining: AtomicI32::new(n),
        }
    }
}

#[async_trait]
impl JobHandler for FlakyHandler {
    async fn run(
        &self,
        _job: &Job,
        _ctx: HandlerContext,
    ) -> Result<serde_json::Value, HandlerError> {
        if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
            Err(HandlerError::Retryable("transient failure".to_string()))
        } else {
            Ok(serde_json::json!({ "ok": true }))
        }
    }
}

/// Handler that always fails, retryably or permanently.
pub struct AlwaysFailHandler {
    permanent: bool,
}

impl AlwaysFailHandler {
    pub fn retryable() -> Self {
        Self { permanent: false }
    }

    pub fn permanent() -> Self {
        Self { permanent: true }
    }
}

#[async_trait]
impl JobHandler for AlwaysFailHandler {
    async fn run(
        &self,
        _job: &Job,
        _ctx: HandlerContext,
    ) -> Result<serde_json::Value, HandlerError> {
        if self.permanent {
            Err(HandlerError::Permanent("unprocessable payload".to_string()))
        } else {
            Err(HandlerError::Retryable("transient failure".to_string()))
        }
    }
}
