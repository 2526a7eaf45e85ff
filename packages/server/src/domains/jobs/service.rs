//! Submission and query service.
//!
//! The submit pipeline: admission gates, idempotent persistence, event
//! publication. Authentication happens at the HTTP boundary; this layer
//! receives an already-resolved [`Tenant`].

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::common::{ApiError, Page, PageParams};
use crate::kernel::admission::Admission;
use crate::kernel::event_bus::EventBus;
use crate::kernel::jobs::{
    CreateJob, CreateOutcome, DlqEntry, Job, JobEvent, JobStatus, JobStore, StatusCounts,
};
use crate::kernel::tenant::Tenant;

/// Server-wide defaults applied when a submission or a tenant row leaves
/// a knob unset.
#[derive(Debug, Clone, Copy)]
pub struct JobServiceConfig {
    pub default_max_retries: i32,
    pub default_rate_limit_per_minute: i32,
    pub default_max_concurrent_jobs: i32,
}

impl JobServiceConfig {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            default_max_retries: config.worker_max_retries,
            default_rate_limit_per_minute: config.default_rate_limit_per_minute,
            default_max_concurrent_jobs: config.default_max_concurrent_jobs,
        }
    }
}

/// A submission request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub payload: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub max_retries: Option<i32>,
}

/// What `submit` did with the request.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A new job was enqueued and `JOB_SUBMITTED` published.
    Created(Job),
    /// The idempotency key matched a prior job; nothing was enqueued,
    /// no event was published, and the admission gates were refunded.
    Existing(Job),
}

impl SubmitOutcome {
    pub fn job(&self) -> &Job {
        match self {
            SubmitOutcome::Created(job) | SubmitOutcome::Existing(job) => job,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, SubmitOutcome::Created(_))
    }
}

pub struct JobService {
    store: Arc<dyn JobStore>,
    admission: Arc<Admission>,
    bus: EventBus,
    config: JobServiceConfig,
}

impl JobService {
    pub fn new(
        store: Arc<dyn JobStore>,
        admission: Arc<Admission>,
        bus: EventBus,
        config: JobServiceConfig,
    ) -> Self {
        Self {
            store,
            admission,
            bus,
            config,
        }
    }

    /// Enqueue a job for a tenant.
    ///
    /// Gate order is rate limit, then concurrency, then persistence. An
    /// idempotency hit is not a new unit of work: the prior job comes
    /// back with no event and both gates refunded.
    pub async fn submit(
        &self,
        tenant: &Tenant,
        request: SubmitRequest,
    ) -> Result<SubmitOutcome, ApiError> {
        if request.payload.is_null() {
            return Err(ApiError::Validation("payload is required".to_string()));
        }
        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);
        if max_retries < 0 {
            return Err(ApiError::Validation(
                "max_retries must be non-negative".to_string(),
            ));
        }
        if let Some(key) = &request.idempotency_key {
            if key.is_empty() {
                return Err(ApiError::Validation(
                    "idempotency_key must not be empty".to_string(),
                ));
            }
        }

        let rate_limit = tenant.effective_rate_limit(self.config.default_rate_limit_per_minute);
        if !self
            .admission
            .try_acquire_rate(&tenant.tenant_id, rate_limit)
            .await
        {
            debug!(tenant_id = %tenant.tenant_id, "submission rate limited");
            return Err(ApiError::RateLimited);
        }

        let max_concurrent =
            tenant.effective_max_concurrent(self.config.default_max_concurrent_jobs);
        if !self
            .admission
            .try_reserve(&tenant.tenant_id, max_concurrent)
            .await
        {
            debug!(tenant_id = %tenant.tenant_id, "tenant concurrency cap reached");
            return Err(ApiError::ConcurrencyExceeded);
        }

        let trace_id = format!("trace-{}", Uuid::new_v4().simple());
        let created = self
            .store
            .create_job(CreateJob {
                tenant_id: tenant.tenant_id.clone(),
                payload: request.payload,
                idempotency_key: request.idempotency_key,
                max_retries,
                trace_id,
            })
            .await;

        match created {
            Ok(CreateOutcome::Created(job)) => {
                info!(
                    job_id = %job.id,
                    tenant_id = %tenant.tenant_id,
                    trace_id = %job.trace_id,
                    "job submitted"
                );
                self.bus.publish(JobEvent::submitted(&job));
                Ok(SubmitOutcome::Created(job))
            }
            Ok(CreateOutcome::IdempotencyHit(job)) => {
                debug!(
                    job_id = %job.id,
                    tenant_id = %tenant.tenant_id,
                    "idempotency hit; returning prior job"
                );
                self.admission.release(&tenant.tenant_id).await;
                self.admission.refund_rate(&tenant.tenant_id).await;
                Ok(SubmitOutcome::Existing(job))
            }
            Err(e) => {
                self.admission.release(&tenant.tenant_id).await;
                self.admission.refund_rate(&tenant.tenant_id).await;
                Err(ApiError::Internal(e))
            }
        }
    }

    /// Fetch one job. A foreign tenant's job is `Forbidden`, a missing
    /// id is `NotFound`.
    pub async fn get(&self, tenant: &Tenant, job_id: Uuid) -> Result<Job, ApiError> {
        let job = self
            .store
            .get_job(job_id)
            .await
            .map_err(ApiError::Internal)?
            .ok_or(ApiError::NotFound)?;

        if job.tenant_id != tenant.tenant_id {
            return Err(ApiError::Forbidden);
        }
        Ok(job)
    }

    pub async fn list(
        &self,
        tenant: &Tenant,
        status: Option<JobStatus>,
        params: PageParams,
    ) -> Result<Page<Job>, ApiError> {
        let (limit, offset) = params.clamp();
        self.store
            .list_jobs(&tenant.tenant_id, status, limit, offset)
            .await
            .map_err(ApiError::Internal)
    }

    pub async fn dlq_list(
        &self,
        tenant: &Tenant,
        params: PageParams,
    ) -> Result<Page<DlqEntry>, ApiError> {
        let (limit, offset) = params.clamp();
        self.store
            .list_dlq(&tenant.tenant_id, limit, offset)
            .await
            .map_err(ApiError::Internal)
    }

    pub async fn metrics(&self, tenant: &Tenant) -> Result<StatusCounts, ApiError> {
        self.store
            .summarize(&tenant.tenant_id)
            .await
            .map_err(ApiError::Internal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::jobs::testing::InMemoryJobStore;
    use crate::kernel::jobs::JobEventKind;
    use chrono::Utc;

    fn config() -> JobServiceConfig {
        JobServiceConfig {
            default_max_retries: 3,
            default_rate_limit_per_minute: 60,
            default_max_concurrent_jobs: 10,
        }
    }

    fn tenant(rate: Option<i32>, concurrent: Option<i32>) -> Tenant {
        Tenant {
            tenant_id: "acme".to_string(),
            api_key: "key-acme".to_string(),
            max_concurrent_jobs: concurrent,
            rate_limit_per_minute: rate,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn service() -> (JobService, Arc<InMemoryJobStore>, Arc<Admission>, EventBus) {
        let store = Arc::new(InMemoryJobStore::new());
        let admission = Arc::new(Admission::new());
        let bus = EventBus::new();
        let service = JobService::new(store.clone(), admission.clone(), bus.clone(), config());
        (service, store, admission, bus)
    }

    fn request(key: Option<&str>) -> SubmitRequest {
        SubmitRequest {
            payload: serde_json::json!({"x": 1}),
            idempotency_key: key.map(|k| k.to_string()),
            max_retries: Some(3),
        }
    }

    #[tokio::test]
    async fn submit_creates_a_pending_job_and_publishes_once() {
        let (service, store, _, bus) = service();
        let mut rx = bus.subscribe();

        let outcome = service.submit(&tenant(None, None), request(None)).await.unwrap();
        assert!(outcome.is_created());

        let job = store.job(outcome.job().id).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.max_retries, 3);
        assert!(job.trace_id.starts_with("trace-"));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, JobEventKind::JobSubmitted);
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.trace_id, job.trace_id);
    }

    #[tokio::test]
    async fn submit_defaults_max_retries_from_config() {
        let (service, _, _, _) = service();
        let outcome = service
            .submit(
                &tenant(None, None),
                SubmitRequest {
                    payload: serde_json::json!({}),
                    idempotency_key: None,
                    max_retries: None,
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.job().max_retries, 3);
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_returns_same_job_without_second_event() {
        let (service, _, admission, bus) = service();
        let mut rx = bus.subscribe();
        let tenant = tenant(None, None);

        let first = service.submit(&tenant, request(Some("k1"))).await.unwrap();
        let second = service.submit(&tenant, request(Some("k1"))).await.unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(first.job().id, second.job().id);

        // Exactly one submission event on the bus
        assert_eq!(rx.recv().await.unwrap().kind, JobEventKind::JobSubmitted);
        assert!(rx.try_recv().is_err());

        // The hit was not admission-counted
        assert_eq!(admission.in_flight_count("acme").await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_denies_then_recovers_after_refill() {
        let (service, _, _, _) = service();
        let tenant = tenant(Some(2), None);

        assert!(service.submit(&tenant, request(None)).await.is_ok());
        assert!(service.submit(&tenant, request(None)).await.is_ok());
        let err = service.submit(&tenant, request(None)).await.unwrap_err();
        assert!(matches!(err, ApiError::RateLimited));

        // 30s at 2/min puts roughly one token back
        tokio::time::advance(std::time::Duration::from_secs(30)).await;
        assert!(service.submit(&tenant, request(None)).await.is_ok());
    }

    #[tokio::test]
    async fn concurrency_cap_denies_submission_over_the_limit() {
        let (service, _, admission, _) = service();
        let tenant = tenant(None, Some(1));

        assert!(service.submit(&tenant, request(None)).await.is_ok());
        let err = service.submit(&tenant, request(None)).await.unwrap_err();
        assert!(matches!(err, ApiError::ConcurrencyExceeded));

        // A terminal transition frees the slot and submissions resume
        admission.release("acme").await;
        assert!(service.submit(&tenant, request(None)).await.is_ok());
    }

    #[tokio::test]
    async fn validation_rejects_bad_submissions() {
        let (service, store, admission, _) = service();
        let tenant = tenant(None, None);

        let err = service
            .submit(
                &tenant,
                SubmitRequest {
                    payload: serde_json::Value::Null,
                    idempotency_key: None,
                    max_retries: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = service
            .submit(
                &tenant,
                SubmitRequest {
                    payload: serde_json::json!({}),
                    idempotency_key: None,
                    max_retries: Some(-1),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        let err = service
            .submit(
                &tenant,
                SubmitRequest {
                    payload: serde_json::json!({}),
                    idempotency_key: Some(String::new()),
                    max_retries: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // Nothing was persisted or admission-counted
        assert_eq!(store.list_jobs("acme", None, 50, 0).await.unwrap().total, 0);
        assert_eq!(admission.in_flight_count("acme").await, 0);
    }

    #[tokio::test]
    async fn get_enforces_ownership() {
        let (service, store, _, _) = service();
        let owner = tenant(None, None);
        store.insert_tenant("globex", "key-globex", None, None);
        let other = Tenant {
            tenant_id: "globex".to_string(),
            api_key: "key-globex".to_string(),
            max_concurrent_jobs: None,
            rate_limit_per_minute: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let outcome = service.submit(&owner, request(None)).await.unwrap();
        let job_id = outcome.job().id;

        assert!(service.get(&owner, job_id).await.is_ok());
        assert!(matches!(
            service.get(&other, job_id).await.unwrap_err(),
            ApiError::Forbidden
        ));
        assert!(matches!(
            service.get(&owner, Uuid::new_v4()).await.unwrap_err(),
            ApiError::NotFound
        ));
    }

    #[tokio::test]
    async fn list_and_metrics_are_scoped_to_the_tenant() {
        let (service, store, _, _) = service();
        let tenant = tenant(None, None);

        service.submit(&tenant, request(None)).await.unwrap();
        service.submit(&tenant, request(None)).await.unwrap();
        // Foreign tenant's job should not appear
        store
            .create_job(CreateJob {
                tenant_id: "globex".to_string(),
                payload: serde_json::json!({}),
                idempotency_key: None,
                max_retries: 3,
                trace_id: "trace-foreign".to_string(),
            })
            .await
            .unwrap();

        let page = service
            .list(&tenant, None, PageParams::default())
            .await
            .unwrap();
        assert_eq!(page.total, 2);

        let counts = service.metrics(&tenant).await.unwrap();
        assert_eq!(counts.total, 2);
        assert_eq!(counts.pending, 2);
        assert_eq!(counts.dlq, 0);
    }
}
