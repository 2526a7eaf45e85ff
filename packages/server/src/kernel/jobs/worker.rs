//! The worker hot loop: claim, execute, ack.
//!
//! Workers cooperate purely through the store's locking discipline; no
//! coordination happens between worker tasks. A handler failure never
//! crashes the loop, and a store failure leaves the row untouched — the
//! lease expires and another worker picks the job up.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::kernel::admission::Admission;
use crate::kernel::event_bus::EventBus;

use super::events::JobEvent;
use super::handler::{HandlerContext, JobHandler};
use super::job::Job;
use super::store::{FailOutcome, JobStore};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique per worker task, `worker-{pid}-{n}`.
    pub worker_id: String,
    pub lease_ttl: Duration,
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(index: usize, lease_ttl: Duration, poll_interval: Duration) -> Self {
        Self {
            worker_id: format!("worker-{}-{}", std::process::id(), index),
            lease_ttl,
            poll_interval,
        }
    }
}

/// A single dequeue/execute/ack loop.
pub struct Worker {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    admission: Arc<Admission>,
    bus: EventBus,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        admission: Arc<Admission>,
        bus: EventBus,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            handler,
            admission,
            bus,
            config,
        }
    }

    /// Run until shutdown. The current job is always drained before the
    /// loop exits; in-flight handlers are not cancelled by shutdown.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(worker_id = %self.config.worker_id, "worker starting");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self
                .store
                .claim_next_pending(&self.config.worker_id, self.config.lease_ttl)
                .await
            {
                Ok(Some(job)) => {
                    // Under load: loop again immediately, no sleep
                    self.process(job).await;
                }
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    error!(worker_id = %self.config.worker_id, error = %e, "failed to claim job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "worker stopped");
    }

    async fn process(&self, job: Job) {
        let job_id = job.id;
        debug!(
            job_id = %job_id,
            trace_id = %job.trace_id,
            worker_id = %self.config.worker_id,
            "job claimed"
        );
        self.bus
            .publish(JobEvent::started(&job, &self.config.worker_id));

        // Cancelled by the heartbeat when the lease is lost; never by
        // shutdown — shutdown drains the attempt.
        let cancel = CancellationToken::new();
        let deadline = job
            .lease_expires_at
            .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(300));

        let heartbeat = self.spawn_heartbeat(job_id, cancel.clone());
        let result = self
            .handler
            .run(&job, HandlerContext::new(cancel.clone(), deadline))
            .await;
        cancel.cancel();
        let _ = heartbeat.await;

        match result {
            Ok(value) => {
                match self
                    .store
                    .complete_job(job_id, &self.config.worker_id, value)
                    .await
                {
                    Ok(true) => {
                        self.admission.release(&job.tenant_id).await;
                        debug!(job_id = %job_id, trace_id = %job.trace_id, "job completed");
                        self.bus.publish(JobEvent::completed(&job));
                    }
                    Ok(false) => {
                        // Lease was reclaimed mid-flight; the result is discarded
                        warn!(job_id = %job_id, "stale completion discarded");
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "failed to mark job completed");
                    }
                }
            }
            Err(err) => {
                let permanent = err.is_permanent();
                match self
                    .store
                    .fail_and_retry(job_id, &self.config.worker_id, &err.to_string(), permanent)
                    .await
                {
                    Ok(Some(FailOutcome::Retried(updated))) => {
                        warn!(
                            job_id = %job_id,
                            trace_id = %updated.trace_id,
                            retry_count = updated.retry_count,
                            error = %err,
                            "job failed; returned to queue"
                        );
                        // The job is still outstanding for this tenant:
                        // the concurrency slot stays reserved until a
                        // terminal transition or lease reclaim.
                        self.bus.publish(JobEvent::retry(&updated));
                    }
                    Ok(Some(FailOutcome::DeadLettered(updated))) => {
                        self.admission.release(&updated.tenant_id).await;
                        error!(
                            job_id = %job_id,
                            trace_id = %updated.trace_id,
                            error = %err,
                            "job dead-lettered"
                        );
                        self.bus.publish(JobEvent::dead_lettered(&updated));
                    }
                    Ok(None) => {
                        warn!(job_id = %job_id, "stale failure ack discarded");
                    }
                    Err(e) => {
                        error!(job_id = %job_id, error = %e, "failed to record job failure");
                    }
                }
            }
        }
    }

    /// Renew the lease at a third of its TTL while the handler runs.
    /// A failed renewal means a reaper already reclaimed the job: the
    /// handler is signalled to cancel and whatever it produces is
    /// rejected by the owner guards.
    fn spawn_heartbeat(&self, job_id: Uuid, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.store.clone();
        let worker_id = self.config.worker_id.clone();
        let lease_ttl = self.config.lease_ttl;
        let period = (lease_ttl / 3).max(Duration::from_millis(100));

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match store.renew_lease(job_id, &worker_id, lease_ttl).await {
                            Ok(true) => {}
                            Ok(false) => {
                                warn!(job_id = %job_id, worker_id = %worker_id, "lease lost; cancelling handler");
                                cancel.cancel();
                                break;
                            }
                            Err(e) => {
                                warn!(job_id = %job_id, error = %e, "lease renewal failed");
                            }
                        }
                    }
                }
            }
        })
    }
}
