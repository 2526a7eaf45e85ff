//! Worker pool supervision and the lease reaper.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::kernel::admission::Admission;
use crate::kernel::event_bus::EventBus;

use super::events::JobEvent;
use super::handler::JobHandler;
use super::store::JobStore;
use super::worker::{Worker, WorkerConfig};

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks.
    pub size: usize,
    pub lease_ttl: Duration,
    pub poll_interval: Duration,
    /// How long shutdown waits for in-flight jobs to drain.
    pub shutdown_grace: Duration,
}

impl WorkerPoolConfig {
    pub fn from_config(config: &crate::Config) -> Self {
        Self {
            size: config.worker_pool_size,
            lease_ttl: config.worker_lease_ttl,
            poll_interval: config.worker_poll_interval,
            shutdown_grace: config.shutdown_grace,
        }
    }
}

/// Supervises N workers sharing one store handle, plus a periodic lease
/// reaper at half the lease TTL.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    admission: Arc<Admission>,
    bus: EventBus,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        handler: Arc<dyn JobHandler>,
        admission: Arc<Admission>,
        bus: EventBus,
        config: WorkerPoolConfig,
    ) -> Self {
        Self {
            store,
            handler,
            admission,
            bus,
            config,
        }
    }

    /// Run until the shutdown token fires, then drain within the grace
    /// window. Workers still executing after the window are abandoned;
    /// their leases expire and the next pool instance reclaims the jobs.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        // The concurrency gate is process-local: rebuild it from the
        // RUNNING rows before accepting any work.
        let counts = self.store.running_counts().await?;
        self.admission.rebuild(counts).await;

        info!(
            size = self.config.size,
            lease_ttl_secs = self.config.lease_ttl.as_secs(),
            "worker pool starting"
        );

        let mut workers = Vec::with_capacity(self.config.size);
        for n in 0..self.config.size {
            let worker = Worker::new(
                self.store.clone(),
                self.handler.clone(),
                self.admission.clone(),
                self.bus.clone(),
                WorkerConfig::new(n, self.config.lease_ttl, self.config.poll_interval),
            );
            workers.push(tokio::spawn(worker.run(shutdown.clone())));
        }

        let reaper = {
            let store = self.store.clone();
            let admission = self.admission.clone();
            let bus = self.bus.clone();
            let shutdown = shutdown.clone();
            let period = (self.config.lease_ttl / 2).max(Duration::from_millis(100));

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(period);
                interval.tick().await; // Skip first immediate tick

                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = interval.tick() => {
                            if let Err(e) = reap_expired(store.as_ref(), &admission, &bus).await {
                                error!(error = %e, "lease reap failed");
                            }
                        }
                    }
                }
            })
        };

        shutdown.cancelled().await;
        info!("worker pool draining");

        let drained = tokio::time::timeout(
            self.config.shutdown_grace,
            futures::future::join_all(workers),
        )
        .await;
        if drained.is_err() {
            warn!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "shutdown grace elapsed with jobs still in flight"
            );
        }

        let _ = reaper.await;
        info!("worker pool stopped");
        Ok(())
    }
}

/// One reaper tick: return expired RUNNING jobs to the queue, release
/// their tenants' concurrency slots, and announce the requeue.
pub async fn reap_expired(
    store: &dyn JobStore,
    admission: &Admission,
    bus: &EventBus,
) -> Result<usize> {
    let reclaimed = store.reclaim_expired_leases(Utc::now()).await?;

    for job in &reclaimed {
        warn!(
            job_id = %job.id,
            trace_id = %job.trace_id,
            "lease expired; job returned to queue"
        );
        admission.release(&job.tenant_id).await;
        bus.publish(JobEvent::retry(job));
    }

    Ok(reclaimed.len())
}
