//! Job infrastructure: the state machine, the leased-dequeue store, the
//! worker runtime, and lifecycle events.
//!
//! # Architecture
//!
//! ```text
//! JobService.submit()
//!     └─► JobStore.create_job()            (idempotent insert)
//!
//! Worker loop
//!     ├─► JobStore.claim_next_pending()    (FOR UPDATE SKIP LOCKED)
//!     ├─► JobHandler.run()                 (heartbeat renews the lease)
//!     └─► complete_job / fail_and_retry    (owner-guarded)
//!
//! WorkerPool
//!     ├─► spawns N workers
//!     └─► lease reaper                     (expired RUNNING → PENDING)
//! ```
//!
//! Domain logic never touches rows directly; everything goes through the
//! [`JobStore`] trait so tests can swap in [`testing::InMemoryJobStore`].

pub mod events;
mod handler;
mod job;
mod pool;
mod store;
pub mod testing;
mod worker;

pub use events::{JobEvent, JobEventKind};
pub use handler::{HandlerContext, HandlerError, JobHandler, SleepHandler};
pub use job::{DlqEntry, Job, JobStatus, StatusCounts};
pub use pool::{reap_expired, WorkerPool, WorkerPoolConfig};
pub use store::{CreateJob, CreateOutcome, FailOutcome, JobStore, PostgresJobStore};
pub use worker::{Worker, WorkerConfig};
