//! Durable multi-tenant job queue and worker runtime.
//!
//! Clients submit opaque JSON payloads over an authenticated HTTP surface;
//! a pool of workers dequeues and executes them with at-least-once
//! semantics, bounded retries, and a dead-letter quarantine for poison
//! jobs. Lifecycle transitions fan out over an in-process event bus to
//! long-lived observer connections.
//!
//! # Architecture
//!
//! ```text
//! Submit:  HTTP ─► JobService ─► Admission ─► JobStore ─► EventBus
//! Process: Worker ─► JobStore (claim) ─► JobHandler ─► JobStore (ack) ─► EventBus
//! ```
//!
//! The database is the only durable shared resource. The event bus,
//! token buckets, and concurrency counters are process-local and are
//! rebuilt (or tolerated as stale) across restarts.

pub mod common;
pub mod config;
pub mod domains;
pub mod kernel;
pub mod server;

pub use config::Config;
