mod dlq;
mod health;
mod jobs;
mod metrics;
mod stream;

pub use dlq::list_dlq;
pub use health::health_handler;
pub use jobs::{get_job, list_jobs, submit_job};
pub use metrics::metrics_handler;
pub use stream::events_handler;
