mod service;

pub use service::{JobService, JobServiceConfig, SubmitOutcome, SubmitRequest};
