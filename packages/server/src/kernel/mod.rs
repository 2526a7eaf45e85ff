//! Kernel-level infrastructure: persistence, admission control, the
//! event bus, and the worker runtime. Business logic stays in `domains`.

pub mod admission;
pub mod event_bus;
pub mod jobs;
pub mod tenant;

pub use admission::Admission;
pub use event_bus::EventBus;
pub use tenant::Tenant;
