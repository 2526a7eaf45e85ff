//! Domain services layered over the kernel. Business rules live here;
//! persistence and runtime plumbing stay in `kernel`.

pub mod jobs;
