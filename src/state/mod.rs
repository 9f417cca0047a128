//! State module for tracking job progress
//!
//! # Components
//!
//! - `TaskState`: state of an individual URL task (pending, in flight, done, ...)
//! - `HostState`: per-host politeness bookkeeping (spacing, concurrency, backoff)
//! - `JobStatus`: lifecycle of a whole job

mod host_state;
mod job_status;
mod task_state;

pub use host_state::HostState;
pub use job_status::JobStatus;
pub use task_state::TaskState;
