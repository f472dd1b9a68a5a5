//! Periodic maintenance: expiry sweeping, buyer warnings, usage reports
//! and database backups, all driven by a single scheduler task.

mod context;
mod job;
pub mod jobs;
mod scheduler;

pub use context::JobContext;
pub use job::{BackgroundJob, JobError};
pub use scheduler::JobScheduler;
