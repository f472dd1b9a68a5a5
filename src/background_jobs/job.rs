use super::context::JobContext;
use std::time::Duration;

#[derive(Debug)]
pub enum JobError {
    ExecutionFailed(String),
    Cancelled,
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobError::ExecutionFailed(msg) => write!(f, "Job execution failed: {}", msg),
            JobError::Cancelled => write!(f, "Job was cancelled"),
        }
    }
}

impl std::error::Error for JobError {}

/// A periodic maintenance job.
///
/// `execute` runs on a blocking thread; long passes should poll
/// `ctx.is_cancelled()` between units of work and bail with
/// `JobError::Cancelled`.
pub trait BackgroundJob: Send + Sync {
    /// Stable identifier, used as the key in the run history.
    fn id(&self) -> &'static str;

    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Time between the end of one run and the start of the next.
    fn interval(&self) -> Duration;

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError>;
}
