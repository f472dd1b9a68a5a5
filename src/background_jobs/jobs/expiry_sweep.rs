use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::delivery::unix_now;
use std::time::Duration;
use tracing::info;

/// Deletes download grants past their expiry.
pub struct ExpirySweepJob {
    interval_hours: u64,
}

impl ExpirySweepJob {
    pub fn new(interval_hours: u64) -> Self {
        Self { interval_hours }
    }
}

impl BackgroundJob for ExpirySweepJob {
    fn id(&self) -> &'static str {
        "expiry_sweep"
    }

    fn name(&self) -> &'static str {
        "Expiry Sweep"
    }

    fn description(&self) -> &'static str {
        "Deletes download grants past their expiry"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let deleted = ctx
            .access_store
            .delete_expired(unix_now())
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        if deleted > 0 {
            info!("Expiry sweep removed {} grants", deleted);
        }
        Ok(())
    }
}
