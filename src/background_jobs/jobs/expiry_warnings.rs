use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::delivery::unix_now;
use std::time::Duration;
use tracing::info;

/// Notifies buyers whose grants are about to expire with uses left.
pub struct ExpiryWarningsJob {
    interval_hours: u64,
    window_min_hours: i64,
    window_max_hours: i64,
}

impl ExpiryWarningsJob {
    pub fn new(interval_hours: u64, window_min_hours: i64, window_max_hours: i64) -> Self {
        Self {
            interval_hours,
            window_min_hours,
            window_max_hours,
        }
    }
}

impl BackgroundJob for ExpiryWarningsJob {
    fn id(&self) -> &'static str {
        "expiry_warnings"
    }

    fn name(&self) -> &'static str {
        "Expiry Warnings"
    }

    fn description(&self) -> &'static str {
        "Warns buyers shortly before their grants expire"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        let now = unix_now();
        let from = now + self.window_min_hours * 3600;
        let to = now + self.window_max_hours * 3600;

        let expiring = ctx
            .access_store
            .expiring_within(from, to)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        let mut warned = 0;
        for access in &expiring {
            if ctx.is_cancelled() {
                return Err(JobError::Cancelled);
            }
            let hours_left = (access.expires_at - now) / 3600;
            ctx.notifier.notify_expiry_warning(access, hours_left);
            warned += 1;
        }

        if warned > 0 {
            info!("Sent {} expiry warnings", warned);
        }
        Ok(())
    }
}
