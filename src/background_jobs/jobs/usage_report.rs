use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use crate::delivery::unix_now;
use std::time::Duration;
use tracing::info;

/// Writes a daily usage report as JSON into the reports directory.
pub struct UsageReportJob {
    interval_hours: u64,
    window_days: i64,
}

impl UsageReportJob {
    pub fn new(interval_hours: u64, window_days: i64) -> Self {
        Self {
            interval_hours,
            window_days,
        }
    }
}

impl BackgroundJob for UsageReportJob {
    fn id(&self) -> &'static str {
        "usage_report"
    }

    fn name(&self) -> &'static str {
        "Usage Report"
    }

    fn description(&self) -> &'static str {
        "Writes an aggregate delivery report to the reports directory"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let since = unix_now() - self.window_days * 86400;
        let report = ctx
            .access_store
            .usage_report(since)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        std::fs::create_dir_all(&ctx.reports_dir)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        let filename = format!("daily_report_{}.json", chrono::Utc::now().format("%Y%m%d"));
        let path = ctx.reports_dir.join(&filename);

        let json = serde_json::to_string_pretty(&report)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;
        std::fs::write(&path, json).map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        info!(
            "Wrote {} ({} deliveries, {} users)",
            filename, report.total_deliveries, report.unique_users
        );
        Ok(())
    }
}
