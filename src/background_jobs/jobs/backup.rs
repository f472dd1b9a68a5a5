use crate::background_jobs::{BackgroundJob, JobContext, JobError};
use std::time::Duration;
use tracing::{info, warn};

const BACKUP_PREFIX: &str = "database_backup_";

/// Snapshots the store into the backups directory and prunes old copies.
pub struct BackupJob {
    interval_hours: u64,
    retention: usize,
}

impl BackupJob {
    pub fn new(interval_hours: u64, retention: usize) -> Self {
        Self {
            interval_hours,
            retention,
        }
    }

    /// Keep only the newest `retention` backups. Filenames embed their
    /// creation time, so lexicographic order is chronological.
    fn prune(&self, ctx: &JobContext) -> Result<(), JobError> {
        let entries = std::fs::read_dir(&ctx.backups_dir)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        let mut backups: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with(BACKUP_PREFIX) && name.ends_with(".db"))
            .collect();
        backups.sort();

        if backups.len() <= self.retention {
            return Ok(());
        }

        let excess = backups.len() - self.retention;
        for name in backups.into_iter().take(excess) {
            let path = ctx.backups_dir.join(&name);
            if let Err(err) = std::fs::remove_file(&path) {
                warn!("Failed to prune backup {:?}: {}", path, err);
            }
        }
        Ok(())
    }
}

impl BackgroundJob for BackupJob {
    fn id(&self) -> &'static str {
        "backup"
    }

    fn name(&self) -> &'static str {
        "Database Backup"
    }

    fn description(&self) -> &'static str {
        "Snapshots the access database and prunes old backups"
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_hours * 3600)
    }

    fn execute(&self, ctx: &JobContext) -> Result<(), JobError> {
        if ctx.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        std::fs::create_dir_all(&ctx.backups_dir)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;

        let filename = format!(
            "{}{}.db",
            BACKUP_PREFIX,
            chrono::Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = ctx.backups_dir.join(&filename);

        ctx.access_store
            .backup_to(&path)
            .map_err(|err| JobError::ExecutionFailed(err.to_string()))?;
        info!("Wrote backup {}", filename);

        self.prune(ctx)
    }
}
