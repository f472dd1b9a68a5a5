use super::context::JobContext;
use super::job::{BackgroundJob, JobError};
use crate::access_store::{AccessStore, JobRunStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

struct ScheduledJob {
    job: Arc<dyn BackgroundJob>,
    next_run: Instant,
}

/// Runs registered jobs on their intervals until shutdown.
///
/// Each execution is recorded in the job run history before and after it
/// runs, so a crash mid-job leaves a RUNNING row behind; those are marked
/// failed on the next startup. A failing job never stops the scheduler or
/// the other jobs.
pub struct JobScheduler {
    jobs: Vec<ScheduledJob>,
    store: Arc<dyn AccessStore>,
    shutdown_token: CancellationToken,
    job_context: JobContext,
}

impl JobScheduler {
    pub fn new(
        store: Arc<dyn AccessStore>,
        shutdown_token: CancellationToken,
        job_context: JobContext,
    ) -> Self {
        Self {
            jobs: Vec::new(),
            store,
            shutdown_token,
            job_context,
        }
    }

    pub fn register_job(&mut self, job: Arc<dyn BackgroundJob>) {
        info!("Registering job: {} - {}", job.id(), job.description());
        let next_run = Instant::now() + job.interval();
        self.jobs.push(ScheduledJob { job, next_run });
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub async fn run(mut self) {
        info!(
            "Starting job scheduler with {} registered jobs",
            self.jobs.len()
        );

        match self.store.mark_stale_jobs_failed() {
            Ok(0) => {}
            Ok(stale) => warn!("Marked {} interrupted job runs as failed", stale),
            Err(err) => error!("Failed to clean up stale job runs: {:?}", err),
        }

        loop {
            let next_due = match self.jobs.iter().map(|entry| entry.next_run).min() {
                Some(next_due) => next_due,
                None => {
                    self.shutdown_token.cancelled().await;
                    break;
                }
            };

            tokio::select! {
                _ = tokio::time::sleep_until(next_due) => {
                    self.run_due_jobs().await;
                }
                _ = self.shutdown_token.cancelled() => {
                    info!("Scheduler received shutdown signal");
                    break;
                }
            }
        }

        info!("Job scheduler stopped");
    }

    async fn run_due_jobs(&mut self) {
        let now = Instant::now();
        for index in 0..self.jobs.len() {
            if self.jobs[index].next_run > now {
                continue;
            }
            let job = self.jobs[index].job.clone();
            Self::execute_job(&self.store, &self.job_context, job).await;
            self.jobs[index].next_run = Instant::now() + self.jobs[index].job.interval();
        }
    }

    async fn execute_job(
        store: &Arc<dyn AccessStore>,
        job_context: &JobContext,
        job: Arc<dyn BackgroundJob>,
    ) {
        let job_id = job.id();
        let run_id = match store.record_job_start(job_id, "schedule") {
            Ok(run_id) => run_id,
            Err(err) => {
                error!("Failed to record start of job {}: {:?}", job_id, err);
                return;
            }
        };

        info!("Starting job: {} (run_id: {})", job_id, run_id);
        let started = std::time::Instant::now();

        let ctx = job_context.clone();
        let result = tokio::task::spawn_blocking(move || job.execute(&ctx)).await;

        let elapsed = started.elapsed();
        let (status, error_message) = match result {
            Ok(Ok(())) => {
                info!("Job {} completed in {:?}", job_id, elapsed);
                (JobRunStatus::Completed, None)
            }
            Ok(Err(JobError::Cancelled)) => {
                warn!("Job {} cancelled after {:?}", job_id, elapsed);
                (JobRunStatus::Failed, Some("Cancelled".to_string()))
            }
            Ok(Err(JobError::ExecutionFailed(msg))) => {
                error!("Job {} failed after {:?}: {}", job_id, elapsed, msg);
                (JobRunStatus::Failed, Some(msg))
            }
            Err(join_err) => {
                error!("Job {} panicked: {:?}", job_id, join_err);
                (JobRunStatus::Failed, Some(format!("Panic: {}", join_err)))
            }
        };

        if let Err(err) = store.record_job_finish(run_id, status, error_message) {
            error!("Failed to record finish of job {}: {:?}", job_id, err);
        }
    }
}
