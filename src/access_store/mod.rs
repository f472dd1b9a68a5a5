mod models;
mod schema;
mod sqlite_access_store;

pub use models::*;
pub use schema::ACCESS_VERSIONED_SCHEMAS;
pub use sqlite_access_store::SqliteAccessStore;

use anyhow::Result;
use std::path::Path;

/// Persistence interface over download grants, the attempt audit log and
/// scheduler job history. The store exclusively owns record lifetimes;
/// usage is only ever mutated through `consume_use`.
pub trait AccessStore: Send + Sync {
    // Products (read surface of the external catalog)
    fn insert_product(&self, product: &Product) -> Result<i64>;
    fn get_product(&self, id: i64) -> Result<Option<Product>>;

    // Download grants
    fn insert_access(&self, access: &NewDownloadAccess) -> Result<DownloadAccess>;
    fn get_access_by_token(&self, token: &str) -> Result<Option<DownloadAccess>>;
    fn get_access_by_transaction(&self, transaction_id: i64) -> Result<Option<DownloadAccess>>;

    /// Atomically consume one use: increments the count and stamps
    /// `last_access`, but only while `download_count < max_downloads`.
    /// Returns the post-increment count, or None when the limit was
    /// already reached. This is the only write path for usage so both the
    /// limit and the reported count hold under concurrent requests.
    fn consume_use(&self, token: &str, now: i64) -> Result<Option<i64>>;

    /// Force `max_downloads` to zero. Returns false for an unknown token.
    fn block_token(&self, token: &str) -> Result<bool>;

    /// Delete all grants past their expiry. Returns the number removed.
    fn delete_expired(&self, now: i64) -> Result<usize>;

    /// Grants expiring in `[from, to]` that still have remaining uses.
    fn expiring_within(&self, from: i64, to: i64) -> Result<Vec<DownloadAccess>>;

    /// Aggregate usage over grants created since the given timestamp.
    fn usage_report(&self, since: i64) -> Result<DeliveryReport>;

    /// Sum of a user's download counts across grants accessed since the
    /// given timestamp.
    fn user_downloads_since(&self, user_id: i64, since: i64) -> Result<i64>;

    // Attempt audit log (append-only)
    fn log_attempt(&self, attempt: &DownloadAttempt) -> Result<()>;
    fn attempts_for_token(&self, token: &str) -> Result<Vec<DownloadAttempt>>;

    // Scheduler job history
    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64>;
    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
    fn mark_stale_jobs_failed(&self) -> Result<usize>;

    /// Snapshot the whole store to a file at the given path.
    fn backup_to(&self, path: &Path) -> Result<()>;
}
