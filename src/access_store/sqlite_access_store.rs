//! SQLite-backed storage for download grants and related data.

use super::models::*;
use super::schema::ACCESS_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tracing::info;

use super::AccessStore;

pub struct SqliteAccessStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAccessStore {
    /// Open an existing database or create a new one with the current schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            ACCESS_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new delivery database at {:?}", db_path.as_ref());
            conn
        };

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Delivery database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = ACCESS_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Delivery database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        ACCESS_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteAccessStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store, mostly useful for tests.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        ACCESS_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteAccessStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = ACCESS_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating delivery database from version {} to {}",
            current_version, target_version
        );

        for schema in ACCESS_VERSIONED_SCHEMAS.iter().skip(current_version + 1) {
            if let Some(migration_fn) = schema.migration {
                info!("Running delivery migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!(
                "PRAGMA user_version = {}",
                BASE_DB_VERSION + target_version
            ),
            [],
        )?;

        Ok(())
    }

    fn row_to_access(row: &rusqlite::Row) -> rusqlite::Result<DownloadAccess> {
        Ok(DownloadAccess {
            id: row.get("id")?,
            transaction_id: row.get("transaction_id")?,
            user_id: row.get("user_id")?,
            product_id: row.get("product_id")?,
            token: row.get("token")?,
            download_count: row.get("download_count")?,
            max_downloads: row.get("max_downloads")?,
            last_access: row.get("last_access")?,
            expires_at: row.get("expires_at")?,
            created_at: row.get("created_at")?,
        })
    }

    fn row_to_product(row: &rusqlite::Row) -> rusqlite::Result<Product> {
        Ok(Product {
            id: row.get("id")?,
            title: row.get("title")?,
            file_path: row.get("file_path")?,
            file_name: row.get("file_name")?,
            active: row.get::<_, i64>("active")? != 0,
        })
    }

    fn row_to_attempt(row: &rusqlite::Row) -> rusqlite::Result<DownloadAttempt> {
        Ok(DownloadAttempt {
            token: row.get("token")?,
            client_ip: row.get("client_ip")?,
            user_agent: row.get("user_agent")?,
            success: row.get::<_, i64>("success")? != 0,
            reason: row.get("reason")?,
            created_at: row.get("created_at")?,
        })
    }

    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }
}

impl AccessStore for SqliteAccessStore {
    fn insert_product(&self, product: &Product) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO products (title, file_path, file_name, active)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                product.title,
                product.file_path,
                product.file_name,
                product.active as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM products WHERE id = ?1")?;
        let product = stmt.query_row([id], Self::row_to_product).optional()?;
        Ok(product)
    }

    fn insert_access(&self, access: &NewDownloadAccess) -> Result<DownloadAccess> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO download_access (
                transaction_id, user_id, product_id, token,
                download_count, max_downloads, expires_at, created_at
            ) VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, ?7)",
            params![
                access.transaction_id,
                access.user_id,
                access.product_id,
                access.token,
                access.max_downloads,
                access.expires_at,
                access.created_at,
            ],
        )?;
        let id = conn.last_insert_rowid();
        Ok(DownloadAccess {
            id,
            transaction_id: access.transaction_id,
            user_id: access.user_id,
            product_id: access.product_id,
            token: access.token.clone(),
            download_count: 0,
            max_downloads: access.max_downloads,
            last_access: None,
            expires_at: access.expires_at,
            created_at: access.created_at,
        })
    }

    fn get_access_by_token(&self, token: &str) -> Result<Option<DownloadAccess>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM download_access WHERE token = ?1")?;
        let access = stmt.query_row([token], Self::row_to_access).optional()?;
        Ok(access)
    }

    fn get_access_by_transaction(&self, transaction_id: i64) -> Result<Option<DownloadAccess>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM download_access WHERE transaction_id = ?1")?;
        let access = stmt
            .query_row([transaction_id], Self::row_to_access)
            .optional()?;
        Ok(access)
    }

    fn consume_use(&self, token: &str, now: i64) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        // Single conditional update; the count check, the increment and the
        // returned count must stay one statement so both the limit and the
        // reported count hold under concurrent requests.
        let mut stmt = conn.prepare(
            "UPDATE download_access
             SET download_count = download_count + 1, last_access = ?1
             WHERE token = ?2 AND download_count < max_downloads
             RETURNING download_count",
        )?;
        let count = stmt
            .query_row(params![now, token], |row| row.get::<_, i64>(0))
            .optional()?;
        Ok(count)
    }

    fn block_token(&self, token: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE download_access SET max_downloads = 0 WHERE token = ?1",
            params![token],
        )?;
        Ok(updated == 1)
    }

    fn delete_expired(&self, now: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM download_access WHERE expires_at < ?1",
            params![now],
        )?;
        Ok(deleted)
    }

    fn expiring_within(&self, from: i64, to: i64) -> Result<Vec<DownloadAccess>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM download_access
             WHERE expires_at >= ?1 AND expires_at <= ?2
               AND download_count < max_downloads
             ORDER BY expires_at ASC",
        )?;
        let rows = stmt
            .query_map(params![from, to], Self::row_to_access)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn usage_report(&self, since: i64) -> Result<DeliveryReport> {
        let conn = self.conn.lock().unwrap();
        let (total_deliveries, unique_users, total_downloads, used_deliveries) = conn.query_row(
            "SELECT
                COUNT(*),
                COUNT(DISTINCT user_id),
                COALESCE(SUM(download_count), 0),
                COALESCE(SUM(CASE WHEN download_count > 0 THEN 1 ELSE 0 END), 0)
             FROM download_access WHERE created_at >= ?1",
            params![since],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        let mut stmt = conn.prepare(
            "SELECT product_id, COUNT(*), COALESCE(SUM(download_count), 0)
             FROM download_access WHERE created_at >= ?1
             GROUP BY product_id ORDER BY product_id ASC",
        )?;
        let products = stmt
            .query_map(params![since], |row| {
                Ok(ProductUsage {
                    product_id: row.get(0)?,
                    deliveries: row.get(1)?,
                    downloads: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let average_downloads = if total_deliveries > 0 {
            total_downloads as f64 / total_deliveries as f64
        } else {
            0.0
        };
        let usage_rate = if total_deliveries > 0 {
            used_deliveries as f64 / total_deliveries as f64
        } else {
            0.0
        };

        Ok(DeliveryReport {
            window_start: since,
            total_deliveries,
            unique_users,
            total_downloads,
            average_downloads,
            usage_rate,
            products,
        })
    }

    fn user_downloads_since(&self, user_id: i64, since: i64) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        let total = conn.query_row(
            "SELECT COALESCE(SUM(download_count), 0) FROM download_access
             WHERE user_id = ?1 AND last_access IS NOT NULL AND last_access >= ?2",
            params![user_id, since],
            |row| row.get(0),
        )?;
        Ok(total)
    }

    fn log_attempt(&self, attempt: &DownloadAttempt) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO download_attempts (
                token, client_ip, user_agent, success, reason, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                attempt.token,
                attempt.client_ip,
                attempt.user_agent,
                attempt.success as i64,
                attempt.reason,
                attempt.created_at,
            ],
        )?;
        Ok(())
    }

    fn attempts_for_token(&self, token: &str) -> Result<Vec<DownloadAttempt>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM download_attempts WHERE token = ?1 ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt
            .query_map([token], Self::row_to_attempt)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn record_job_start(&self, job_id: &str, triggered_by: &str) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO job_runs (job_id, triggered_by, status, started_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                job_id,
                triggered_by,
                JobRunStatus::Running.as_db_str(),
                Self::now()
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn record_job_finish(
        &self,
        run_id: i64,
        status: JobRunStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE job_runs SET status = ?1, error_message = ?2, finished_at = ?3
             WHERE id = ?4",
            params![status.as_db_str(), error_message, Self::now(), run_id],
        )?;
        Ok(())
    }

    fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM job_runs WHERE job_id = ?1 ORDER BY started_at DESC, id DESC LIMIT 1",
        )?;
        let run = stmt
            .query_row([job_id], |row| {
                let status_str: String = row.get("status")?;
                Ok(JobRun {
                    id: row.get("id")?,
                    job_id: row.get("job_id")?,
                    triggered_by: row.get("triggered_by")?,
                    status: JobRunStatus::from_db_str(&status_str)
                        .unwrap_or(JobRunStatus::Failed),
                    error_message: row.get("error_message")?,
                    started_at: row.get("started_at")?,
                    finished_at: row.get("finished_at")?,
                })
            })
            .optional()?;
        Ok(run)
    }

    fn mark_stale_jobs_failed(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let updated = conn.execute(
            "UPDATE job_runs SET status = ?1, error_message = 'Interrupted by restart',
             finished_at = ?2 WHERE status = ?3",
            params![
                JobRunStatus::Failed.as_db_str(),
                Self::now(),
                JobRunStatus::Running.as_db_str()
            ],
        )?;
        Ok(updated)
    }

    fn backup_to(&self, path: &Path) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let path_str = path
            .to_str()
            .context("Backup path is not valid unicode")?;
        conn.execute("VACUUM INTO ?1", params![path_str])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> SqliteAccessStore {
        SqliteAccessStore::in_memory().unwrap()
    }

    fn sample_access(token: &str, transaction_id: i64) -> NewDownloadAccess {
        NewDownloadAccess {
            transaction_id,
            user_id: 7,
            product_id: 1,
            token: token.to_string(),
            max_downloads: 3,
            expires_at: 2_000_000,
            created_at: 1_000_000,
        }
    }

    #[test]
    fn insert_and_get_by_token() {
        let store = store();
        let created = store.insert_access(&sample_access("tok-a", 100)).unwrap();
        assert_eq!(created.download_count, 0);

        let fetched = store.get_access_by_token("tok-a").unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store.get_access_by_token("missing").unwrap().is_none());
    }

    #[test]
    fn get_by_transaction() {
        let store = store();
        store.insert_access(&sample_access("tok-a", 100)).unwrap();

        let fetched = store.get_access_by_transaction(100).unwrap().unwrap();
        assert_eq!(fetched.token, "tok-a");
        assert!(store.get_access_by_transaction(999).unwrap().is_none());
    }

    #[test]
    fn duplicate_transaction_rejected() {
        let store = store();
        store.insert_access(&sample_access("tok-a", 100)).unwrap();
        assert!(store.insert_access(&sample_access("tok-b", 100)).is_err());
    }

    #[test]
    fn consume_use_respects_limit() {
        let store = store();
        store.insert_access(&sample_access("tok-a", 100)).unwrap();

        for expected_count in 1..=3 {
            assert_eq!(
                store.consume_use("tok-a", 1_500_000).unwrap(),
                Some(expected_count)
            );
            let access = store.get_access_by_token("tok-a").unwrap().unwrap();
            assert_eq!(access.download_count, expected_count);
            assert_eq!(access.last_access, Some(1_500_000));
        }

        assert!(store.consume_use("tok-a", 1_500_001).unwrap().is_none());
        let access = store.get_access_by_token("tok-a").unwrap().unwrap();
        assert_eq!(access.download_count, 3);
    }

    #[test]
    fn consume_use_unknown_token() {
        let store = store();
        assert!(store.consume_use("missing", 1).unwrap().is_none());
    }

    #[test]
    fn concurrent_consumption_never_exceeds_limit() {
        let store = Arc::new(store());
        store.insert_access(&sample_access("tok-a", 100)).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.consume_use("tok-a", 1_500_000).unwrap()
            }));
        }
        let mut counts: Vec<i64> = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .collect();
        counts.sort_unstable();

        // Exactly three successes, each reporting a distinct count
        assert_eq!(counts, vec![1, 2, 3]);
        let access = store.get_access_by_token("tok-a").unwrap().unwrap();
        assert_eq!(access.download_count, 3);
    }

    #[test]
    fn block_token_exhausts_immediately() {
        let store = store();
        store.insert_access(&sample_access("tok-a", 100)).unwrap();
        assert!(store.consume_use("tok-a", 1_100_000).unwrap().is_some());

        assert!(store.block_token("tok-a").unwrap());
        assert!(store.consume_use("tok-a", 1_200_000).unwrap().is_none());
        assert!(!store.block_token("missing").unwrap());
    }

    #[test]
    fn delete_expired_is_idempotent() {
        let store = store();
        store.insert_access(&sample_access("tok-a", 100)).unwrap();
        let mut expiring_soon = sample_access("tok-b", 101);
        expiring_soon.expires_at = 1_000;
        store.insert_access(&expiring_soon).unwrap();

        assert_eq!(store.delete_expired(10_000).unwrap(), 1);
        assert_eq!(store.delete_expired(10_000).unwrap(), 0);
        assert!(store.get_access_by_token("tok-b").unwrap().is_none());
        assert!(store.get_access_by_token("tok-a").unwrap().is_some());
    }

    #[test]
    fn expiring_within_skips_exhausted() {
        let store = store();
        let mut a = sample_access("tok-a", 100);
        a.expires_at = 5_000;
        store.insert_access(&a).unwrap();

        let mut b = sample_access("tok-b", 101);
        b.expires_at = 5_500;
        b.max_downloads = 1;
        store.insert_access(&b).unwrap();
        assert!(store.consume_use("tok-b", 4_000).unwrap().is_some());

        let mut c = sample_access("tok-c", 102);
        c.expires_at = 9_000;
        store.insert_access(&c).unwrap();

        let expiring = store.expiring_within(4_000, 6_000).unwrap();
        assert_eq!(expiring.len(), 1);
        assert_eq!(expiring[0].token, "tok-a");
    }

    #[test]
    fn usage_report_aggregates() {
        let store = store();
        let mut a = sample_access("tok-a", 100);
        a.user_id = 1;
        a.product_id = 10;
        store.insert_access(&a).unwrap();
        store.consume_use("tok-a", 1_100_000).unwrap();
        store.consume_use("tok-a", 1_200_000).unwrap();

        let mut b = sample_access("tok-b", 101);
        b.user_id = 2;
        b.product_id = 10;
        store.insert_access(&b).unwrap();

        let mut c = sample_access("tok-c", 102);
        c.user_id = 1;
        c.product_id = 20;
        store.insert_access(&c).unwrap();
        store.consume_use("tok-c", 1_300_000).unwrap();

        let report = store.usage_report(0).unwrap();
        assert_eq!(report.total_deliveries, 3);
        assert_eq!(report.unique_users, 2);
        assert_eq!(report.total_downloads, 3);
        assert!((report.average_downloads - 1.0).abs() < f64::EPSILON);
        assert!((report.usage_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(report.products.len(), 2);
        assert_eq!(report.products[0].product_id, 10);
        assert_eq!(report.products[0].deliveries, 2);
        assert_eq!(report.products[0].downloads, 2);
    }

    #[test]
    fn usage_report_empty_store() {
        let store = store();
        let report = store.usage_report(0).unwrap();
        assert_eq!(report.total_deliveries, 0);
        assert_eq!(report.average_downloads, 0.0);
        assert_eq!(report.usage_rate, 0.0);
        assert!(report.products.is_empty());
    }

    #[test]
    fn user_downloads_since_sums_recent_activity() {
        let store = store();
        let mut a = sample_access("tok-a", 100);
        a.user_id = 5;
        store.insert_access(&a).unwrap();
        store.consume_use("tok-a", 1_100_000).unwrap();
        store.consume_use("tok-a", 1_200_000).unwrap();

        let mut b = sample_access("tok-b", 101);
        b.user_id = 5;
        store.insert_access(&b).unwrap();

        assert_eq!(store.user_downloads_since(5, 1_000_000).unwrap(), 2);
        assert_eq!(store.user_downloads_since(5, 1_300_000).unwrap(), 0);
        assert_eq!(store.user_downloads_since(6, 0).unwrap(), 0);
    }

    #[test]
    fn attempt_log_appends() {
        let store = store();
        for (success, reason) in [(true, "ok"), (false, "exhausted")] {
            store
                .log_attempt(&DownloadAttempt {
                    token: "tok-a".to_string(),
                    client_ip: Some("10.0.0.1".to_string()),
                    user_agent: Some("curl/8".to_string()),
                    success,
                    reason: reason.to_string(),
                    created_at: 1_000,
                })
                .unwrap();
        }

        let attempts = store.attempts_for_token("tok-a").unwrap();
        assert_eq!(attempts.len(), 2);
        assert!(attempts[0].success);
        assert_eq!(attempts[1].reason, "exhausted");
    }

    #[test]
    fn job_run_lifecycle() {
        let store = store();
        let run_id = store.record_job_start("expiry_sweep", "schedule").unwrap();
        let run = store.get_last_run("expiry_sweep").unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Running);

        store
            .record_job_finish(run_id, JobRunStatus::Completed, None)
            .unwrap();
        let run = store.get_last_run("expiry_sweep").unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Completed);
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn stale_jobs_marked_failed() {
        let store = store();
        store.record_job_start("expiry_sweep", "schedule").unwrap();
        store.record_job_start("backup", "schedule").unwrap();

        assert_eq!(store.mark_stale_jobs_failed().unwrap(), 2);
        assert_eq!(store.mark_stale_jobs_failed().unwrap(), 0);

        let run = store.get_last_run("backup").unwrap().unwrap();
        assert_eq!(run.status, JobRunStatus::Failed);
    }

    #[test]
    fn backup_snapshot_is_openable() {
        let dir = TempDir::new().unwrap();
        let store = store();
        store.insert_access(&sample_access("tok-a", 100)).unwrap();

        let backup_path = dir.path().join("snapshot.db");
        store.backup_to(&backup_path).unwrap();

        let restored = SqliteAccessStore::new(&backup_path).unwrap();
        let access = restored.get_access_by_token("tok-a").unwrap().unwrap();
        assert_eq!(access.transaction_id, 100);
    }

    #[test]
    fn reopen_validates_schema() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("delivery.db");
        {
            let store = SqliteAccessStore::new(&db_path).unwrap();
            store.insert_access(&sample_access("tok-a", 100)).unwrap();
        }
        let store = SqliteAccessStore::new(&db_path).unwrap();
        assert!(store.get_access_by_token("tok-a").unwrap().is_some());
    }
}
