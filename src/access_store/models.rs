use serde::Serialize;

/// A purchased product whose file can be delivered. Catalog management lives
/// elsewhere; this store only needs enough to resolve a delivery to a file.
#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub title: String,
    /// Path of the backing file, relative to the media directory.
    pub file_path: String,
    /// Filename suggested to the client in Content-Disposition.
    pub file_name: String,
    pub active: bool,
}

/// A download grant created when a purchase completes.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadAccess {
    pub id: i64,
    pub transaction_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub token: String,
    pub download_count: i64,
    pub max_downloads: i64,
    pub last_access: Option<i64>,
    pub expires_at: i64,
    pub created_at: i64,
}

impl DownloadAccess {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    pub fn remaining_downloads(&self) -> i64 {
        (self.max_downloads - self.download_count).max(0)
    }
}

/// Fields needed to insert a new grant. The id is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewDownloadAccess {
    pub transaction_id: i64,
    pub user_id: i64,
    pub product_id: i64,
    pub token: String,
    pub max_downloads: i64,
    pub expires_at: i64,
    pub created_at: i64,
}

/// One entry in the append-only download attempt log.
#[derive(Debug, Clone)]
pub struct DownloadAttempt {
    pub token: String,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub success: bool,
    pub reason: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobRunStatus {
    Running,
    Completed,
    Failed,
}

impl JobRunStatus {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            JobRunStatus::Running => "RUNNING",
            JobRunStatus::Completed => "COMPLETED",
            JobRunStatus::Failed => "FAILED",
        }
    }

    pub fn from_db_str(s: &str) -> Option<Self> {
        match s {
            "RUNNING" => Some(JobRunStatus::Running),
            "COMPLETED" => Some(JobRunStatus::Completed),
            "FAILED" => Some(JobRunStatus::Failed),
            _ => None,
        }
    }
}

/// History record of one scheduler job execution.
#[derive(Debug, Clone)]
pub struct JobRun {
    pub id: i64,
    pub job_id: String,
    pub triggered_by: String,
    pub status: JobRunStatus,
    pub error_message: Option<String>,
    pub started_at: i64,
    pub finished_at: Option<i64>,
}

/// Per-product slice of a usage report.
#[derive(Debug, Clone, Serialize)]
pub struct ProductUsage {
    pub product_id: i64,
    pub deliveries: i64,
    pub downloads: i64,
}

/// Aggregate delivery statistics over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub window_start: i64,
    pub total_deliveries: i64,
    pub unique_users: i64,
    pub total_downloads: i64,
    /// Average downloads per delivery; 0.0 when there are no deliveries.
    pub average_downloads: f64,
    /// Fraction of deliveries with at least one download.
    pub usage_rate: f64,
    pub products: Vec<ProductUsage>,
}
