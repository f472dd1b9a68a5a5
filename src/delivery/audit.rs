use crate::access_store::{AccessStore, DownloadAttempt};
use std::sync::Arc;
use tracing::warn;

/// Write-only sink for download attempt records.
///
/// Logging an attempt must never fail the request that produced it, so
/// store errors are reported and swallowed here.
#[derive(Clone)]
pub struct AttemptLogger {
    store: Arc<dyn AccessStore>,
}

impl AttemptLogger {
    pub fn new(store: Arc<dyn AccessStore>) -> Self {
        Self { store }
    }

    pub fn log(
        &self,
        token: &str,
        client_ip: Option<String>,
        user_agent: Option<String>,
        success: bool,
        reason: &str,
        now: i64,
    ) {
        let attempt = DownloadAttempt {
            token: token.to_string(),
            client_ip,
            user_agent,
            success,
            reason: reason.to_string(),
            created_at: now,
        };
        if let Err(err) = self.store.log_attempt(&attempt) {
            warn!("Failed to record download attempt for {}: {}", token, err);
        }
    }
}
