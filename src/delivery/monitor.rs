use crate::access_store::AccessStore;
use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

const ASSESSMENT_WINDOW_SECS: i64 = 24 * 3600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    High,
}

/// Outcome of a download velocity assessment for one user.
#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub user_id: i64,
    pub level: RiskLevel,
    /// Downloads observed in the trailing 24 hours.
    pub recent_downloads: i64,
    pub warnings: Vec<String>,
}

/// Advisory heuristic over a user's download velocity.
///
/// Assessment only flags; it never blocks on its own. Blocking a token is
/// a separate, explicitly invoked action.
pub struct PiracyMonitor {
    store: Arc<dyn AccessStore>,
    daily_download_threshold: i64,
}

impl PiracyMonitor {
    pub fn new(store: Arc<dyn AccessStore>, daily_download_threshold: i64) -> Self {
        Self {
            store,
            daily_download_threshold,
        }
    }

    pub fn assess(&self, user_id: i64, now: i64) -> Result<RiskAssessment> {
        let recent_downloads = self
            .store
            .user_downloads_since(user_id, now - ASSESSMENT_WINDOW_SECS)?;

        let mut warnings = Vec::new();
        let level = if recent_downloads > self.daily_download_threshold {
            warnings.push(format!(
                "{} downloads in the last 24h exceeds threshold {}",
                recent_downloads, self.daily_download_threshold
            ));
            RiskLevel::High
        } else {
            RiskLevel::Low
        };

        if level == RiskLevel::High {
            warn!(
                "User {} flagged high risk: {} downloads in 24h",
                user_id, recent_downloads
            );
        }

        Ok(RiskAssessment {
            user_id,
            level,
            recent_downloads,
            warnings,
        })
    }

    /// Force the token's limit to zero. The gate reports Exhausted for all
    /// subsequent attempts; there is no unblock.
    pub fn block(&self, token: &str, reason: &str) -> Result<bool> {
        let blocked = self.store.block_token(token)?;
        if blocked {
            info!("Blocked token ({})", reason);
        } else {
            warn!("Block requested for unknown token ({})", reason);
        }
        Ok(blocked)
    }
}
