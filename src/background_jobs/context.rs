use crate::access_store::AccessStore;
use crate::notifications::Notifier;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shared dependencies handed to every job execution. Per-job knobs such
/// as intervals and windows live on the jobs themselves.
#[derive(Clone)]
pub struct JobContext {
    pub cancellation_token: CancellationToken,
    pub access_store: Arc<dyn AccessStore>,
    pub notifier: Arc<dyn Notifier>,
    pub reports_dir: PathBuf,
    pub backups_dir: PathBuf,
}

impl JobContext {
    pub fn new(
        cancellation_token: CancellationToken,
        access_store: Arc<dyn AccessStore>,
        notifier: Arc<dyn Notifier>,
        reports_dir: PathBuf,
        backups_dir: PathBuf,
    ) -> Self {
        Self {
            cancellation_token,
            access_store,
            notifier,
            reports_dir,
            backups_dir,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
