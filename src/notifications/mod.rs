//! Outbound notification seam for the expiry warning pass.
//!
//! The storefront bot that actually messages buyers is an external
//! collaborator; in-process we only define the interface and a logging
//! implementation.

use crate::access_store::DownloadAccess;
use tracing::info;

pub trait Notifier: Send + Sync {
    /// Tell the buyer their grant expires soon and still has uses left.
    fn notify_expiry_warning(&self, access: &DownloadAccess, hours_left: i64);
}

/// Notifier that only writes to the server log. Stands in wherever no
/// messaging backend is wired up.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_expiry_warning(&self, access: &DownloadAccess, hours_left: i64) {
        info!(
            "Expiry warning for user {}: grant for product {} expires in ~{}h with {} downloads left",
            access.user_id,
            access.product_id,
            hours_left,
            access.remaining_downloads()
        );
    }
}
