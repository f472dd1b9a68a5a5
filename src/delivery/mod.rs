//! Secure delivery core: token issuance, signed URLs, the download gate
//! and the advisory piracy monitor.

mod audit;
mod gate;
mod monitor;
mod signer;
mod token;

pub use audit::AttemptLogger;
pub use gate::{Delivery, DownloadGate, GateError};
pub use monitor::{PiracyMonitor, RiskAssessment, RiskLevel};
pub use signer::{SignedUrl, UrlSigner};
pub use token::{PurchaseEvent, TokenIssuer};

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
