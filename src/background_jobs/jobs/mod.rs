mod backup;
mod expiry_sweep;
mod expiry_warnings;
mod usage_report;

pub use backup::BackupJob;
pub use expiry_sweep::ExpirySweepJob;
pub use expiry_warnings::ExpiryWarningsJob;
pub use usage_report::UsageReportJob;
