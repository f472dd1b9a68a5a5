//! Secure delivery and access control for a video storefront.
//!
//! Purchases become time-limited, usage-capped download grants; links are
//! HMAC-signed, delivery is streamed with byte-range support, and a
//! background scheduler handles expiry, warnings, reports and backups.

pub mod access_store;
pub mod background_jobs;
pub mod config;
pub mod delivery;
pub mod notifications;
pub mod server;
pub mod sqlite_persistence;

pub use access_store::{AccessStore, SqliteAccessStore};
pub use config::{AppConfig, CliConfig, FileConfig};
pub use server::{run_server, RequestsLoggingLevel, ServerConfig};
