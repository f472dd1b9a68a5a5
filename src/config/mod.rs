mod file_config;

pub use file_config::{DeliveryConfig, FileConfig, MaintenanceConfig};

use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub public_base_url: Option<String>,
    pub signing_secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_dir: PathBuf,
    pub reports_dir: PathBuf,
    pub backups_dir: PathBuf,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub public_base_url: String,
    /// Process-wide signing secret, read-only after startup.
    pub signing_secret: String,

    pub delivery: DeliverySettings,
    pub maintenance: MaintenanceSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_dir = file
            .media_dir
            .map(PathBuf::from)
            .or_else(|| cli.media_dir.clone())
            .unwrap_or_else(|| db_dir.clone());

        let reports_dir = file
            .reports_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| db_dir.join("reports"));
        let backups_dir = file
            .backups_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| db_dir.join("backups"));

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let public_base_url = file
            .public_base_url
            .or_else(|| cli.public_base_url.clone())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let signing_secret = file
            .signing_secret
            .or_else(|| cli.signing_secret.clone())
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "signing_secret must be specified via --signing-secret or in config file"
                )
            })?;
        if signing_secret.is_empty() {
            bail!("signing_secret must not be empty");
        }

        let delivery_file = file.delivery.unwrap_or_default();
        let delivery = DeliverySettings {
            expiry_hours: delivery_file.expiry_hours.unwrap_or(24),
            max_downloads: delivery_file.max_downloads.unwrap_or(3),
            piracy_daily_download_threshold: delivery_file
                .piracy_daily_download_threshold
                .unwrap_or(10),
        };
        if delivery.expiry_hours <= 0 {
            bail!("delivery.expiry_hours must be positive");
        }
        if delivery.max_downloads < 0 {
            bail!("delivery.max_downloads must not be negative");
        }

        let maintenance_file = file.maintenance.unwrap_or_default();
        let maintenance = MaintenanceSettings {
            sweep_interval_hours: maintenance_file.sweep_interval_hours.unwrap_or(1),
            warning_interval_hours: maintenance_file.warning_interval_hours.unwrap_or(2),
            warning_window_min_hours: maintenance_file.warning_window_min_hours.unwrap_or(1),
            warning_window_max_hours: maintenance_file.warning_window_max_hours.unwrap_or(3),
            report_interval_hours: maintenance_file.report_interval_hours.unwrap_or(24),
            report_window_days: maintenance_file.report_window_days.unwrap_or(30),
            backup_interval_hours: maintenance_file.backup_interval_hours.unwrap_or(24),
            backup_retention: maintenance_file.backup_retention.unwrap_or(7),
        };
        if maintenance.warning_window_min_hours >= maintenance.warning_window_max_hours {
            bail!("maintenance.warning_window_min_hours must be below warning_window_max_hours");
        }
        if maintenance.backup_retention == 0 {
            bail!("maintenance.backup_retention must be at least 1");
        }

        Ok(Self {
            db_dir,
            media_dir,
            reports_dir,
            backups_dir,
            port,
            logging_level,
            public_base_url,
            signing_secret,
            delivery,
            maintenance,
        })
    }

    pub fn access_db_path(&self) -> PathBuf {
        self.db_dir.join("delivery.db")
    }
}

/// Defaults applied to newly issued grants.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub expiry_hours: i64,
    pub max_downloads: i64,
    pub piracy_daily_download_threshold: i64,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            expiry_hours: 24,
            max_downloads: 3,
            piracy_daily_download_threshold: 10,
        }
    }
}

/// Cadences and windows for the background maintenance jobs.
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub sweep_interval_hours: u64,
    pub warning_interval_hours: u64,
    pub warning_window_min_hours: i64,
    pub warning_window_max_hours: i64,
    pub report_interval_hours: u64,
    pub report_window_days: i64,
    pub backup_interval_hours: u64,
    pub backup_retention: usize,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            sweep_interval_hours: 1,
            warning_interval_hours: 2,
            warning_window_min_hours: 1,
            warning_window_max_hours: 3,
            report_interval_hours: 24,
            report_window_days: 30,
            backup_interval_hours: 24,
            backup_retention: 7,
        }
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
