use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_dir: Option<String>,
    pub reports_dir: Option<String>,
    pub backups_dir: Option<String>,
    pub port: Option<u16>,
    pub logging_level: Option<String>,
    pub public_base_url: Option<String>,
    pub signing_secret: Option<String>,

    // Feature configs
    pub delivery: Option<DeliveryConfig>,
    pub maintenance: Option<MaintenanceConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DeliveryConfig {
    pub expiry_hours: Option<i64>,
    pub max_downloads: Option<i64>,
    pub piracy_daily_download_threshold: Option<i64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub sweep_interval_hours: Option<u64>,
    pub warning_interval_hours: Option<u64>,
    pub warning_window_min_hours: Option<i64>,
    pub warning_window_max_hours: Option<i64>,
    pub report_interval_hours: Option<u64>,
    pub report_window_days: Option<i64>,
    pub backup_interval_hours: Option<u64>,
    pub backup_retention: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
