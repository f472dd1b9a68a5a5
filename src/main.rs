use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vidgate_server::access_store::SqliteAccessStore;
use vidgate_server::background_jobs::jobs::{
    BackupJob, ExpirySweepJob, ExpiryWarningsJob, UsageReportJob,
};
use vidgate_server::background_jobs::{JobContext, JobScheduler};
use vidgate_server::config::{AppConfig, CliConfig, FileConfig};
use vidgate_server::delivery::{DownloadGate, UrlSigner};
use vidgate_server::notifications::LogNotifier;
use vidgate_server::server::{run_server, RequestsLoggingLevel, ServerConfig};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the delivery database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory holding the product media files.
    #[clap(long, value_parser = parse_path)]
    pub media_dir: Option<PathBuf>,

    /// Path to a TOML config file. File values override CLI values.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Public base URL used when building signed download links.
    #[clap(long)]
    pub public_base_url: Option<String>,

    /// Secret used to sign download links.
    #[clap(long)]
    pub signing_secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir,
        media_dir: cli_args.media_dir,
        port: cli_args.port,
        logging_level: cli_args.logging_level,
        public_base_url: cli_args.public_base_url,
        signing_secret: cli_args.signing_secret,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    std::fs::create_dir_all(&config.reports_dir)?;
    std::fs::create_dir_all(&config.backups_dir)?;

    info!(
        "Opening SQLite delivery database at {:?}...",
        config.access_db_path()
    );
    let access_store = Arc::new(SqliteAccessStore::new(&config.access_db_path())?);

    let signer = Arc::new(UrlSigner::new(
        config.signing_secret.as_str(),
        config.public_base_url.as_str(),
    )?);
    let gate = Arc::new(DownloadGate::new(
        access_store.clone(),
        config.media_dir.clone(),
    ));

    let shutdown_token = CancellationToken::new();
    let job_context = JobContext::new(
        shutdown_token.clone(),
        access_store.clone(),
        Arc::new(LogNotifier),
        config.reports_dir.clone(),
        config.backups_dir.clone(),
    );

    let maintenance = &config.maintenance;
    let mut scheduler = JobScheduler::new(
        access_store.clone(),
        shutdown_token.clone(),
        job_context,
    );
    scheduler.register_job(Arc::new(ExpirySweepJob::new(
        maintenance.sweep_interval_hours,
    )));
    scheduler.register_job(Arc::new(ExpiryWarningsJob::new(
        maintenance.warning_interval_hours,
        maintenance.warning_window_min_hours,
        maintenance.warning_window_max_hours,
    )));
    scheduler.register_job(Arc::new(UsageReportJob::new(
        maintenance.report_interval_hours,
        maintenance.report_window_days,
    )));
    scheduler.register_job(Arc::new(BackupJob::new(
        maintenance.backup_interval_hours,
        maintenance.backup_retention,
    )));
    let scheduler_handle = tokio::spawn(scheduler.run());

    let server_config = ServerConfig {
        requests_logging_level: config.logging_level.clone(),
        port: config.port,
    };

    info!("Ready to serve at port {}!", config.port);
    tokio::select! {
        result = run_server(server_config, access_store, gate, signer) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            shutdown_token.cancel();
            let _ = scheduler_handle.await;
            Ok(())
        }
    }
}
