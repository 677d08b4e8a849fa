use clap::Args;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vulnwatch_database::establish_connection;
use vulnwatch_scanner::{ScanWorker, WorkerConfig};

#[derive(Args)]
pub struct WorkerCommand {
    /// Database connection URL
    #[arg(long, env = "VULNWATCH_DATABASE_URL")]
    pub database_url: String,

    /// Worker identifier recorded on claimed jobs and audit entries
    #[arg(long, env = "VULNWATCH_WORKER_ID")]
    pub worker_id: Option<String>,

    /// Seconds between poll cycles
    #[arg(long, default_value_t = 5, env = "VULNWATCH_POLL_INTERVAL")]
    pub poll_interval: u64,

    /// Hard wall-clock limit for one scan, in seconds
    #[arg(long, default_value_t = 600, env = "VULNWATCH_SCAN_TIMEOUT")]
    pub scan_timeout: u64,

    /// Reclaim jobs stuck in an in-flight state longer than this, in seconds
    #[arg(long, default_value_t = 1800, env = "VULNWATCH_STALE_AFTER")]
    pub stale_after: u64,

    /// How long in-flight scans get to finish after a shutdown signal
    #[arg(long, default_value_t = 30, env = "VULNWATCH_SHUTDOWN_GRACE")]
    pub shutdown_grace: u64,

    /// Retry budget for transient failures (hard-capped at 10)
    #[arg(long, default_value_t = 3, env = "VULNWATCH_MAX_RETRIES")]
    pub max_retries: i32,

    /// Concurrent scan slots for this worker
    #[arg(long, default_value_t = 4, env = "VULNWATCH_CONCURRENCY")]
    pub concurrency: usize,

    /// Path to the trivy binary
    #[arg(long, default_value = "trivy", env = "VULNWATCH_TRIVY_BINARY")]
    pub trivy_binary: String,

    /// Trivy vulnerability database cache directory
    #[arg(long, env = "VULNWATCH_TRIVY_CACHE_DIR")]
    pub trivy_cache_dir: Option<PathBuf>,

    /// Refresh the vulnerability database before the first poll
    #[arg(long)]
    pub refresh_db: bool,
}

impl WorkerCommand {
    pub async fn execute(self) -> anyhow::Result<()> {
        let db = establish_connection(&self.database_url).await?;
        info!("database connected, migrations applied");

        let docker = Arc::new(bollard::Docker::connect_with_local_defaults()?);
        docker.ping().await?;
        info!("docker daemon reachable");

        let defaults = WorkerConfig::default();
        let config = WorkerConfig {
            worker_id: self.worker_id.unwrap_or(defaults.worker_id),
            poll_interval: Duration::from_secs(self.poll_interval),
            scan_timeout: Duration::from_secs(self.scan_timeout),
            stale_after: Duration::from_secs(self.stale_after),
            shutdown_grace: Duration::from_secs(self.shutdown_grace),
            max_retries: self.max_retries,
            concurrency: self.concurrency,
            trivy_binary: self.trivy_binary,
            trivy_cache_dir: self.trivy_cache_dir.unwrap_or(defaults.trivy_cache_dir),
            risk_weights: defaults.risk_weights,
        };

        let worker = ScanWorker::new(db, docker, config);

        match worker.scanner().version().await {
            Some(version) => info!(version = %version, "trivy binary found"),
            None => warn!(
                "trivy binary not found or unrecognized; scans will fail until it is installed"
            ),
        }

        if self.refresh_db {
            // A failed refresh is not fatal: trivy downloads the database
            // on demand during the first scan
            if let Err(err) = worker.scanner().refresh_database().await {
                warn!(error = %err, "vulnerability database refresh failed");
            }
        }

        println!(
            "{} {}",
            "Vulnwatch worker running.".bright_green(),
            "Press Ctrl-C to stop.".bright_white()
        );

        let handle = worker.start();

        tokio::signal::ctrl_c().await?;
        println!("{}", "Shutting down, draining in-flight scans...".yellow());
        handle.shutdown().await;

        Ok(())
    }
}
