//! Vulnwatch CLI - Single entrypoint for the scan engine
//!
//! This application orchestrates the library crates and provides the
//! execution modes: worker (the poll/claim/scan loop), migrate, and a
//! one-shot scan submission.

mod commands;

use clap::{Parser, Subcommand};
use commands::{MigrateCommand, ScanCommand, WorkerCommand};
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "VULNWATCH_LOG_LEVEL", global = true)]
    log_level: String,

    /// Log format: compact, full
    #[arg(
        long,
        default_value = "compact",
        env = "VULNWATCH_LOG_FORMAT",
        global = true
    )]
    log_format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scan worker instance
    Worker(WorkerCommand),
    /// Apply pending database migrations
    Migrate(MigrateCommand),
    /// Submit one image for scanning and wait for the result
    Scan(ScanCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // If RUST_LOG is set, use it directly; otherwise use our default filter
    // with all vulnwatch crates at the requested level and noisy
    // dependencies at warn
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .expect("Invalid RUST_LOG environment variable")
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "vulnwatch_cli={level},\
             vulnwatch_core={level},\
             vulnwatch_entities={level},\
             vulnwatch_migrations={level},\
             vulnwatch_database={level},\
             vulnwatch_scanner={level},\
             sqlx=warn,\
             sea_orm=warn,\
             bollard=warn,\
             hyper=warn",
            level = cli.log_level
        ))
    };

    let fmt_layer = match cli.log_format.as_str() {
        "full" => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer() // "compact" or any other value
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global default subscriber");

    match cli.command {
        Commands::Worker(worker_cmd) => worker_cmd.execute().await,
        Commands::Migrate(migrate_cmd) => migrate_cmd.execute().await,
        Commands::Scan(scan_cmd) => scan_cmd.execute().await,
    }
}
