mod config;
mod db;

use backup_engine::utils::logger;
use backup_engine::{BackupService, PgDatabase, PgDumpExecutor};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = config::load(args.config.as_deref())?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    logger::init(log_level)?;

    tracing::info!(
        "Starting backup-daemon v{} (backup_dir: {})",
        env!("CARGO_PKG_VERSION"),
        config.storage.backup_dir.display()
    );

    let pool = db::connection::create_pool(&config.database);
    let database = Arc::new(PgDatabase::new(pool));
    let dumper = Arc::new(PgDumpExecutor::new(
        config.database.pg_dump.clone(),
        config.database.psql.clone(),
    ));

    let service = BackupService::new(config, database, dumper);
    service.initialize().await?;

    let status = service.status();
    for job in &status.scheduled_jobs {
        tracing::info!(job = %job.name, cron = %job.schedule, running = job.running, "Scheduled job");
    }

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    cancel.cancelled().await;

    tracing::info!("Shutting down...");
    if let Err(e) = service.shutdown().await {
        tracing::warn!("Backup service shutdown error: {}", e);
    }
    tracing::info!("Daemon stopped");

    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl+c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }

    cancel.cancel();
}
