//! MySQL Backup Tool
//!
//! Dumps a MySQL database, gzips it and ships it to S3-compatible storage,
//! either once or on a schedule.

// mysqlbackup/src/main.rs
mod backup;
mod config;
mod errors;
mod logging;
mod schedule;
mod utils;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

use backup::{BackupPipeline, MysqlDump, S3Uploader};
use config::{Config, ConfigArgs};
use logging::{LogFormat, init_logging};
use schedule::CronTrigger;

#[derive(Debug, Parser)]
#[command(name = "mysqlbackup", version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,

    /// Logging level
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info", value_name = "LEVEL")]
    log_level: String,

    /// Log output format
    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create and upload one backup now
    Create {
        /// MySQL database name
        db_name: String,
    },
    /// Keep creating backups on a schedule until interrupted
    Schedule {
        /// MySQL database name
        db_name: String,
        /// Backup creation schedule: cron expression, `every N minutes`, `daily`, ...
        schedule: String,
    },
}

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    init_logging(&cli.log_level, cli.log_format);

    match run_app(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_app(cli: Cli) -> Result<()> {
    let (db_name, schedule_expr) = match &cli.command {
        Command::Create { db_name } => (db_name.as_str(), None),
        Command::Schedule { db_name, schedule } => (db_name.as_str(), Some(schedule.as_str())),
    };
    let config = Config::resolve(&cli.config, db_name, schedule_expr)
        .context("Failed to resolve configuration")?;
    tracing::debug!(?config, "Running with config");

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    let store = S3Uploader::new(&config.s3).await;
    let pipeline = BackupPipeline::new(config, MysqlDump, store);

    match pipeline.config().backup.schedule.clone() {
        None => {
            pipeline
                .run(&shutdown)
                .await
                .context("Backup process failed")?;
        }
        Some(backup_schedule) => {
            let (trigger, triggers) = CronTrigger::start(&backup_schedule)
                .await
                .context("Failed to start backup schedule")?;
            schedule::run_scheduled(&pipeline, triggers, shutdown).await;
            trigger.shutdown().await;
        }
    }
    Ok(())
}

/// Cancels `shutdown` on Ctrl-C (and SIGTERM on unix).
async fn cancel_on_signal(shutdown: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Interrupt received, shutting down");
    shutdown.cancel();
}
