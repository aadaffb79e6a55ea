// mysqlbackup/src/logging.rs
use clap::ValueEnum;
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Json => fmt().json().with_env_filter(filter).with_target(true).init(),
        LogFormat::Pretty => fmt().pretty().with_env_filter(filter).with_target(true).init(),
        LogFormat::Compact => fmt().compact().with_env_filter(filter).with_target(false).init(),
    }
}
