// mysqlbackup/src/config/args.rs
use clap::Args;
use std::path::PathBuf;

/// Connection, storage and backup options shared by every command.
///
/// Each flag falls back to its environment variable; anything still unset is
/// taken from the JSON config file, then from built-in defaults.
#[derive(Debug, Clone, Default, Args)]
pub struct ConfigArgs {
    /// Optional JSON config file
    #[arg(long, global = true, env = "MYSQLBACKUP_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// MySQL host
    #[arg(long, global = true, env = "DB_HOST", value_name = "HOST")]
    pub db_host: Option<String>,

    /// MySQL port
    #[arg(long, global = true, env = "DB_PORT", value_name = "PORT")]
    pub db_port: Option<u16>,

    /// MySQL user
    #[arg(long, global = true, env = "DB_USER", value_name = "USER")]
    pub db_user: Option<String>,

    /// MySQL password
    #[arg(long, global = true, env = "DB_PASSWORD", hide_env_values = true, value_name = "PASSWORD")]
    pub db_password: Option<String>,

    /// How the password is handed to the dump tool: stdin or env
    #[arg(long, global = true, env = "DB_PASSWORD_CHANNEL", value_name = "CHANNEL")]
    pub db_password_channel: Option<String>,

    /// Dump tool executable
    #[arg(long, global = true, env = "DUMP_COMMAND", value_name = "COMMAND")]
    pub dump_command: Option<String>,

    /// Backup directory
    #[arg(long, global = true, env = "BACKUP_DIR", value_name = "DIR")]
    pub backup_dir: Option<PathBuf>,

    /// Backup file compression level (1-9)
    #[arg(long, global = true, env = "BACKUP_COMPRESSION_LEVEL", value_name = "LVL")]
    pub backup_compression_level: Option<u32>,

    /// S3 endpoint
    #[arg(long, global = true, env = "S3_ENDPOINT", value_name = "ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// S3 region
    #[arg(long, global = true, env = "S3_REGION", value_name = "REGION")]
    pub s3_region: Option<String>,

    /// S3 access key
    #[arg(long, global = true, env = "S3_ACCESS_KEY", hide_env_values = true, value_name = "ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    /// S3 secret key
    #[arg(long, global = true, env = "S3_SECRET_KEY", hide_env_values = true, value_name = "SECRET_KEY")]
    pub s3_secret_key: Option<String>,

    /// S3 bucket
    #[arg(long, global = true, env = "S3_BUCKET", value_name = "BUCKET")]
    pub s3_bucket: Option<String>,

    /// Use path-style bucket addressing (needed by most self-hosted S3 services)
    #[arg(long, global = true, env = "S3_FORCE_PATH_STYLE", value_name = "BOOL")]
    pub s3_force_path_style: Option<bool>,
}
