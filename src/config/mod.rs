// mysqlbackup/src/config/mod.rs
pub mod args;

use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

use crate::errors::{AppError, Result};
use crate::schedule::Schedule;
pub use args::ConfigArgs;

const DEFAULT_DB_PORT: u16 = 3306;
const DEFAULT_COMPRESSION_LEVEL: u32 = 9;
const DEFAULT_DUMP_COMMAND: &str = "mysqldump";

// Structs for deserializing the optional JSON config file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonDbConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub password_channel: Option<String>,
    pub dump_command: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonBackupConfig {
    pub dir: Option<PathBuf>,
    pub compression_level: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct JsonS3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub bucket: Option<String>,
    pub force_path_style: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RawJsonConfig {
    pub db: JsonDbConfig,
    pub backup: JsonBackupConfig,
    pub s3: JsonS3Config,
}

impl RawJsonConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path).map_err(|e| {
            AppError::config(format!(
                "Failed to read config file at {}: {}",
                config_path.display(),
                e
            ))
        })?;
        serde_json::from_str(&config_content).map_err(|e| {
            AppError::config(format!(
                "Failed to parse JSON from config file at {}: {}",
                config_path.display(),
                e
            ))
        })
    }
}

/// How the database password reaches the dump tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordChannel {
    /// `-p` flag, password written to the child's stdin.
    Stdin,
    /// `MYSQL_PWD` exported to the child only.
    Env,
}

impl PasswordChannel {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "stdin" => Ok(PasswordChannel::Stdin),
            "env" => Ok(PasswordChannel::Env),
            other => Err(AppError::config(format!(
                "Unknown password channel '{}', expected 'stdin' or 'env'",
                other
            ))),
        }
    }
}

/// Gzip level, only constructible inside 1..=9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressionLevel(u32);

impl CompressionLevel {
    pub fn new(level: u32) -> Result<Self> {
        if (1..=9).contains(&level) {
            Ok(CompressionLevel(level))
        } else {
            Err(AppError::config(format!(
                "Compression level must be between 1 and 9, got {}",
                level
            )))
        }
    }

    pub fn value(self) -> u32 {
        self.0
    }

    pub fn as_flate2(self) -> flate2::Compression {
        flate2::Compression::new(self.0)
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        CompressionLevel(DEFAULT_COMPRESSION_LEVEL)
    }
}

#[derive(Clone)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub password_channel: PasswordChannel,
    pub dump_command: String,
}

impl fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("name", &self.name)
            .field("password_channel", &self.password_channel)
            .field("dump_command", &self.dump_command)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct BackupConfig {
    pub dir: PathBuf,
    pub compression_level: CompressionLevel,
    pub schedule: Option<Schedule>,
}

#[derive(Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub force_path_style: bool,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("access_key", &"***")
            .field("secret_key", &"***")
            .field("bucket", &self.bucket)
            .field("force_path_style", &self.force_path_style)
            .finish()
    }
}

/// Fully resolved configuration, threaded through every backup run.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub backup: BackupConfig,
    pub s3: S3Config,
}

impl Config {
    /// Resolves flags/env (already merged by clap) over the optional JSON file
    /// over built-in defaults, and validates the result.
    pub fn resolve(args: &ConfigArgs, db_name: &str, schedule: Option<&str>) -> Result<Self> {
        let raw = match &args.config {
            Some(path) => RawJsonConfig::load_from_json(path)?,
            None => RawJsonConfig::default(),
        };
        Self::resolve_with(args, raw, db_name, schedule)
    }

    fn resolve_with(
        args: &ConfigArgs,
        raw: RawJsonConfig,
        db_name: &str,
        schedule: Option<&str>,
    ) -> Result<Self> {
        let db = DbConfig {
            host: required("db host (--db-host / DB_HOST)", args.db_host.clone().or(raw.db.host))?,
            port: args.db_port.or(raw.db.port).unwrap_or(DEFAULT_DB_PORT),
            user: required("db user (--db-user / DB_USER)", args.db_user.clone().or(raw.db.user))?,
            password: args
                .db_password
                .clone()
                .or(raw.db.password)
                .unwrap_or_default(),
            name: validate_database_name(db_name)?,
            password_channel: match args.db_password_channel.clone().or(raw.db.password_channel) {
                Some(value) => PasswordChannel::parse(&value)?,
                None => PasswordChannel::Stdin,
            },
            dump_command: args
                .dump_command
                .clone()
                .or(raw.db.dump_command)
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_DUMP_COMMAND.to_string()),
        };

        let backup = BackupConfig {
            dir: args
                .backup_dir
                .clone()
                .or(raw.backup.dir)
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(std::env::temp_dir),
            compression_level: match args
                .backup_compression_level
                .or(raw.backup.compression_level)
            {
                Some(level) => CompressionLevel::new(level)?,
                None => CompressionLevel::default(),
            },
            schedule: schedule.map(Schedule::parse).transpose()?,
        };

        let endpoint = required(
            "S3 endpoint (--s3-endpoint / S3_ENDPOINT)",
            args.s3_endpoint.clone().or(raw.s3.endpoint),
        )?;
        Url::parse(&endpoint)
            .map_err(|e| AppError::config(format!("Invalid S3 endpoint '{}': {}", endpoint, e)))?;

        let s3 = S3Config {
            endpoint,
            region: required("S3 region (--s3-region / S3_REGION)", args.s3_region.clone().or(raw.s3.region))?,
            access_key: required(
                "S3 access key (--s3-access-key / S3_ACCESS_KEY)",
                args.s3_access_key.clone().or(raw.s3.access_key),
            )?,
            secret_key: required(
                "S3 secret key (--s3-secret-key / S3_SECRET_KEY)",
                args.s3_secret_key.clone().or(raw.s3.secret_key),
            )?,
            bucket: required("S3 bucket (--s3-bucket / S3_BUCKET)", args.s3_bucket.clone().or(raw.s3.bucket))?,
            force_path_style: args
                .s3_force_path_style
                .or(raw.s3.force_path_style)
                .unwrap_or(false),
        };

        fs::create_dir_all(&backup.dir).map_err(|e| {
            AppError::config(format!(
                "Failed to create backup directory {}: {}",
                backup.dir.display(),
                e
            ))
        })?;

        Ok(Config { db, backup, s3 })
    }
}

fn required(what: &str, value: Option<String>) -> Result<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(AppError::config(format!("{} cannot be empty", what))),
        None => Err(AppError::config(format!("{} must be set", what))),
    }
}

fn validate_database_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::config("Database name cannot be empty"));
    }
    if name.contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-' && c != '$') {
        return Err(AppError::config(format!(
            "Invalid character in database name: {}",
            name
        )));
    }
    Ok(name.to_string())
}
